//! Synchronization primitives with loom support.
//!
//! Under normal compilation, re-exports from std/parking_lot.
//! Under `cfg(loom)`, uses loom's equivalents for deterministic testing.
//!
//! # Usage
//!
//! Instead of importing directly from `std::sync` or `parking_lot`,
//! import from this module:
//!
//! ```ignore
//! use crate::sync::{Condvar, Mutex, RawMutex, UnsafeCell};
//! ```
//!
//! # Loom Integration
//!
//! When compiled with `--cfg loom`, this module provides loom-compatible
//! implementations that allow deterministic testing of concurrent code
//! by exploring all possible thread interleavings.

// ===========================================================================
// Mutex and Condvar
// ===========================================================================

// Note: parking_lot and loom disagree on how a condition variable consumes the
// guard. parking_lot waits on `&mut MutexGuard`, loom takes the guard by value
// and hands back a `LockResult`. The loom wrappers below adopt parking_lot's shape.

#[cfg(not(loom))]
pub use parking_lot::{Condvar, Mutex};

#[cfg(loom)]
mod loom_mutex {
	//! Wrapper types for loom's Mutex and Condvar to match parking_lot's API.

	use loom::sync::{Condvar as LoomCondvar, Mutex as LoomMutex, MutexGuard as LoomGuard};

	/// A wrapper around loom's Mutex that provides a parking_lot-compatible API.
	pub struct Mutex<T>(LoomMutex<T>);

	impl<T> Mutex<T> {
		/// Creates a new Mutex.
		pub fn new(value: T) -> Self {
			Mutex(LoomMutex::new(value))
		}

		/// Acquires the mutex, blocking until available.
		pub fn lock(&self) -> MutexGuard<'_, T> {
			MutexGuard(Some(self.0.lock().unwrap()))
		}
	}

	/// Wrapper around loom's guard. The slot is only empty while a
	/// [`Condvar::wait`] has lent the guard to loom.
	pub struct MutexGuard<'a, T>(Option<LoomGuard<'a, T>>);

	impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
		type Target = T;
		fn deref(&self) -> &T {
			self.0.as_ref().unwrap()
		}
	}

	impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
		fn deref_mut(&mut self) -> &mut T {
			self.0.as_mut().unwrap()
		}
	}

	/// A wrapper around loom's Condvar that waits on a borrowed guard.
	pub struct Condvar(LoomCondvar);

	impl Condvar {
		/// Creates a new Condvar.
		pub fn new() -> Self {
			Condvar(LoomCondvar::new())
		}

		/// Blocks until notified, releasing the mutex while parked.
		pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
			let inner = guard.0.take().unwrap();
			guard.0 = Some(self.0.wait(inner).unwrap());
		}

		/// Wakes one parked thread.
		pub fn notify_one(&self) -> bool {
			self.0.notify_one();
			true
		}
	}

	impl Default for Condvar {
		fn default() -> Self {
			Condvar::new()
		}
	}
}

#[cfg(loom)]
pub use loom_mutex::{Condvar, Mutex};

// ===========================================================================
// RawMutex
// ===========================================================================

// The writer gate has to stay locked between two separate calls
// (`write_lock` / `write_unlock`), so it cannot be a guard-based mutex.

#[cfg(not(loom))]
mod parking_raw {
	use parking_lot::lock_api::RawMutex as _;

	/// A guard-less mutex that may be released from a different call frame
	/// than the one that acquired it.
	pub struct RawMutex(parking_lot::RawMutex);

	impl RawMutex {
		/// Creates a new, unlocked RawMutex.
		pub const fn new() -> Self {
			RawMutex(parking_lot::RawMutex::INIT)
		}

		/// Acquires the mutex, parking the thread until available.
		#[inline]
		pub fn lock(&self) {
			self.0.lock();
		}

		/// Attempts to acquire the mutex without blocking.
		#[inline]
		pub fn try_lock(&self) -> bool {
			self.0.try_lock()
		}

		/// Releases the mutex.
		///
		/// # Safety
		///
		/// The mutex must be held, acquired through [`RawMutex::lock`] or a
		/// successful [`RawMutex::try_lock`].
		#[inline]
		pub unsafe fn unlock(&self) {
			self.0.unlock();
		}
	}
}

#[cfg(not(loom))]
pub use parking_raw::RawMutex;

#[cfg(loom)]
mod loom_raw {
	//! A guard-less mutex built from loom's Mutex and Condvar.

	use loom::sync::{Condvar, Mutex};

	pub struct RawMutex {
		locked: Mutex<bool>,
		released: Condvar,
	}

	impl RawMutex {
		pub fn new() -> Self {
			RawMutex {
				locked: Mutex::new(false),
				released: Condvar::new(),
			}
		}

		pub fn lock(&self) {
			let mut locked = self.locked.lock().unwrap();
			while *locked {
				locked = self.released.wait(locked).unwrap();
			}
			*locked = true;
		}

		pub fn try_lock(&self) -> bool {
			let mut locked = self.locked.lock().unwrap();
			if *locked {
				return false;
			}
			*locked = true;
			true
		}

		pub unsafe fn unlock(&self) {
			let mut locked = self.locked.lock().unwrap();
			*locked = false;
			self.released.notify_one();
		}
	}
}

#[cfg(loom)]
pub use loom_raw::RawMutex;

// ===========================================================================
// UnsafeCell
// ===========================================================================

// UnsafeCell is from std in both cases, but loom provides its own UnsafeCell
// that integrates with loom's model checker. We need a wrapper for loom
// because loom's UnsafeCell::get() returns ConstPtr<T> instead of *const T.

#[cfg(not(loom))]
pub use std::cell::UnsafeCell;

#[cfg(loom)]
mod loom_unsafe_cell {
	//! Wrapper around loom's UnsafeCell to provide std-compatible API.

	use loom::cell::UnsafeCell as LoomUnsafeCell;

	/// A wrapper around loom's UnsafeCell that provides std's API.
	pub struct UnsafeCell<T>(LoomUnsafeCell<T>);

	impl<T> UnsafeCell<T> {
		/// Creates a new UnsafeCell.
		pub fn new(value: T) -> Self {
			UnsafeCell(LoomUnsafeCell::new(value))
		}

		/// Gets a raw pointer to the underlying data.
		///
		/// # Safety Note
		/// Under loom, this extracts the raw pointer from loom's tracked ConstPtr.
		/// The caller must ensure proper synchronization.
		pub fn get(&self) -> *mut T {
			// SAFETY: We're converting loom's tracked pointer to a raw pointer.
			// The caller is responsible for ensuring this is used correctly.
			unsafe { self.0.get().deref() as *const T as *mut T }
		}

		/// Gets a mutable reference through exclusive access.
		pub fn get_mut(&mut self) -> &mut T {
			// SAFETY: `&mut self` rules out any other access.
			unsafe { &mut *self.get() }
		}

		/// Unwraps the value.
		pub fn into_inner(self) -> T {
			self.0.into_inner()
		}
	}
}

#[cfg(loom)]
pub use loom_unsafe_cell::UnsafeCell;
