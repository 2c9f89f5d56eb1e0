//! A data-owning latch built on the writer-preferring [`SharedExclusiveLock`].
//!
//! [`Latch<T>`] pairs a value with a lock so that the only way to reach the value
//! is through a guard: [`SharedGuard`] derefs to `&T`, [`ExclusiveGuard`] derefs to
//! `&mut T`. Both release their access when dropped, including during unwinding.

use crate::error;
use crate::lock::{ReadGuard, SharedExclusiveLock, WriteGuard};
use crate::sync::UnsafeCell;

/// A latch that provides shared or exclusive access to the underlying data,
/// preferring writers over newly arriving readers.
///
/// # Examples
///
/// ```
/// use rwgate::Latch;
///
/// let latch = Latch::new(vec![1, 2, 3]);
///
/// {
///     let a = latch.shared();
///     let b = latch.shared();
///     assert_eq!(a.len(), b.len());
/// }
///
/// latch.exclusive().push(4);
/// assert_eq!(latch.with(|v| v.iter().sum::<i32>()), 10);
/// ```
pub struct Latch<T> {
	lock: SharedExclusiveLock,
	data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Latch<T> {}
unsafe impl<T: Send + Sync> Sync for Latch<T> {}

impl<T> Latch<T> {
	/// Creates a new instance of a `Latch<T>` which is unlocked.
	#[inline]
	pub fn new(data: T) -> Latch<T> {
		Latch {
			lock: SharedExclusiveLock::new(),
			data: UnsafeCell::new(data),
		}
	}

	/// Locks this `Latch` with exclusive write access, blocking the thread until it can be
	/// acquired.
	///
	/// Returns an RAII guard which will release the exclusive access when dropped
	#[inline]
	pub fn exclusive(&self) -> ExclusiveGuard<'_, T> {
		let guard = self.lock.write();
		ExclusiveGuard {
			latch: self,
			guard,
			data: self.data.get(),
		}
	}

	/// Tries to lock this `Latch` with exclusive write access without blocking.
	///
	/// Returns [`error::Error::WouldBlock`] if any reader or writer is present.
	#[inline]
	pub fn try_exclusive(&self) -> error::Result<ExclusiveGuard<'_, T>> {
		let guard = self.lock.try_write()?;
		Ok(ExclusiveGuard {
			latch: self,
			guard,
			data: self.data.get(),
		})
	}

	/// Locks this `Latch` with shared read access, blocking the thread until it can be
	/// acquired.
	///
	/// Returns an RAII guard which will release the shared access when dropped
	#[inline]
	pub fn shared(&self) -> SharedGuard<'_, T> {
		let guard = self.lock.read();
		SharedGuard {
			latch: self,
			guard,
			data: self.data.get(),
		}
	}

	/// Runs `f` with shared access to the data.
	pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> R {
		let guard = self.shared();
		f(&guard)
	}

	/// Runs `f` with exclusive access to the data.
	pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
		let mut guard = self.exclusive();
		f(&mut guard)
	}

	/// Returns the lock guarding this latch, for inspecting its state.
	pub fn raw(&self) -> &SharedExclusiveLock {
		&self.lock
	}

	/// Returns a mutable reference to the data. No locking is needed because the
	/// borrow is exclusive.
	#[inline]
	pub fn get_mut(&mut self) -> &mut T {
		self.data.get_mut()
	}

	/// Consumes the latch, returning the underlying data.
	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T> std::convert::AsMut<T> for Latch<T> {
	#[inline]
	fn as_mut(&mut self) -> &mut T {
		self.get_mut()
	}
}

impl<T: Default> Default for Latch<T> {
	fn default() -> Self {
		Latch::new(T::default())
	}
}

impl<T> From<T> for Latch<T> {
	fn from(data: T) -> Self {
		Latch::new(data)
	}
}

impl<T: std::fmt::Debug> std::fmt::Debug for Latch<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.lock.try_write() {
			Ok(_guard) => {
				// SAFETY: exclusive access is held for the duration of the borrow.
				let data = unsafe { &*self.data.get() };
				f.debug_struct("Latch").field("data", data).finish()
			}
			Err(_) => f.debug_struct("Latch").field("data", &format_args!("<locked>")).finish(),
		}
	}
}

/// RAII structure used to release the shared read access of a latch when dropped.
#[must_use = "if unused the latch will immediately unlock"]
pub struct SharedGuard<'a, T> {
	latch: &'a Latch<T>,
	#[allow(dead_code)]
	guard: ReadGuard<'a>,
	data: *const T,
}

unsafe impl<'a, T: Sync> Sync for SharedGuard<'a, T> {}

impl<'a, T> SharedGuard<'a, T> {
	/// Returns the `Latch` this guard belongs to.
	pub fn latch(&self) -> &'a Latch<T> {
		self.latch
	}
}

impl<'a, T> std::ops::Deref for SharedGuard<'a, T> {
	type Target = T;

	#[inline]
	fn deref(&self) -> &T {
		// SAFETY: shared access is held for the guard's lifetime, excluding writers.
		unsafe { &*self.data }
	}
}

/// RAII structure used to release the exclusive write access of a latch when dropped.
#[must_use = "if unused the latch will immediately unlock"]
pub struct ExclusiveGuard<'a, T> {
	latch: &'a Latch<T>,
	guard: WriteGuard<'a>,
	data: *mut T,
}

unsafe impl<'a, T: Sync> Sync for ExclusiveGuard<'a, T> {}

impl<'a, T> ExclusiveGuard<'a, T> {
	/// Returns the `Latch` this guard belongs to.
	pub fn latch(&self) -> &'a Latch<T> {
		self.latch
	}

	/// Atomically converts exclusive access into shared access, so no other
	/// writer can modify the data in between.
	#[inline]
	pub fn downgrade(self) -> SharedGuard<'a, T> {
		let ExclusiveGuard {
			latch,
			guard,
			data,
		} = self;
		SharedGuard {
			latch,
			guard: guard.downgrade(),
			data,
		}
	}
}

impl<'a, T> std::ops::Deref for ExclusiveGuard<'a, T> {
	type Target = T;

	#[inline]
	fn deref(&self) -> &T {
		// SAFETY: exclusive access is held for the guard's lifetime.
		unsafe { &*self.data }
	}
}

impl<'a, T> std::ops::DerefMut for ExclusiveGuard<'a, T> {
	#[inline]
	fn deref_mut(&mut self) -> &mut T {
		// SAFETY: exclusive access is held for the guard's lifetime.
		unsafe { &mut *self.data }
	}
}

impl<'a, T> std::convert::AsMut<T> for ExclusiveGuard<'a, T> {
	#[inline]
	fn as_mut(&mut self) -> &mut T {
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Error;

	#[test]
	fn shared_and_exclusive_access() {
		let latch = Latch::new(0i32);

		{
			let a = latch.shared();
			let b = latch.shared();
			assert_eq!(*a, *b);
			assert_eq!(latch.raw().reader_count(), 2);
		}

		{
			let mut guard = latch.exclusive();
			*guard += 5;
			assert!(guard.latch().raw().is_locked_exclusive());
		}

		assert_eq!(*latch.shared(), 5);
	}

	#[test]
	fn try_exclusive_respects_readers() {
		let latch = Latch::new(String::from("data"));
		let reader = latch.shared();
		assert!(matches!(latch.try_exclusive(), Err(Error::WouldBlock)));
		drop(reader);

		latch.try_exclusive().unwrap().push('!');
		assert_eq!(latch.with(|s| s.clone()), "data!");
	}

	#[test]
	fn downgrade_keeps_written_value() {
		let latch = Latch::new(1u32);
		let mut guard = latch.exclusive();
		*guard = 2;
		let shared = guard.downgrade();
		assert_eq!(*shared, 2);
		assert_eq!(latch.raw().reader_count(), 1);
		assert!(!latch.raw().is_locked_exclusive());
		let other = latch.shared();
		assert_eq!(*other, 2);
	}

	#[test]
	fn closures() {
		let latch = Latch::new(vec![1, 2, 3]);
		let len = latch.with_mut(|v| {
			v.push(4);
			v.len()
		});
		assert_eq!(len, 4);
		assert_eq!(latch.with(|v| v.iter().sum::<i32>()), 10);
	}

	#[test]
	fn owned_access() {
		let mut latch: Latch<Vec<u8>> = Latch::default();
		latch.get_mut().push(1);
		latch.as_mut().push(2);
		let mut guard = latch.exclusive();
		guard.as_mut().push(3);
		drop(guard);
		assert_eq!(latch.into_inner(), vec![1, 2, 3]);
	}

	#[test]
	fn debug_when_locked() {
		let latch = Latch::from(7u32);
		assert_eq!(format!("{:?}", latch), "Latch { data: 7 }");
		let _guard = latch.shared();
		assert_eq!(format!("{:?}", latch), "Latch { data: <locked> }");
	}
}
