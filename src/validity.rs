//! Validity tracking between an owner and its dependents.
//!
//! An object that other objects refer to without owning it embeds a
//! [`Validity`]. Each dependent keeps a [`ValidityHandle`] obtained from it. When
//! the owner is dropped the shared flag is cleared, and dependents find out the
//! next time they look:
//!
//! ```text
//!   owner ── Validity ──┐
//!                       ├──► Arc<ReentrantMutex<Cell<bool>>>
//!   dependent ── Handle ┘
//! ```
//!
//! The flag sits behind a reentrant mutex. A dependent that holds the handle's
//! lock keeps the owner's drop from completing until it is done, so an owner
//! cannot disappear half-way through a dependent's critical section. Because the
//! mutex is reentrant, a thread that holds a handle lock may still drop the owner
//! itself.
//!
//! # Examples
//!
//! ```
//! use rwgate::Validity;
//!
//! let owner = Validity::new();
//! let handle = owner.handle();
//! assert!(handle.is_valid());
//!
//! drop(owner);
//! assert!(!handle.is_valid());
//! ```

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

type Shared = Arc<ReentrantMutex<Cell<bool>>>;

/// The owner's side of a validity link. Dropping it invalidates every handle.
pub struct Validity {
	shared: Shared,
}

impl Validity {
	/// Creates a new, valid owner with no handles.
	pub fn new() -> Validity {
		Validity {
			shared: Arc::new(ReentrantMutex::new(Cell::new(true))),
		}
	}

	/// Creates a handle for a dependent object.
	pub fn handle(&self) -> ValidityHandle {
		ValidityHandle {
			shared: Arc::clone(&self.shared),
		}
	}

	/// Locks the shared state, blocking dependents until the guard is dropped.
	pub fn lock(&self) -> ValidityGuard<'_> {
		ValidityGuard {
			guard: self.shared.lock(),
		}
	}

	/// Returns the number of handles currently alive.
	pub fn handle_count(&self) -> usize {
		Arc::strong_count(&self.shared) - 1
	}
}

impl Default for Validity {
	fn default() -> Self {
		Validity::new()
	}
}

impl Drop for Validity {
	fn drop(&mut self) {
		let guard = self.shared.lock();
		guard.set(false);
		drop(guard);
		debug!(handles = Arc::strong_count(&self.shared) - 1, "owner dropped, handles invalidated");
	}
}

impl std::fmt::Debug for Validity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Validity").field("handles", &self.handle_count()).finish()
	}
}

/// A dependent's side of a validity link.
///
/// Cloning a handle produces another handle to the same owner.
#[derive(Clone)]
pub struct ValidityHandle {
	shared: Shared,
}

impl ValidityHandle {
	/// Locks the shared state, blocking while the owner is being dropped or
	/// another thread holds the lock.
	///
	/// While the returned guard is held the owner cannot finish dropping, so
	/// [`ValidityGuard::is_valid`] stays accurate for the guard's lifetime
	/// (unless this same thread drops the owner).
	pub fn lock(&self) -> ValidityGuard<'_> {
		ValidityGuard {
			guard: self.shared.lock(),
		}
	}

	/// Attempts to lock the shared state without blocking.
	pub fn try_lock(&self) -> Option<ValidityGuard<'_>> {
		self.shared.try_lock().map(|guard| ValidityGuard {
			guard,
		})
	}

	/// Returns whether the owner is still alive.
	///
	/// This is a snapshot; use [`lock`](Self::lock) to keep the answer stable.
	pub fn is_valid(&self) -> bool {
		self.lock().is_valid()
	}
}

impl std::fmt::Debug for ValidityHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let valid = self.try_lock().map(|g| g.is_valid());
		f.debug_struct("ValidityHandle").field("valid", &valid).finish()
	}
}

/// RAII structure holding the validity lock.
#[must_use = "if unused the validity lock will immediately unlock"]
pub struct ValidityGuard<'a> {
	guard: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl ValidityGuard<'_> {
	/// Returns whether the owner is still alive.
	pub fn is_valid(&self) -> bool {
		self.guard.get()
	}
}
