//! # Error Types for rwgate
//!
//! The locks in this crate have a narrow failure surface. Acquiring
//! a lock never fails: the blocking operations wait until they succeed. The only
//! conditions that exist are:
//!
//! - A non-blocking `try_*` acquisition that could not proceed immediately.
//!   This is an ordinary runtime outcome and is returned as [`Error::WouldBlock`].
//! - Releasing access the caller does not hold. This is a programmer error. The
//!   unlock operations fail fast by panicking with the matching variant's message
//!   instead of continuing with corrupted counters.
//!
//! ## Error Flow
//!
//! ```text
//! try_write_lock()
//!      │
//!      ├── gate free, no readers ──► Ok(())       (exclusive access held)
//!      │
//!      └── otherwise ──────────────► Err(WouldBlock) (nothing held)
//!
//! read_unlock() / write_unlock()
//!      │
//!      ├── access held ────────────► one level released
//!      │
//!      └── not held ───────────────► panic!("lock misuse: ...")
//! ```

use thiserror::Error;

/// Errors reported by the locks in this crate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// The lock could not be acquired without blocking.
	///
	/// Returned by the `try_*` family. Nothing is held when this is returned.
	#[error("lock is not available without blocking")]
	WouldBlock,

	/// Shared access was released by a caller that does not hold it.
	#[error("shared access released without being held")]
	SharedNotHeld,

	/// Exclusive access was released by a caller that does not hold it.
	#[error("exclusive access released without being held")]
	ExclusiveNotHeld,
}

/// A Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Aborts the current operation because the lock was used incorrectly.
///
/// Reported at the caller's location so the offending unlock is easy to find.
#[cold]
#[track_caller]
pub(crate) fn misuse(err: Error) -> ! {
	panic!("lock misuse: {err}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn messages() {
		assert_eq!(Error::WouldBlock.to_string(), "lock is not available without blocking");
		assert_eq!(Error::SharedNotHeld.to_string(), "shared access released without being held");
		assert_eq!(
			Error::ExclusiveNotHeld.to_string(),
			"exclusive access released without being held"
		);
	}

	#[test]
	#[should_panic(expected = "lock misuse: shared access released without being held")]
	fn misuse_panics_with_message() {
		misuse(Error::SharedNotHeld);
	}
}
