//! # rwgate: Writer-Preferring Shared/Exclusive Locks
//!
//! This crate provides hand-built synchronization primitives that extend the plain
//! mutex with shared/exclusive ("read/write") semantics, in a single-acquisition and
//! a reentrant, upgradeable form.
//!
//! ## Design Overview
//!
//! ### Key Concepts
//!
//! **Writer Gate**: Every lock has a gate mutex. Writers hold it for their whole
//! critical section; readers hold it only long enough to register. A writer that is
//! waiting for readers to leave therefore already blocks newly arriving readers,
//! which keeps writers from starving under continuous read load.
//!
//! **Monitor**: The reader count and the writer-waiting flag live behind one mutex,
//! and the waiting writer parks on a condition variable tied to that same mutex. The
//! check and the wait cannot be separated by a reader leaving, so no wakeup is lost.
//!
//! **Per-thread depths**: The reentrant lock records, per thread and per lock, how
//! many read and write sections the thread has open. Only the outermost section of
//! each kind touches the underlying lock.
//!
//! ### Components
//!
//! ```text
//!          ┌──────────────────────────────┐        ┌─────────────────────┐
//!          │ ReentrantSharedExclusiveLock │        │      Latch<T>       │
//!          │   (per-thread depths)        │        │ (owns T, RAII guard)│
//!          └──────────────┬───────────────┘        └──────────┬──────────┘
//!                         │                                   │
//!                         └─────────────────┬─────────────────┘
//!                                           ▼
//!                             ┌───────────────────────────┐
//!                             │    SharedExclusiveLock    │
//!                             │  writer gate + monitor    │
//!                             └───────────────────────────┘
//! ```
//!
//! [`Validity`] is independent of the locks: it lets objects that refer to an owner
//! detect that the owner has been dropped.
//!
//! ## Basic Usage
//!
//! ```
//! use rwgate::{Latch, ReentrantSharedExclusiveLock};
//!
//! // Data-owning latch
//! let latch = Latch::new(Vec::new());
//! latch.exclusive().push(1);
//! assert_eq!(latch.shared().len(), 1);
//!
//! // Reentrant lock with upgrade
//! let lock = ReentrantSharedExclusiveLock::new();
//! let _read = lock.read();
//! {
//!     let _nested = lock.read();
//!     let _write = lock.write();
//!     assert!(lock.is_locked_exclusive());
//! }
//! assert_eq!(lock.reader_count(), 1);
//! ```
//!
//! ## Misuse
//!
//! Releasing access that is not held is a programmer error. The unlock operations
//! panic instead of continuing with corrupted state; see [`error`].

pub mod error;
pub mod latch;
pub mod lock;
pub mod reentrant;
mod sync;
pub mod validity;

pub use error::{Error, Result};
pub use latch::{ExclusiveGuard, Latch, SharedGuard};
pub use lock::{ReadGuard, SharedExclusiveLock, WriteGuard};
pub use reentrant::{ReentrantReadGuard, ReentrantSharedExclusiveLock, ReentrantWriteGuard};
pub use validity::{Validity, ValidityGuard, ValidityHandle};
