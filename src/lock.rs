//! Implementation of a writer-preferring shared/exclusive lock.
//!
//! The lock is built from two pieces:
//!
//! - A **writer gate**, a plain mutex. Writers hold it for their entire critical
//!   section. Readers pass through it only long enough to register themselves.
//! - A **monitor**, a mutex protecting the reader count and the writer-waiting
//!   flag, paired with a condition variable on which a writer parks while
//!   readers drain.
//!
//! ```text
//!            read_lock                        write_lock
//!                │                                │
//!                ▼                                ▼
//!        ┌──────────────┐                 ┌──────────────┐
//!        │ writer gate  │ <── transient   │ writer gate  │ <── held until write_unlock
//!        └──────┬───────┘                 └──────┬───────┘
//!               ▼                                ▼
//!        ┌──────────────┐                 ┌──────────────┐
//!        │   monitor    │  readers += 1   │   monitor    │  while readers > 0: wait
//!        └──────────────┘                 └──────────────┘
//! ```
//!
//! Because a writer keeps the gate while it waits, readers that arrive after it
//! cannot register until it is done. Readers already inside are unaffected and
//! the writer proceeds once the last of them leaves, which prevents writer
//! starvation under continuous read load.
//!
//! The reader count is only checked and waited on while the monitor is held,
//! and the last reader notifies while holding it as well, so a wakeup cannot be
//! lost between the writer's check and its park.

use tracing::trace;

use crate::error::{self, misuse, Error};
use crate::sync::{Condvar, Mutex, RawMutex};

/// Bookkeeping protected by the monitor mutex.
#[derive(Debug, Default)]
struct Monitor {
	/// Readers currently holding shared access.
	readers: usize,
	/// A writer owns the gate and is parked until `readers` reaches zero.
	writer_waiting: bool,
	/// A writer holds exclusive access.
	exclusive: bool,
}

/// A writer-preferring shared/exclusive lock that does not own any data.
///
/// Any number of threads may hold shared access at once. Exclusive access is
/// held by at most one thread and never overlaps with shared access. Once a
/// writer has called [`write_lock`](Self::write_lock), readers arriving later
/// wait until that writer calls [`write_unlock`](Self::write_unlock).
///
/// The lock offers two styles of use: explicit `*_lock`/`*_unlock` pairs, and
/// RAII guards returned by [`read`](Self::read) and [`write`](Self::write)
/// which release on drop. Prefer the guards.
///
/// This lock is not reentrant. A thread holding shared access that calls
/// `write_lock` deadlocks against itself; use
/// [`ReentrantSharedExclusiveLock`](crate::ReentrantSharedExclusiveLock) for
/// nested use and upgrades.
///
/// # Examples
///
/// ```
/// use rwgate::SharedExclusiveLock;
///
/// let lock = SharedExclusiveLock::new();
///
/// {
///     let _r1 = lock.read();
///     let _r2 = lock.read();
///     assert_eq!(lock.reader_count(), 2);
///     assert!(lock.try_write().is_err());
/// }
///
/// let _w = lock.write();
/// assert!(lock.is_locked_exclusive());
/// ```
pub struct SharedExclusiveLock {
	gate: RawMutex,
	monitor: Mutex<Monitor>,
	drained: Condvar,
}

impl SharedExclusiveLock {
	/// Creates a new, unlocked `SharedExclusiveLock`.
	pub fn new() -> SharedExclusiveLock {
		SharedExclusiveLock {
			gate: RawMutex::new(),
			monitor: Mutex::new(Monitor::default()),
			drained: Condvar::new(),
		}
	}

	/// Acquires shared access, blocking while a writer holds or waits for the lock.
	pub fn read_lock(&self) {
		self.gate.lock();
		self.monitor.lock().readers += 1;
		// SAFETY: the gate was acquired above by this call.
		unsafe { self.gate.unlock() };
	}

	/// Releases shared access, waking a waiting writer if this was the last reader.
	///
	/// # Panics
	///
	/// Panics if no shared access is currently held.
	#[track_caller]
	pub fn read_unlock(&self) {
		let mut monitor = self.monitor.lock();
		if monitor.readers == 0 {
			drop(monitor);
			misuse(Error::SharedNotHeld);
		}
		monitor.readers -= 1;
		let wake = monitor.readers == 0 && monitor.writer_waiting;
		if wake {
			self.drained.notify_one();
		}
		drop(monitor);
		if wake {
			trace!("last reader released, woke writer");
		}
	}

	/// Acquires exclusive access, blocking until other writers are gone and all
	/// current readers have released.
	pub fn write_lock(&self) {
		self.gate.lock();
		let mut monitor = self.monitor.lock();
		monitor.writer_waiting = true;
		let readers = monitor.readers;
		while monitor.readers > 0 {
			self.drained.wait(&mut monitor);
		}
		monitor.writer_waiting = false;
		monitor.exclusive = true;
		drop(monitor);
		if readers > 0 {
			trace!(readers, "writer waited for readers to drain");
		}
	}

	/// Attempts to acquire exclusive access without blocking.
	///
	/// Succeeds only if no writer holds the gate and no reader holds shared
	/// access. On failure nothing is held.
	pub fn try_write_lock(&self) -> error::Result<()> {
		if !self.gate.try_lock() {
			return Err(Error::WouldBlock);
		}
		let mut monitor = self.monitor.lock();
		if monitor.readers > 0 {
			drop(monitor);
			// SAFETY: the gate was acquired above by this call.
			unsafe { self.gate.unlock() };
			return Err(Error::WouldBlock);
		}
		monitor.exclusive = true;
		Ok(())
	}

	/// Releases exclusive access.
	///
	/// # Panics
	///
	/// Panics if exclusive access is not currently held.
	#[track_caller]
	pub fn write_unlock(&self) {
		let mut monitor = self.monitor.lock();
		if !monitor.exclusive {
			drop(monitor);
			misuse(Error::ExclusiveNotHeld);
		}
		monitor.exclusive = false;
		drop(monitor);
		// SAFETY: `exclusive` is only set while the gate is held by a writer.
		unsafe { self.gate.unlock() };
	}

	/// Converts exclusive access held by the caller into shared access.
	///
	/// The reader is registered before the writer gate opens, so no other writer
	/// can get in between.
	///
	/// # Panics
	///
	/// Panics if exclusive access is not currently held.
	#[track_caller]
	pub fn downgrade(&self) {
		let mut monitor = self.monitor.lock();
		if !monitor.exclusive {
			drop(monitor);
			misuse(Error::ExclusiveNotHeld);
		}
		monitor.exclusive = false;
		monitor.readers += 1;
		drop(monitor);
		// SAFETY: `exclusive` is only set while the gate is held by a writer.
		unsafe { self.gate.unlock() };
	}

	/// Acquires shared access, returning a guard that releases it when dropped.
	#[inline]
	pub fn read(&self) -> ReadGuard<'_> {
		self.read_lock();
		ReadGuard {
			lock: self,
		}
	}

	/// Acquires exclusive access, returning a guard that releases it when dropped.
	#[inline]
	pub fn write(&self) -> WriteGuard<'_> {
		self.write_lock();
		WriteGuard {
			lock: self,
		}
	}

	/// Attempts to acquire exclusive access without blocking.
	///
	/// Returns [`Error::WouldBlock`] if readers or a writer are present.
	#[inline]
	pub fn try_write(&self) -> error::Result<WriteGuard<'_>> {
		self.try_write_lock()?;
		Ok(WriteGuard {
			lock: self,
		})
	}

	/// Returns the number of readers currently holding shared access.
	///
	/// The value is a snapshot and may be stale by the time it is inspected.
	pub fn reader_count(&self) -> usize {
		self.monitor.lock().readers
	}

	/// Returns `true` if a writer currently holds exclusive access.
	///
	/// The value is a snapshot and may be stale by the time it is inspected.
	pub fn is_locked_exclusive(&self) -> bool {
		self.monitor.lock().exclusive
	}

	/// Returns `true` if a writer holds the gate and is waiting for readers to leave.
	///
	/// The value is a snapshot and may be stale by the time it is inspected.
	pub fn is_writer_waiting(&self) -> bool {
		self.monitor.lock().writer_waiting
	}
}

impl Default for SharedExclusiveLock {
	fn default() -> Self {
		SharedExclusiveLock::new()
	}
}

impl std::fmt::Debug for SharedExclusiveLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let monitor = self.monitor.lock();
		f.debug_struct("SharedExclusiveLock")
			.field("readers", &monitor.readers)
			.field("writer_waiting", &monitor.writer_waiting)
			.field("exclusive", &monitor.exclusive)
			.finish()
	}
}

/// RAII structure used to release shared access of a lock when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReadGuard<'a> {
	lock: &'a SharedExclusiveLock,
}

impl<'a> ReadGuard<'a> {
	/// Returns a reference to the lock this guard belongs to.
	pub fn lock(&self) -> &'a SharedExclusiveLock {
		self.lock
	}
}

impl Drop for ReadGuard<'_> {
	#[inline]
	fn drop(&mut self) {
		self.lock.read_unlock();
	}
}

/// RAII structure used to release exclusive access of a lock when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct WriteGuard<'a> {
	lock: &'a SharedExclusiveLock,
}

impl<'a> WriteGuard<'a> {
	/// Returns a reference to the lock this guard belongs to.
	pub fn lock(&self) -> &'a SharedExclusiveLock {
		self.lock
	}

	/// Atomically converts this exclusive guard into a shared one.
	pub fn downgrade(self) -> ReadGuard<'a> {
		let lock = self.lock;
		std::mem::forget(self);
		lock.downgrade();
		ReadGuard {
			lock,
		}
	}
}

impl Drop for WriteGuard<'_> {
	#[inline]
	fn drop(&mut self) {
		self.lock.write_unlock();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::mpsc::channel;
	use std::sync::Arc;
	use std::thread;
	use std::time::Duration;

	#[test]
	fn shared_then_exclusive() {
		let lock = SharedExclusiveLock::new();

		lock.read_lock();
		lock.read_lock();
		assert_eq!(lock.reader_count(), 2);
		assert!(!lock.is_locked_exclusive());

		lock.read_unlock();
		lock.read_unlock();
		assert_eq!(lock.reader_count(), 0);

		lock.write_lock();
		assert!(lock.is_locked_exclusive());
		assert_eq!(lock.reader_count(), 0);
		lock.write_unlock();
		assert!(!lock.is_locked_exclusive());
	}

	#[test]
	fn try_write_fails_while_reader_present() {
		let lock = SharedExclusiveLock::new();
		let reader = lock.read();

		assert_eq!(lock.try_write_lock(), Err(Error::WouldBlock));
		// The failed attempt must leave the gate open for readers.
		let second = lock.read();
		assert_eq!(lock.reader_count(), 2);

		drop(second);
		drop(reader);
		assert!(lock.try_write().is_ok());
		assert!(!lock.is_locked_exclusive());
	}

	#[test]
	fn try_write_fails_while_writer_present() {
		let lock = SharedExclusiveLock::new();
		let writer = lock.write();
		assert!(matches!(lock.try_write(), Err(Error::WouldBlock)));
		drop(writer);

		let writer = lock.try_write().unwrap();
		assert!(writer.lock().is_locked_exclusive());
	}

	#[test]
	fn guards_release_on_drop() {
		let lock = SharedExclusiveLock::new();
		{
			let guard = lock.read();
			assert_eq!(guard.lock().reader_count(), 1);
		}
		assert_eq!(lock.reader_count(), 0);
		{
			let _guard = lock.write();
			assert!(lock.is_locked_exclusive());
		}
		assert!(!lock.is_locked_exclusive());
	}

	#[test]
	fn guard_releases_on_panic() {
		let lock = Arc::new(SharedExclusiveLock::new());
		let lock_clone = Arc::clone(&lock);
		let result = thread::spawn(move || {
			let _guard = lock_clone.write();
			panic!("boom");
		})
		.join();
		assert!(result.is_err());
		assert!(!lock.is_locked_exclusive());
		assert!(lock.try_write().is_ok());
	}

	#[test]
	fn writer_waits_for_reader_to_drain() {
		let lock = Arc::new(SharedExclusiveLock::new());
		lock.read_lock();

		let (tx, rx) = channel();
		let lock_clone = Arc::clone(&lock);
		let handle = thread::spawn(move || {
			tx.send("started").unwrap();
			lock_clone.write_lock();
			tx.send("acquired").unwrap();
			lock_clone.write_unlock();
		});

		assert_eq!(rx.recv().unwrap(), "started");
		assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

		lock.read_unlock();
		assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "acquired");
		handle.join().unwrap();
	}

	#[test]
	fn downgrade_keeps_queued_writer_out() {
		let lock = Arc::new(SharedExclusiveLock::new());
		let writer = lock.write();

		let (tx, rx) = channel();
		let lock_clone = Arc::clone(&lock);
		let handle = thread::spawn(move || {
			tx.send("queued").unwrap();
			let _w = lock_clone.write();
			tx.send("acquired").unwrap();
		});
		assert_eq!(rx.recv().unwrap(), "queued");

		let reader = writer.downgrade();
		assert_eq!(lock.reader_count(), 1);
		assert!(!lock.is_locked_exclusive());
		assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

		drop(reader);
		assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "acquired");
		handle.join().unwrap();
	}

	#[test]
	fn waiting_writer_is_visible() {
		let lock = Arc::new(SharedExclusiveLock::new());
		let reader = lock.read();

		let lock_clone = Arc::clone(&lock);
		let handle = thread::spawn(move || {
			let _w = lock_clone.write();
		});

		while !lock.is_writer_waiting() {
			thread::yield_now();
		}
		drop(reader);
		handle.join().unwrap();
		assert!(!lock.is_writer_waiting());
	}

	#[test]
	#[should_panic(expected = "exclusive access released without being held")]
	fn downgrade_without_write_panics() {
		let lock = SharedExclusiveLock::new();
		lock.downgrade();
	}

	#[test]
	#[should_panic(expected = "shared access released without being held")]
	fn read_unlock_without_lock_panics() {
		let lock = SharedExclusiveLock::new();
		lock.read_unlock();
	}

	#[test]
	#[should_panic(expected = "exclusive access released without being held")]
	fn write_unlock_without_lock_panics() {
		let lock = SharedExclusiveLock::new();
		lock.write_unlock();
	}

	#[test]
	fn misuse_leaves_state_intact() {
		let lock = Arc::new(SharedExclusiveLock::new());
		let lock_clone = Arc::clone(&lock);
		let result = thread::spawn(move || lock_clone.read_unlock()).join();
		assert!(result.is_err());

		// Still usable afterwards.
		let _r = lock.read();
		assert_eq!(lock.reader_count(), 1);
	}

	#[test]
	fn debug_shows_state() {
		let lock = SharedExclusiveLock::default();
		let _r = lock.read();
		let out = format!("{:?}", lock);
		assert!(out.contains("readers: 1"), "{}", out);
		assert!(out.contains("exclusive: false"), "{}", out);
	}
}
