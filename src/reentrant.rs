//! A reentrant, upgradeable wrapper around [`SharedExclusiveLock`].
//!
//! The lock records, for every thread currently inside it, two nesting depths:
//!
//! - `read`: nested `read_lock` calls not yet matched by `read_unlock`.
//! - `write`: nested `write_lock` calls not yet matched by `write_unlock`.
//!
//! Only transitions between zero and non-zero depths reach the underlying lock.
//! The table below shows when the wrapper forwards a call:
//!
//! ```text
//! call          depths before          forwarded to the base lock
//! ------------  ---------------------  ---------------------------------------
//! read_lock     write > 0              nothing (exclusive implies shared)
//!               read == 0              read_lock
//! read_unlock   write > 0              nothing
//!               read == 1              read_unlock
//! write_lock    write == 0, read > 0   read_unlock, then write_lock (upgrade)
//!               write == 0             write_lock
//! write_unlock  write == 1, read > 0   downgrade (exclusive becomes shared)
//!               write == 1             write_unlock
//! ```
//!
//! # Non-atomic upgrade
//!
//! An upgrade releases the thread's shared hold before queueing at the writer
//! gate. Another writer may get in first during that window, so data read under
//! the shared hold must be re-validated after the upgrade completes.
//!
//! The downgrade has no such window: the thread is registered as a reader
//! before the writer gate opens.
//!
//! # Nesting order
//!
//! A read section opened inside a write section does not touch the depths, so it
//! must be closed before the enclosing write section is. Closing it afterwards is
//! reported as an unbalanced `read_unlock`.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{self, misuse, Error};
use crate::lock::SharedExclusiveLock;
use crate::sync::Mutex;

/// Source of process-unique thread keys. Zero means "not assigned yet".
static NEXT_THREAD: AtomicUsize = AtomicUsize::new(1);

// `Cell<usize>` has no destructor, so the key stays readable while the
// thread's other thread-locals (possibly holding guards) are dropped.
#[cfg(not(loom))]
std::thread_local! {
	static THREAD_KEY: Cell<usize> = const { Cell::new(0) };
}

#[cfg(loom)]
loom::thread_local! {
	static THREAD_KEY: Cell<usize> = Cell::new(0);
}

/// Returns the calling thread's key, assigning one on first use.
fn thread_key() -> usize {
	THREAD_KEY.with(|key| {
		if key.get() == 0 {
			key.set(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
		}
		key.get()
	})
}

/// Nesting depths of one thread for one lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Depths {
	read: usize,
	write: usize,
}

impl Depths {
	fn is_idle(&self) -> bool {
		self.read == 0 && self.write == 0
	}
}

/// A writer-preferring shared/exclusive lock that the same thread may acquire
/// repeatedly, and upgrade from shared to exclusive access.
///
/// Nested acquisitions by one thread are counted and collapse into a single
/// acquisition on the underlying [`SharedExclusiveLock`]. A thread holding
/// exclusive access implicitly holds shared access. A thread holding shared
/// access may request exclusive access; when that write section unwinds the
/// thread is back to holding shared access.
///
/// Because the counters are per thread, the guards returned by this lock are
/// `!Send`, and the explicit unlock calls must be made on the thread that made
/// the matching lock call.
///
/// # Examples
///
/// ```
/// use rwgate::ReentrantSharedExclusiveLock;
///
/// let lock = ReentrantSharedExclusiveLock::new();
///
/// let read = lock.read();
/// let nested = lock.read();
/// assert_eq!(lock.reader_count(), 1);
///
/// {
///     // Upgrade while still inside two read sections.
///     let _write = lock.write();
///     assert!(lock.is_locked_exclusive());
///     assert_eq!(lock.reader_count(), 0);
/// }
///
/// // Downgraded back to shared access.
/// assert_eq!(lock.reader_count(), 1);
/// drop(nested);
/// drop(read);
/// assert_eq!(lock.reader_count(), 0);
/// ```
///
/// # Deadlocks
///
/// Reentrancy only covers the calling thread's own holds on this lock. Holding
/// shared access on two different reentrant locks and upgrading them in
/// conflicting orders from two threads can still deadlock.
pub struct ReentrantSharedExclusiveLock {
	/// Depths of every thread currently inside this lock, keyed by thread key.
	/// Only a handful of threads are inside at once in the common case.
	threads: Mutex<SmallVec<[(usize, Depths); 4]>>,
	lock: SharedExclusiveLock,
}

impl ReentrantSharedExclusiveLock {
	/// Creates a new, unlocked `ReentrantSharedExclusiveLock`.
	pub fn new() -> ReentrantSharedExclusiveLock {
		ReentrantSharedExclusiveLock {
			threads: Mutex::new(SmallVec::new()),
			lock: SharedExclusiveLock::new(),
		}
	}

	// The table is never held across a call into the base lock.

	fn depths(&self) -> Depths {
		let key = thread_key();
		self.threads
			.lock()
			.iter()
			.find(|(k, _)| *k == key)
			.map(|(_, depths)| *depths)
			.unwrap_or_default()
	}

	fn store(&self, depths: Depths) {
		let key = thread_key();
		let mut table = self.threads.lock();
		let slot = table.iter().position(|(k, _)| *k == key);
		match (slot, depths.is_idle()) {
			(Some(i), true) => {
				table.swap_remove(i);
			}
			(Some(i), false) => table[i].1 = depths,
			(None, true) => {}
			(None, false) => table.push((key, depths)),
		}
	}

	/// Acquires shared access for the calling thread.
	///
	/// Blocks only if the thread holds nothing on this lock yet and a writer
	/// holds or waits for it. Returns immediately if the thread already holds
	/// shared or exclusive access.
	pub fn read_lock(&self) {
		let mut depths = self.depths();
		if depths.write > 0 {
			return;
		}
		if depths.read == 0 {
			self.lock.read_lock();
		}
		depths.read += 1;
		self.store(depths);
	}

	/// Releases one level of shared access held by the calling thread.
	///
	/// Does nothing while the thread holds exclusive access.
	///
	/// # Panics
	///
	/// Panics if the calling thread holds neither shared nor exclusive access.
	#[track_caller]
	pub fn read_unlock(&self) {
		let mut depths = self.depths();
		if depths.write > 0 {
			return;
		}
		if depths.read == 0 {
			misuse(Error::SharedNotHeld);
		}
		if depths.read == 1 {
			self.lock.read_unlock();
		}
		depths.read -= 1;
		self.store(depths);
	}

	/// Acquires exclusive access for the calling thread.
	///
	/// If the thread holds shared access it is released first and the call then
	/// waits for exclusive access like any other writer. If the thread already
	/// holds exclusive access this only increments its depth.
	pub fn write_lock(&self) {
		let mut depths = self.depths();
		if depths.write == 0 {
			if depths.read > 0 {
				trace!(depth = depths.read, "upgrading shared access");
				self.lock.read_unlock();
			}
			self.lock.write_lock();
		}
		depths.write += 1;
		self.store(depths);
	}

	/// Attempts to acquire exclusive access without blocking.
	///
	/// Nested calls from a thread that already holds exclusive access always
	/// succeed. A thread holding only shared access gets [`Error::WouldBlock`]:
	/// upgrading requires giving up the shared hold, which could not be taken
	/// back without blocking if the attempt then failed.
	pub fn try_write_lock(&self) -> error::Result<()> {
		let mut depths = self.depths();
		if depths.write == 0 {
			if depths.read > 0 {
				return Err(Error::WouldBlock);
			}
			self.lock.try_write_lock()?;
		}
		depths.write += 1;
		self.store(depths);
		Ok(())
	}

	/// Releases one level of exclusive access held by the calling thread.
	///
	/// When the outermost level is released the thread returns to shared access
	/// if it held shared access before the first `write_lock`.
	///
	/// # Panics
	///
	/// Panics if the calling thread does not hold exclusive access.
	#[track_caller]
	pub fn write_unlock(&self) {
		let mut depths = self.depths();
		if depths.write == 0 {
			misuse(Error::ExclusiveNotHeld);
		}
		depths.write -= 1;
		if depths.write == 0 {
			if depths.read > 0 {
				trace!(depth = depths.read, "downgrading to shared access");
				self.lock.downgrade();
			} else {
				self.lock.write_unlock();
			}
		}
		self.store(depths);
	}

	/// Acquires shared access, returning a guard that releases it when dropped.
	#[inline]
	pub fn read(&self) -> ReentrantReadGuard<'_> {
		self.read_lock();
		ReentrantReadGuard {
			lock: self,
			_not_send: PhantomData,
		}
	}

	/// Acquires exclusive access, returning a guard that releases it when dropped.
	#[inline]
	pub fn write(&self) -> ReentrantWriteGuard<'_> {
		self.write_lock();
		ReentrantWriteGuard {
			lock: self,
			_not_send: PhantomData,
		}
	}

	/// Attempts to acquire exclusive access without blocking.
	///
	/// See [`try_write_lock`](Self::try_write_lock) for when this fails.
	#[inline]
	pub fn try_write(&self) -> error::Result<ReentrantWriteGuard<'_>> {
		self.try_write_lock()?;
		Ok(ReentrantWriteGuard {
			lock: self,
			_not_send: PhantomData,
		})
	}

	/// Returns how many read sections the calling thread currently has open.
	pub fn read_depth(&self) -> usize {
		self.depths().read
	}

	/// Returns how many write sections the calling thread currently has open.
	pub fn write_depth(&self) -> usize {
		self.depths().write
	}

	/// Returns the number of threads holding shared access on the underlying lock.
	pub fn reader_count(&self) -> usize {
		self.lock.reader_count()
	}

	/// Returns `true` if some thread holds exclusive access.
	pub fn is_locked_exclusive(&self) -> bool {
		self.lock.is_locked_exclusive()
	}

	/// Returns `true` if some thread is queued for exclusive access behind readers.
	pub fn is_writer_waiting(&self) -> bool {
		self.lock.is_writer_waiting()
	}
}

impl Default for ReentrantSharedExclusiveLock {
	fn default() -> Self {
		ReentrantSharedExclusiveLock::new()
	}
}

impl std::fmt::Debug for ReentrantSharedExclusiveLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReentrantSharedExclusiveLock")
			.field("threads", &self.threads.lock().len())
			.field("lock", &self.lock)
			.finish()
	}
}

/// RAII structure used to release one level of shared access when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantReadGuard<'a> {
	lock: &'a ReentrantSharedExclusiveLock,
	_not_send: PhantomData<*const ()>,
}

impl<'a> ReentrantReadGuard<'a> {
	/// Returns a reference to the lock this guard belongs to.
	pub fn lock(&self) -> &'a ReentrantSharedExclusiveLock {
		self.lock
	}
}

impl Drop for ReentrantReadGuard<'_> {
	#[inline]
	fn drop(&mut self) {
		self.lock.read_unlock();
	}
}

/// RAII structure used to release one level of exclusive access when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantWriteGuard<'a> {
	lock: &'a ReentrantSharedExclusiveLock,
	_not_send: PhantomData<*const ()>,
}

impl<'a> ReentrantWriteGuard<'a> {
	/// Returns a reference to the lock this guard belongs to.
	pub fn lock(&self) -> &'a ReentrantSharedExclusiveLock {
		self.lock
	}
}

impl Drop for ReentrantWriteGuard<'_> {
	#[inline]
	fn drop(&mut self) {
		self.lock.write_unlock();
	}
}
