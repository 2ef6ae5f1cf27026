/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	cell::UnsafeCell,
	hint,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, AtomicUsize, Ordering},
	time::Instant,
};

/// The number of acquisitions each handle kind records. Later acquisitions
/// keep the lock semantics but stop recording.
pub const LOCK_STAT_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
	/// The read-mostly query path.
	Search,

	/// The post-I/O mutation path.
	Refresh,
}

/// Timing of one lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockStat {
	pub requested_at: Instant,
	pub acquired_at: Instant,
	pub released_at: Option<Instant>,
}

struct LockLedger {
	next: AtomicUsize,

	// written only while the owning lock is held
	ring: UnsafeCell<Box<[Option<LockStat>]>>,
}

/// A spin lock owning the guarded state, with per-acquisition timing split
/// across two logical handles: search and refresh. Guards release the lock on
/// every exit path and stamp the release time into the handle's ledger.
pub struct TimedSpinLock<T> {
	locked: AtomicBool,
	timed: bool,

	search: LockLedger,
	refresh: LockLedger,

	data: UnsafeCell<T>,
}

pub struct SpinGuard<'a, T> {
	lock: &'a TimedSpinLock<T>,
	kind: LockKind,
	handle: usize,
}

impl LockLedger {
	fn new() -> Self {
		LockLedger {
			next: AtomicUsize::new(0),
			ring: UnsafeCell::new(vec![None; LOCK_STAT_CAPACITY].into_boxed_slice()),
		}
	}
}

impl<T> TimedSpinLock<T> {
	pub fn new(data: T, timed: bool) -> Self {
		TimedSpinLock {
			locked: AtomicBool::new(false),
			timed,

			search: LockLedger::new(),
			refresh: LockLedger::new(),

			data: UnsafeCell::new(data),
		}
	}

	pub fn lock_search(&self) -> SpinGuard<'_, T> {
		self.acquire(LockKind::Search)
	}

	pub fn lock_refresh(&self) -> SpinGuard<'_, T> {
		self.acquire(LockKind::Refresh)
	}

	/// Returns the total number of acquisitions through the handle.
	#[must_use]
	pub fn total_acquisitions(&self, kind: LockKind) -> usize {
		self.ledger(kind).next.load(Ordering::Relaxed)
	}

	/// Returns the number of acquisitions dropped once the handle's ledger
	/// filled up.
	#[must_use]
	pub fn overflowed(&self, kind: LockKind) -> usize {
		self.total_acquisitions(kind).saturating_sub(LOCK_STAT_CAPACITY)
	}

	/// Copies the recorded acquisition timings for the handle.
	#[must_use]
	pub fn recorded(&self, kind: LockKind) -> Vec<LockStat> {
		self.spin_acquire();

		let stats = unsafe { &*self.ledger(kind).ring.get() }
			.iter()
			.flatten()
			.copied()
			.collect();

		self.locked.store(false, Ordering::Release);

		stats
	}

	fn ledger(&self, kind: LockKind) -> &LockLedger {
		match kind {
			LockKind::Search => &self.search,
			LockKind::Refresh => &self.refresh,
		}
	}

	fn spin_acquire(&self) {
		while self.locked
			.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
			.is_err()
		{
			hint::spin_loop();
		}
	}

	fn acquire(&self, kind: LockKind) -> SpinGuard<'_, T> {
		let requested_at = Instant::now();

		self.spin_acquire();

		let handle = self.ledger(kind).next.fetch_add(1, Ordering::Relaxed);

		if self.timed && handle < LOCK_STAT_CAPACITY {
			let stat = LockStat {
				requested_at,
				acquired_at: Instant::now(),
				released_at: None,
			};

			// the lock is held, so the ledger slot is exclusively ours
			unsafe {
				(*self.ledger(kind).ring.get())[handle] = Some(stat);
			}
		}

		SpinGuard {
			lock: self,
			kind,
			handle,
		}
	}
}

unsafe impl<T> Send for TimedSpinLock<T>
where
	T: Send,
{}

unsafe impl<T> Sync for TimedSpinLock<T>
where
	T: Send,
{}

impl<T> Deref for SpinGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		unsafe { &*self.lock.data.get() }
	}
}

impl<T> DerefMut for SpinGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<T> Drop for SpinGuard<'_, T> {
	fn drop(&mut self) {
		if self.lock.timed && self.handle < LOCK_STAT_CAPACITY {
			let ring = unsafe { &mut *self.lock.ledger(self.kind).ring.get() };

			if let Some(stat) = ring[self.handle].as_mut() {
				stat.released_at = Some(Instant::now());
			}
		}

		self.lock.locked.store(false, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use std::{sync::Arc, thread};

	use crate::lock::{LockKind, TimedSpinLock};

	#[test]
	fn it_serializes_concurrent_mutation() {
		let lock = Arc::new(TimedSpinLock::new(0u64, true));
		let mut handles = Vec::new();

		for _ in 0..4 {
			let lock = lock.clone();

			handles.push(thread::spawn(move || {
				for _ in 0..1000 {
					let mut guard = lock.lock_refresh();
					*guard += 1;
				}
			}));
		}

		for handle in handles {
			handle.join().expect("worker panicked");
		}

		assert_eq!(*lock.lock_search(), 4000);
		assert_eq!(lock.total_acquisitions(LockKind::Refresh), 4000);
		assert_eq!(lock.total_acquisitions(LockKind::Search), 1);
	}

	#[test]
	fn it_records_acquisition_timing() {
		let lock = TimedSpinLock::new((), true);

		{
			let _guard = lock.lock_search();
		}

		{
			let _guard = lock.lock_refresh();
		}

		let search = lock.recorded(LockKind::Search);
		let refresh = lock.recorded(LockKind::Refresh);

		assert_eq!(search.len(), 1);
		assert_eq!(refresh.len(), 1);

		let stat = &search[0];
		let released = stat.released_at.expect("release was not stamped");

		assert!(stat.requested_at <= stat.acquired_at);
		assert!(stat.acquired_at <= released);
		assert_eq!(lock.overflowed(LockKind::Search), 0);
	}

	#[test]
	fn untimed_lock_skips_recording() {
		let lock = TimedSpinLock::new(0u32, false);

		{
			let mut guard = lock.lock_refresh();
			*guard = 7;
		}

		assert_eq!(*lock.lock_search(), 7);
		assert!(lock.recorded(LockKind::Refresh).is_empty());
		assert_eq!(lock.total_acquisitions(LockKind::Refresh), 1);
	}
}
