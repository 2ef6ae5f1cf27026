/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{sync::Arc, time::Instant};

use crate::{
	object::AlignedBuf,
	Key,
};

/// The outcome recorded for one consulted request, drained in one pass by the
/// refresh that follows the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
	Miss,

	/// A hit under a single-map policy (LRU, LFU, FIFO, 2Q, leveled).
	Hit,

	/// A batch-read hit in the hot posting-list tier.
	LfuHit,

	/// A batch-read hit on a member of a live read batch.
	FifoHit,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingUpdate {
	pub key: Key,
	pub kind: UpdateKind,
}

/// A missed posting list staged for insertion: the bytes have already been
/// copied into their final aligned allocation.
pub struct StagedEntry {
	pub key: Key,
	pub data: AlignedBuf,
}

/// Per-query-batch state carried by the reader between `get` calls and
/// `note_requests`. Holds the pending-update log and the reusable prefetch
/// window filled by batch hits.
pub struct BatchContext {
	started_at: Instant,

	updates: Vec<PendingUpdate>,
	window: Vec<(Key, Arc<AlignedBuf>)>,

	reuse_count: u64,
	get_latency_ms: f64,
}

/// The stashed pending data for one thread's query batch, applied in bulk by
/// `refresh`.
pub(crate) struct PendingBatch {
	pub num_requests: usize,

	pub updates: Vec<PendingUpdate>,
	pub staged: Vec<StagedEntry>,

	/// Keys of requests served without disk I/O, window reuses included.
	pub hit_keys: Vec<Key>,

	pub reuse_count: u64,
	pub get_latency_ms: f64,
	pub batch_latency_ms: f64,
}

impl BatchContext {
	pub(crate) fn new() -> Self {
		BatchContext {
			started_at: Instant::now(),

			updates: Vec::new(),
			window: Vec::new(),

			reuse_count: 0,
			get_latency_ms: 0.0,
		}
	}

	/// The number of `get` calls satisfied from the prefetch window so far.
	#[must_use]
	pub fn reuse_count(&self) -> u64 {
		self.reuse_count
	}

	/// The number of prefetched posting lists still available for reuse.
	#[must_use]
	pub fn window_len(&self) -> usize {
		self.window.len()
	}

	pub(crate) fn push_update(&mut self, key: Key, kind: UpdateKind) {
		self.updates.push(PendingUpdate {
			key,
			kind,
		});
	}

	pub(crate) fn window_contains(&self, key: Key) -> bool {
		self.window
			.iter()
			.any(|(cached, _)| *cached == key)
	}

	pub(crate) fn push_window(&mut self, key: Key, data: Arc<AlignedBuf>) {
		self.window.push((key, data));
	}

	pub(crate) fn take_from_window(&mut self, key: Key) -> Option<Arc<AlignedBuf>> {
		let position = self.window
			.iter()
			.position(|(cached, _)| *cached == key)?;

		let (_, data) = self.window.swap_remove(position);
		self.reuse_count += 1;

		Some(data)
	}

	pub(crate) fn add_get_latency(&mut self, started: Instant) {
		self.get_latency_ms += started.elapsed().as_secs_f64() * 1_000.0;
	}

	pub(crate) fn into_parts(self) -> (Vec<PendingUpdate>, u64, f64, Instant) {
		(self.updates, self.reuse_count, self.get_latency_ms, self.started_at)
	}
}

impl PendingBatch {
	/// The number of consulted hits in the batch, window reuses excluded.
	pub fn hit_count(&self) -> u64 {
		self.updates
			.iter()
			.filter(|update| update.kind != UpdateKind::Miss)
			.count() as u64
	}

	pub fn miss_count(&self) -> u64 {
		self.updates
			.iter()
			.filter(|update| update.kind == UpdateKind::Miss)
			.count() as u64
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{
		object::AlignedBuf,
		pending::{BatchContext, UpdateKind},
	};

	#[test]
	fn window_reuse_pops_by_key() {
		let mut ctx = BatchContext::new();

		for key in [1, 2, 3] {
			ctx.push_window(key, Arc::new(AlignedBuf::copy_from(&[key as u8; 4])));
		}

		let data = ctx.take_from_window(2).expect("missing window entry");

		assert_eq!(data.as_slice(), &[2, 2, 2, 2]);
		assert_eq!(ctx.reuse_count(), 1);
		assert_eq!(ctx.window_len(), 2);
		assert!(!ctx.window_contains(2));
		assert!(ctx.take_from_window(2).is_none());
	}

	#[test]
	fn updates_preserve_order() {
		let mut ctx = BatchContext::new();

		ctx.push_update(10, UpdateKind::FifoHit);
		ctx.push_update(11, UpdateKind::Miss);
		ctx.push_update(12, UpdateKind::Hit);

		let (updates, reuse, _, _) = ctx.into_parts();

		assert_eq!(reuse, 0);
		assert_eq!(updates.len(), 3);
		assert_eq!(updates[0].kind, UpdateKind::FifoHit);
		assert_eq!(updates[1].key, 11);
		assert_eq!(updates[2].kind, UpdateKind::Hit);
	}
}
