/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{path::Path, sync::Arc, time::Instant};

use dashmap::DashMap;
use log::{info, warn};
use parking_lot::Mutex;

use crate::{
	error::CacheError,
	lock::{LockKind, LockStat, TimedSpinLock},
	object::{AlignedBuf, ItemMap},
	pending::{BatchContext, PendingBatch, StagedEntry},
	policy::{init_policy_engine, CachePolicy, PolicyEngine},
	request::ReadRequest,
	stats::{AtomicStats, StatSnapshot},
	trace::{RefreshRecord, StatTrace},
	CacheSize,
	Key,
	MAX_THREADS,
};

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
	pub policy: CachePolicy,

	/// Total byte budget. Ignored by the batch-read policy, which budgets
	/// its two tiers independently.
	pub capacity: CacheSize,

	/// Record per-acquisition lock timing. The lock itself is always taken.
	pub enable_lock: bool,
}

struct CacheState {
	items: ItemMap,
	engine: Box<dyn PolicyEngine>,
}

/// The posting-list cache facade consumed by the asynchronous batched
/// reader. Lookups on the query path record intent only; all metadata
/// mutation happens in `refresh` after the batch's disk I/O completes.
pub struct PostingCache {
	policy: CachePolicy,

	state: TimedSpinLock<CacheState>,
	pending: DashMap<usize, PendingBatch>,

	stats: AtomicStats,
	trace: Mutex<StatTrace>,
}

impl CacheConfig {
	pub fn new(policy: CachePolicy, capacity: CacheSize) -> Self {
		CacheConfig {
			policy,
			capacity,

			enable_lock: true,
		}
	}
}

impl PostingCache {
	/// Creates an empty cache for the configured policy. Returns a
	/// [`CacheError`] for a zero byte budget or invalid policy parameters.
	pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
		config.policy.validate(config.capacity)?;

		let engine = init_policy_engine(config.policy, config.capacity);

		info!(
			"Initialized {} posting cache with a budget of {} byte(s)",
			config.policy,
			config.capacity,
		);

		let state = CacheState {
			items: ItemMap::default(),
			engine,
		};

		let cache = PostingCache {
			policy: config.policy,

			state: TimedSpinLock::new(state, config.enable_lock),
			pending: DashMap::new(),

			stats: AtomicStats::default(),
			trace: Mutex::new(StatTrace::default()),
		};

		Ok(cache)
	}

	#[must_use]
	pub fn policy(&self) -> CachePolicy {
		self.policy
	}

	/// Starts a query batch. The returned context carries the batch's
	/// pending-update log and prefetch window between `get` calls and must be
	/// handed back through `note_requests`.
	#[must_use]
	pub fn begin_batch(&self) -> BatchContext {
		BatchContext::new()
	}

	/// Fetches a posting list. The prefetch window is consulted first and
	/// satisfies the call with no metadata lookup; otherwise the key is
	/// classified under the search lock and the outcome recorded in the
	/// context. No policy metadata is mutated.
	pub fn get(&self, key: Key, ctx: &mut BatchContext) -> Option<Arc<AlignedBuf>> {
		let started = Instant::now();

		if let Some(data) = ctx.take_from_window(key) {
			ctx.add_get_latency(started);
			return Some(data);
		}

		let fetched = {
			let state = self.state.lock_search();
			state.engine.lookup(&state.items, key, ctx)
		};

		match fetched {
			Some(_) => self.stats.incr_hits(),
			None => self.stats.incr_misses(),
		}

		ctx.add_get_latency(started);

		fetched
	}

	/// Stashes the batch's pending data for thread `tid` once its disk I/O
	/// has completed: every missed request's bytes are copied into their
	/// final aligned allocation here.
	pub fn note_requests(
		&self,
		ctx: BatchContext,
		miss_bitmap: &[bool],
		requests: &[ReadRequest<'_>],
		tid: usize,
	) -> Result<(), CacheError> {
		if tid >= MAX_THREADS {
			return Err(CacheError::UnknownThreadId);
		}

		if miss_bitmap.len() != requests.len() {
			return Err(CacheError::MismatchedBatch);
		}

		let num_requests = requests.len();
		let (updates, reuse_count, get_latency_ms, started_at) = ctx.into_parts();
		let batch_latency_ms = started_at.elapsed().as_secs_f64() * 1_000.0;

		let mut staged = Vec::new();
		let mut hit_keys = Vec::new();

		for (request, missed) in requests.iter().zip(miss_bitmap.iter().copied()) {
			let key = request.cache_key();

			if !missed {
				hit_keys.push(key);
				continue;
			}

			let bytes = request.bytes();

			if bytes.is_empty() {
				warn!("Skipping a zero-sized posting list at key {key}");
				continue;
			}

			staged.push(StagedEntry {
				key,
				data: AlignedBuf::copy_from(bytes),
			});
		}

		let batch = PendingBatch {
			num_requests,

			updates,
			staged,
			hit_keys,

			reuse_count,
			get_latency_ms,
			batch_latency_ms,
		};

		self.pending.insert(tid, batch);

		Ok(())
	}

	/// Applies all stashed mutations for thread `tid`'s query batch under
	/// the refresh lock and appends one stat snapshot and one trace record.
	pub fn refresh(&self, tid: usize) -> Result<(), CacheError> {
		if tid >= MAX_THREADS {
			return Err(CacheError::UnknownThreadId);
		}

		let Some((_, batch)) = self.pending.remove(&tid) else {
			return Err(CacheError::NoPendingBatch);
		};

		let record = RefreshRecord {
			hit_count: batch.hit_count(),
			miss_count: batch.miss_count(),
			reuse_count: batch.reuse_count,

			sum_get_latency_ms: batch.get_latency_ms,
			batch_read_latency_ms: batch.batch_latency_ms,
		};

		let local_hit_ratio = match batch.num_requests {
			0 => 0.0,
			count => batch.hit_keys.len() as f64 / count as f64,
		};

		{
			let mut guard = self.state.lock_refresh();
			let state = &mut *guard;

			state.engine.apply_refresh(&mut state.items, batch, &self.stats)?;
		}

		let snapshot = self.stats.snapshot(local_hit_ratio);
		self.trace.lock().push(snapshot, record);

		Ok(())
	}

	/// Returns the number of cached posting lists.
	#[must_use]
	pub fn len(&self) -> usize {
		self.state.lock_search().items.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the total number of cached bytes.
	#[must_use]
	pub fn current_size(&self) -> CacheSize {
		self.stats.current_size()
	}

	/// Returns the cumulative counters together with the latest batch's
	/// local hit ratio.
	#[must_use]
	pub fn stats(&self) -> StatSnapshot {
		let local_hit_ratio = self.trace
			.lock()
			.snapshots()
			.last()
			.map_or(0.0, |snapshot| snapshot.local_hit_ratio);

		self.stats.snapshot(local_hit_ratio)
	}

	/// Clears the hit, miss and eviction counters. Cached content and the
	/// recorded trace are left untouched.
	pub fn reset_stats(&self) {
		self.stats.clear();
	}

	/// Returns the number of recorded refreshes.
	#[must_use]
	pub fn trace_len(&self) -> usize {
		self.trace.lock().len()
	}

	/// Returns the most recent per-batch trace record.
	#[must_use]
	pub fn last_record(&self) -> Option<RefreshRecord> {
		self.trace.lock().records().last().copied()
	}

	/// Writes the per-refresh history as TSV.
	pub fn export_stat_trace(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
		self.trace.lock().export_tsv(path)
	}

	/// Returns the total number of acquisitions through a lock handle.
	#[must_use]
	pub fn lock_acquisitions(&self, kind: LockKind) -> usize {
		self.state.total_acquisitions(kind)
	}

	/// Copies the recorded acquisition timings for a lock handle.
	#[must_use]
	pub fn lock_stats(&self, kind: LockKind) -> Vec<LockStat> {
		self.state.recorded(kind)
	}

	#[cfg(test)]
	fn entry_level(&self, key: Key) -> Option<u8> {
		self.state
			.lock_search()
			.items
			.get(key)
			.map(|entry| entry.level())
	}

	#[cfg(test)]
	fn entry_freq(&self, key: Key) -> Option<u64> {
		self.state
			.lock_search()
			.items
			.get(key)
			.map(|entry| entry.freq())
	}

	#[cfg(test)]
	fn check_invariants(&self) {
		let state = self.state.lock_search();

		assert_eq!(
			state.items.total_bytes(),
			self.stats.current_size(),
			"cached bytes diverged from the size counter",
		);

		assert_eq!(
			state.items.len(),
			state.engine.len(),
			"cached entries diverged from policy metadata",
		);

		for key in state.items.keys() {
			assert!(
				state.engine.contains(key),
				"key {key} is cached but tracked by no policy core",
			);
		}
	}
}
