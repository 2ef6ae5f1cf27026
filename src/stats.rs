/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::atomic::{AtomicU64, Ordering};

use num_traits::AsPrimitive;
use serde::Serialize;

use crate::{AtomicCacheSize, CacheSize};

/// Shared cache counters, updated with relaxed atomics from the query and
/// refresh paths.
#[derive(Debug, Default)]
pub struct AtomicStats {
	hits: AtomicU64,
	misses: AtomicU64,
	evictions: AtomicU64,

	current_size: AtomicCacheSize,
}

/// A plain, single-threaded view of the counters taken once per refresh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatSnapshot {
	pub hit_count: u64,
	pub miss_count: u64,
	pub evict_count: u64,

	pub current_size: CacheSize,

	/// Hits in one query batch divided by the batch size.
	pub local_hit_ratio: f64,
}

impl AtomicStats {
	/// Returns the cache's total number of hits.
	#[must_use]
	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Returns the cache's total number of misses.
	#[must_use]
	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}

	/// Returns the cache's total number of evictions.
	#[must_use]
	pub fn evictions(&self) -> u64 {
		self.evictions.load(Ordering::Relaxed)
	}

	/// Returns the total number of cached bytes.
	#[must_use]
	pub fn current_size(&self) -> CacheSize {
		self.current_size.load(Ordering::Relaxed)
	}

	pub fn incr_hits(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub fn incr_misses(&self) {
		self.misses.fetch_add(1, Ordering::Relaxed);
	}

	pub fn incr_evictions(&self, count: u64) {
		self.evictions.fetch_add(count, Ordering::Relaxed);
	}

	pub fn update_current_size(&self, delta: impl AsPrimitive<i64>) {
		let delta = delta.as_();

		if delta > 0 {
			self.current_size.fetch_add(delta.unsigned_abs(), Ordering::Relaxed);
		} else if delta < 0 {
			self.current_size.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
		}
	}

	pub fn clear(&self) {
		self.hits.store(0, Ordering::Relaxed);
		self.misses.store(0, Ordering::Relaxed);
		self.evictions.store(0, Ordering::Relaxed);
	}

	#[must_use]
	pub fn snapshot(&self, local_hit_ratio: f64) -> StatSnapshot {
		StatSnapshot {
			hit_count: self.hits(),
			miss_count: self.misses(),
			evict_count: self.evictions(),

			current_size: self.current_size(),

			local_hit_ratio,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::stats::AtomicStats;

	#[test]
	fn it_clears_counters() {
		let stats = AtomicStats::default();

		stats.incr_hits();
		stats.incr_misses();
		stats.incr_evictions(2);
		stats.update_current_size(100);

		assert_eq!(stats.hits(), 1);
		assert_eq!(stats.misses(), 1);
		assert_eq!(stats.evictions(), 2);
		assert_eq!(stats.current_size(), 100);

		stats.clear();

		assert_eq!(stats.hits(), 0);
		assert_eq!(stats.misses(), 0);
		assert_eq!(stats.evictions(), 0);

		// the used size tracks live entries and survives a counter reset
		assert_eq!(stats.current_size(), 100);
	}

	#[test]
	fn it_applies_signed_size_deltas() {
		let stats = AtomicStats::default();

		stats.update_current_size(250);
		stats.update_current_size(-100i64);

		assert_eq!(stats.current_size(), 150);

		let snapshot = stats.snapshot(0.5);
		assert_eq!(snapshot.current_size, 150);
		assert_eq!(snapshot.local_hit_ratio, 0.5);
	}
}
