/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;

use log::{debug, error, warn};

use crate::{
	error::CacheError,
	object::{AlignedBuf, Entry, ItemMap},
	pending::{BatchContext, PendingBatch, UpdateKind},
	policy::{core::EvictionCore, lru_core::LruCore, CachePolicy, PolicyEngine},
	stats::AtomicStats,
	CacheSize,
	Key,
	ObjectSize,
};

/// Leveled correlated LFU: a stack of LRU levels. New entries land at the
/// base level; hits rise one level at a time, but only when the surrounding
/// query batch carries enough work to make retention worthwhile. Overflow at
/// any level evicts from that level only.
pub struct LeveledEngine {
	levels: Vec<LruCore>,
	promotion_threshold: u32,
}

impl LeveledEngine {
	pub fn new(capacity: CacheSize, levels: u8, promotion_threshold: u32) -> Self {
		let levels = levels as usize;
		let mut cores = Vec::with_capacity(levels);

		// 60% at the base, 20% one level up, the rest split evenly
		cores.push(LruCore::new((capacity as f64 * 0.6) as CacheSize));
		cores.push(LruCore::new((capacity as f64 * 0.2) as CacheSize));

		let upper_size = (capacity as f64 * 0.2) as CacheSize / (levels - 2) as CacheSize;

		for _ in 2..levels {
			cores.push(LruCore::new(upper_size));
		}

		LeveledEngine {
			levels: cores,
			promotion_threshold,
		}
	}

	// overflow at the destination level is collected by the caller after all
	// of the batch's promotions have landed
	fn promote(&mut self, items: &mut ItemMap, key: Key, level: usize) {
		if self.levels[level].erase(key).is_none() {
			error!("Key {key} is not tracked at its recorded level {level}");
			return;
		}

		let Some(entry) = items.get(key) else {
			return;
		};

		let size = entry.size();

		self.levels[level + 1].insert(key, size);

		if let Some(entry) = items.get_mut(key) {
			entry.set_level((level + 1) as u8);
		}
	}
}

impl PolicyEngine for LeveledEngine {
	fn is_policy(&self, policy: &CachePolicy) -> bool {
		matches!(
			policy,
			CachePolicy::LeveledCorrLfu(levels, threshold)
				if *levels as usize == self.levels.len()
					&& *threshold == self.promotion_threshold
		)
	}

	fn len(&self) -> usize {
		self.levels
			.iter()
			.map(EvictionCore::len)
			.sum()
	}

	fn used_size(&self) -> CacheSize {
		self.levels
			.iter()
			.map(EvictionCore::used_size)
			.sum()
	}

	fn contains(&self, key: Key) -> bool {
		self.levels
			.iter()
			.any(|core| core.contains(key))
	}

	fn lookup(
		&self,
		items: &ItemMap,
		key: Key,
		ctx: &mut BatchContext,
	) -> Option<Arc<AlignedBuf>> {
		match items.get(key) {
			Some(entry) => {
				ctx.push_update(key, UpdateKind::Hit);
				Some(entry.data())
			},

			None => {
				ctx.push_update(key, UpdateKind::Miss);
				None
			},
		}
	}

	fn apply_refresh(
		&mut self,
		items: &mut ItemMap,
		batch: PendingBatch,
		stats: &AtomicStats,
	) -> Result<(), CacheError> {
		for level in 0..self.levels.len() {
			self.levels[level].evict_until(items, stats, 0);
		}

		let promotable = batch.num_requests > self.promotion_threshold as usize;

		for update in &batch.updates {
			if update.kind != UpdateKind::Hit {
				continue;
			}

			let key = update.key;

			let Some(entry) = items.get(key) else {
				debug!("Skipping a hit on key {key} that raced an eviction");
				continue;
			};

			let level = entry.level() as usize;

			if level >= self.levels.len() {
				error!("Key {key} records an out-of-range level {level}");

				if cfg!(debug_assertions) {
					return Err(CacheError::Internal);
				}

				continue;
			}

			if promotable && level + 1 < self.levels.len() {
				self.promote(items, key, level);
			} else {
				self.levels[level].touch(key);
			}
		}

		// settle the upper levels once every promotion has landed
		for level in 1..self.levels.len() {
			self.levels[level].evict_until(items, stats, 0);
		}

		for staged in batch.staged {
			if items.contains(staged.key) {
				debug!("Ignoring duplicate insert of key {}", staged.key);
				continue;
			}

			let size = staged.data.len() as ObjectSize;

			if size > self.levels[0].capacity() {
				warn!(
					"Admitting an entry of {size} byte(s) over a budget of {} byte(s)",
					self.levels[0].capacity(),
				);
			}

			self.levels[0].evict_until(items, stats, size);

			items.insert(Entry::new(staged.key, staged.data));
			stats.update_current_size(size as i64);

			self.levels[0].insert(staged.key, size);
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::policy::{core::EvictionCore, leveled::LeveledEngine};

	#[test]
	fn budgets_follow_the_level_split() {
		let engine = LeveledEngine::new(1000, 4, 4);

		let capacities: Vec<u64> = engine.levels
			.iter()
			.map(EvictionCore::capacity)
			.collect();

		assert_eq!(capacities, vec![600, 200, 100, 100]);
	}
}
