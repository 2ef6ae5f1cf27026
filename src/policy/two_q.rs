/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;

use log::{debug, warn};

use crate::{
	error::CacheError,
	object::{AlignedBuf, Entry, ItemMap},
	pending::{BatchContext, PendingBatch, UpdateKind},
	policy::{
		core::EvictionCore,
		fifo_core::FifoCore,
		lru_core::LruCore,
		CachePolicy,
		PolicyEngine,
	},
	stats::AtomicStats,
	CacheSize,
	Key,
	ObjectSize,
};

/// 2Q: new entries are admitted into a FIFO holding half the budget and move
/// into the main LRU on their first hit.
pub struct TwoQEngine {
	admission: FifoCore,
	main: LruCore,
}

impl TwoQEngine {
	pub fn new(capacity: CacheSize) -> Self {
		let admission_size = (capacity as f64 * 0.5) as CacheSize;
		let main_size = (capacity as f64 * 0.5) as CacheSize;

		TwoQEngine {
			admission: FifoCore::new(admission_size),
			main: LruCore::new(main_size),
		}
	}
}

impl PolicyEngine for TwoQEngine {
	fn is_policy(&self, policy: &CachePolicy) -> bool {
		matches!(policy, CachePolicy::TwoQ)
	}

	fn len(&self) -> usize {
		self.admission.len() + self.main.len()
	}

	fn used_size(&self) -> CacheSize {
		self.admission.used_size() + self.main.used_size()
	}

	fn contains(&self, key: Key) -> bool {
		self.admission.contains(key) || self.main.contains(key)
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
		self.admission.evict_until(items, stats, 0);
		self.main.evict_until(items, stats, 0);

		for update in &batch.updates {
			if update.kind != UpdateKind::Hit {
				continue;
			}

			let key = update.key;

			if let Some(size) = self.admission.erase(key) {
				// first hit in the admission queue promotes into the main LRU
				self.main.evict_until(items, stats, size);
				self.main.insert(key, size);
			} else if self.main.contains(key) {
				self.main.touch(key);
			} else {
				debug!("Skipping a hit on key {key} that raced an eviction");
			}
		}

		for staged in batch.staged {
			if items.contains(staged.key) {
				debug!("Ignoring duplicate insert of key {}", staged.key);
				continue;
			}

			let size = staged.data.len() as ObjectSize;

			if size > self.admission.capacity() {
				warn!(
					"Admitting an entry of {size} byte(s) over a budget of {} byte(s)",
					self.admission.capacity(),
				);
			}

			self.admission.evict_until(items, stats, size);

			items.insert(Entry::new(staged.key, staged.data));
			stats.update_current_size(size as i64);

			self.admission.insert(staged.key, size);
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::policy::{core::EvictionCore, two_q::TwoQEngine};

	#[test]
	fn budget_is_split_in_half() {
		let engine = TwoQEngine::new(1000);

		assert_eq!(engine.admission.capacity(), 500);
		assert_eq!(engine.main.capacity(), 500);
	}
}
