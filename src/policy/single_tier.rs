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
	policy::{core::EvictionCore, CachePolicy, PolicyEngine},
	stats::AtomicStats,
	CacheSize,
	Key,
	ObjectSize,
};

/// LRU, LFU and FIFO: one eviction core over the whole byte budget.
pub struct SingleTierEngine<C>
where
	C: EvictionCore,
{
	policy: CachePolicy,
	core: C,
}

impl<C> SingleTierEngine<C>
where
	C: EvictionCore,
{
	pub fn new(policy: CachePolicy, core: C) -> Self {
		SingleTierEngine {
			policy,
			core,
		}
	}
}

impl<C> PolicyEngine for SingleTierEngine<C>
where
	C: EvictionCore,
{
	fn is_policy(&self, policy: &CachePolicy) -> bool {
		self.policy.eq(policy)
	}

	fn len(&self) -> usize {
		self.core.len()
	}

	fn used_size(&self) -> CacheSize {
		self.core.used_size()
	}

	fn contains(&self, key: Key) -> bool {
		self.core.contains(key)
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
		// remove any overflow left behind by an oversized admission
		self.core.evict_until(items, stats, 0);

		for update in &batch.updates {
			if update.kind != UpdateKind::Hit {
				continue;
			}

			let Some(freq) = self.core.touch(update.key) else {
				continue;
			};

			if let Some(entry) = items.get_mut(update.key) {
				entry.set_freq(freq);
			}
		}

		for staged in batch.staged {
			if items.contains(staged.key) {
				debug!("Ignoring duplicate insert of key {}", staged.key);
				continue;
			}

			let size = staged.data.len() as ObjectSize;

			if size > self.core.capacity() {
				warn!(
					"Admitting an entry of {size} byte(s) over a budget of {} byte(s)",
					self.core.capacity(),
				);
			}

			self.core.evict_until(items, stats, size);

			items.insert(Entry::new(staged.key, staged.data));
			stats.update_current_size(size as i64);

			self.core.insert(staged.key, size);
		}

		Ok(())
	}
}
