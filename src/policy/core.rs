/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::{
	object::ItemMap,
	stats::AtomicStats,
	CacheSize,
	Key,
	ObjectSize,
};

/// Byte-budgeted eviction metadata over the shared item map. Cores track keys
/// and sizes only; the cached bytes live in the item map.
pub trait EvictionCore
where
	Self: Send,
{
	fn len(&self) -> usize;
	fn contains(&self, key: Key) -> bool;

	fn used_size(&self) -> CacheSize;
	fn capacity(&self) -> CacheSize;

	/// Starts tracking a key. The key must not already be tracked.
	fn insert(&mut self, key: Key, size: ObjectSize);

	/// Records a hit. Returns the key's new access count for cores that
	/// track frequency; recency-only cores return `None`.
	fn touch(&mut self, key: Key) -> Option<u64>;

	/// Stops tracking a key, returning its size. Does not remove the entry
	/// from the item map; the caller decides.
	fn erase(&mut self, key: Key) -> Option<ObjectSize>;

	/// Pops the core's next eviction victim from its metadata.
	fn evict_one(&mut self) -> Option<(Key, ObjectSize)>;

	fn clear(&mut self);

	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn would_overflow(&self, incoming: CacheSize) -> bool {
		self.used_size() + incoming > self.capacity()
	}

	/// Evicts victims until `incoming` more bytes fit in the budget, erasing
	/// each from the item map. Stops when the core runs dry, leaving any
	/// oversized remainder to the caller.
	fn evict_until(
		&mut self,
		items: &mut ItemMap,
		stats: &AtomicStats,
		incoming: CacheSize,
	) -> u64 {
		let mut evicted = 0;

		while self.would_overflow(incoming) {
			let Some((key, _)) = self.evict_one() else {
				break;
			};

			if let Some(entry) = items.remove(key) {
				stats.update_current_size(-(entry.size() as i64));
			}

			stats.incr_evictions(1);
			evicted += 1;
		}

		evicted
	}
}
