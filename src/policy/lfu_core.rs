/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;
use dlv_list::{Index, VecList};

use crate::{
	policy::core::EvictionCore,
	CacheSize,
	Key,
	NoHasher,
	ObjectSize,
};

/// Frequency metadata: one LRU-ordered bucket per access count, buckets kept
/// in ascending count order so the front bucket always holds `min_freq`.
pub struct LfuCore {
	index_map: HashMap<Key, KeyIndex, NoHasher>,
	count_lists: VecList<CountList>,

	min_freq: u64,

	used_size: CacheSize,
	capacity: CacheSize,
}

struct LfuObject {
	key: Key,
	size: ObjectSize,
}

struct CountList {
	count: u64,
	list: VecList<LfuObject>,
}

struct KeyIndex {
	count_list_index: Index<CountList>,
	list_index: Index<LfuObject>,
}

impl LfuCore {
	pub fn new(capacity: CacheSize) -> Self {
		LfuCore {
			index_map: HashMap::default(),
			count_lists: VecList::new(),

			min_freq: 0,

			used_size: 0,
			capacity,
		}
	}

	/// The smallest access count over all tracked keys; zero when empty.
	#[must_use]
	pub fn min_freq(&self) -> u64 {
		self.min_freq
	}

	/// The tracked key's access count.
	#[must_use]
	pub fn freq(&self, key: Key) -> Option<u64> {
		let key_index = self.index_map.get(&key)?;

		self.count_lists
			.get(key_index.count_list_index)
			.map(|count_list| count_list.count)
	}

	/// Buckets can skip counts, so the minimum is re-read from the front
	/// bucket rather than incremented.
	fn refresh_min_freq(&mut self) {
		self.min_freq = self.count_lists
			.front()
			.map_or(0, |count_list| count_list.count);
	}
}

impl EvictionCore for LfuCore {
	fn len(&self) -> usize {
		self.index_map.len()
	}

	fn contains(&self, key: Key) -> bool {
		self.index_map.contains_key(&key)
	}

	fn used_size(&self) -> CacheSize {
		self.used_size
	}

	fn capacity(&self) -> CacheSize {
		self.capacity
	}

	fn insert(&mut self, key: Key, size: ObjectSize) {
		if self.index_map.contains_key(&key) {
			self.touch(key);
			return;
		}

		if !self.count_lists.front().is_some_and(|count_list| count_list.count == 1) {
			self.count_lists.push_front(CountList::new(1));
		}

		let count_list_index = self.count_lists.front_index().unwrap();
		let count_list = self.count_lists.get_mut(count_list_index).unwrap();

		let list_index = count_list.push(LfuObject::new(key, size));

		self.index_map.insert(key, KeyIndex::new(
			count_list_index,
			list_index,
		));

		self.used_size += size;

		// new entries always enter the freq-1 bucket
		self.min_freq = 1;
	}

	fn touch(&mut self, key: Key) -> Option<u64> {
		let key_index = self.index_map.get(&key)?;

		let prev_count_list_index = key_index.count_list_index;
		let prev_list_index = key_index.list_index;

		let prev_count_list = self.count_lists.get_mut(prev_count_list_index).unwrap();
		let prev_count = prev_count_list.count;

		let object = prev_count_list.remove(prev_list_index);
		let prev_is_empty = prev_count_list.is_empty();

		if let Some(next_count_list_index) = self.count_lists.get_next_index(prev_count_list_index) {
			let next_count_list = self.count_lists.get_mut(next_count_list_index).unwrap();

			if next_count_list.count == prev_count + 1 {
				let list_index = next_count_list.push(object);

				self.index_map.insert(key, KeyIndex::new(
					next_count_list_index,
					list_index,
				));

				if prev_is_empty {
					self.count_lists.remove(prev_count_list_index);
					self.refresh_min_freq();
				}

				return Some(prev_count + 1);
			}
		}

		let mut count_list = CountList::new(prev_count + 1);

		let list_index = count_list.push(object);
		let count_list_index = self.count_lists.insert_after(prev_count_list_index, count_list);

		self.index_map.insert(key, KeyIndex::new(
			count_list_index,
			list_index,
		));

		if prev_is_empty {
			self.count_lists.remove(prev_count_list_index);
			self.refresh_min_freq();
		}

		Some(prev_count + 1)
	}

	fn erase(&mut self, key: Key) -> Option<ObjectSize> {
		let key_index = self.index_map.remove(&key)?;

		let count_list = self.count_lists.get_mut(key_index.count_list_index).unwrap();
		let object = count_list.remove(key_index.list_index);

		self.used_size -= object.size;

		if count_list.is_empty() {
			self.count_lists.remove(key_index.count_list_index);
			self.refresh_min_freq();
		}

		Some(object.size)
	}

	fn evict_one(&mut self) -> Option<(Key, ObjectSize)> {
		let count_list_index = self.count_lists.front_index()?;
		let count_list = self.count_lists.get_mut(count_list_index)?;

		let object = count_list.pop();

		self.index_map.remove(&object.key);
		self.used_size -= object.size;

		if count_list.is_empty() {
			self.count_lists.remove(count_list_index);
			self.refresh_min_freq();
		}

		Some((object.key, object.size))
	}

	fn clear(&mut self) {
		self.index_map.clear();
		self.count_lists.clear();

		self.min_freq = 0;
		self.used_size = 0;
	}
}

impl CountList {
	fn new(count: u64) -> Self {
		CountList {
			count,
			list: VecList::new(),
		}
	}

	fn is_empty(&self) -> bool {
		self.list.is_empty()
	}

	fn push(&mut self, object: LfuObject) -> Index<LfuObject> {
		self.list.push_front(object)
	}

	fn pop(&mut self) -> LfuObject {
		self.list.pop_back().unwrap()
	}

	fn remove(&mut self, index: Index<LfuObject>) -> LfuObject {
		self.list.remove(index).unwrap()
	}
}

impl LfuObject {
	fn new(key: Key, size: ObjectSize) -> Self {
		LfuObject {
			key,
			size,
		}
	}
}

impl KeyIndex {
	fn new(
		count_list_index: Index<CountList>,
		list_index: Index<LfuObject>,
	) -> Self {
		KeyIndex {
			count_list_index,
			list_index,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::policy::{core::EvictionCore, lfu_core::LfuCore};

	#[test]
	fn eviction_order_is_correct() {
		let mut core = LfuCore::new(1000);

		for key in [1, 2, 3] {
			core.insert(key, 100);
		}

		for _ in 0..3 {
			core.touch(1);
		}

		for _ in 0..2 {
			core.touch(2);
		}

		for key in 4..=10 {
			core.insert(key, 100);
		}

		core.insert(11, 100);

		// freq-1 keys leave first in LRU order, then the frequent ones
		let mut drained = Vec::new();

		while let Some((key, _)) = core.evict_one() {
			drained.push(key);
		}

		assert_eq!(drained, vec![3, 4, 5, 6, 7, 8, 9, 10, 11, 2, 1]);
	}

	#[test]
	fn min_freq_skips_to_next_existing_bucket() {
		let mut core = LfuCore::new(1000);

		for key in [1, 2, 3] {
			core.insert(key, 100);
		}

		for _ in 0..3 {
			core.touch(1);
		}

		core.touch(2);
		core.touch(2);

		assert_eq!(core.min_freq(), 1);
		assert_eq!(core.freq(1), Some(4));
		assert_eq!(core.freq(2), Some(3));

		// draining the freq-1 bucket skips the empty freq-2 bucket
		assert_eq!(core.evict_one().map(|(key, _)| key), Some(3));
		assert_eq!(core.min_freq(), 3);

		assert_eq!(core.evict_one().map(|(key, _)| key), Some(2));
		assert_eq!(core.min_freq(), 4);
	}

	#[test]
	fn insert_resets_min_freq() {
		let mut core = LfuCore::new(1000);

		core.insert(1, 100);
		core.touch(1);
		core.touch(1);

		assert_eq!(core.min_freq(), 3);

		core.insert(2, 100);

		assert_eq!(core.min_freq(), 1);
	}

	#[test]
	fn touch_reports_the_new_count() {
		let mut core = LfuCore::new(1000);

		core.insert(9, 50);

		assert_eq!(core.touch(9), Some(2));
		assert_eq!(core.touch(9), Some(3));
		assert_eq!(core.touch(1), None);
	}
}
