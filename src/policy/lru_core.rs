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

/// Recency metadata: most recently used at the front, victims popped from the
/// back.
pub struct LruCore {
	map: HashMap<Key, Index<LruObject>, NoHasher>,
	stack: VecList<LruObject>,

	used_size: CacheSize,
	capacity: CacheSize,
}

struct LruObject {
	key: Key,
	size: ObjectSize,
}

impl LruCore {
	pub fn new(capacity: CacheSize) -> Self {
		LruCore {
			map: HashMap::default(),
			stack: VecList::new(),

			used_size: 0,
			capacity,
		}
	}
}

impl EvictionCore for LruCore {
	fn len(&self) -> usize {
		self.map.len()
	}

	fn contains(&self, key: Key) -> bool {
		self.map.contains_key(&key)
	}

	fn used_size(&self) -> CacheSize {
		self.used_size
	}

	fn capacity(&self) -> CacheSize {
		self.capacity
	}

	fn insert(&mut self, key: Key, size: ObjectSize) {
		if self.map.contains_key(&key) {
			self.touch(key);
			return;
		}

		let index = self.stack.push_front(LruObject::new(key, size));
		self.map.insert(key, index);

		self.used_size += size;
	}

	fn touch(&mut self, key: Key) -> Option<u64> {
		if let Some(index) = self.map.get(&key) {
			if let Some(object) = self.stack.remove(*index) {
				let new_index = self.stack.push_front(object);
				self.map.insert(key, new_index);
			}
		}

		None
	}

	fn erase(&mut self, key: Key) -> Option<ObjectSize> {
		let index = self.map.remove(&key)?;
		let object = self.stack.remove(index)?;

		self.used_size -= object.size;

		Some(object.size)
	}

	fn evict_one(&mut self) -> Option<(Key, ObjectSize)> {
		let object = self.stack.pop_back()?;

		self.map.remove(&object.key);
		self.used_size -= object.size;

		Some((object.key, object.size))
	}

	fn clear(&mut self) {
		self.map.clear();
		self.stack.clear();

		self.used_size = 0;
	}
}

impl LruObject {
	fn new(key: Key, size: ObjectSize) -> Self {
		LruObject {
			key,
			size,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::policy::{core::EvictionCore, lru_core::LruCore};

	#[test]
	fn eviction_order_is_correct() {
		let mut core = LruCore::new(1000);

		for key in 1..=10 {
			core.insert(key, 100);
		}

		core.touch(1);
		core.insert(11, 100);

		// MRU to LRU: 11, 1, 10, 9, 8, 7, 6, 5, 4, 3, 2
		let mut drained = Vec::new();

		while let Some((key, _)) = core.evict_one() {
			drained.push(key);
		}

		assert_eq!(drained, vec![2, 3, 4, 5, 6, 7, 8, 9, 10, 1, 11]);
	}

	#[test]
	fn touch_is_idempotent() {
		let mut first = LruCore::new(300);
		let mut second = LruCore::new(300);

		for core in [&mut first, &mut second] {
			for key in [1, 2, 3] {
				core.insert(key, 100);
			}
		}

		first.touch(2);

		second.touch(2);
		second.touch(2);

		let drain = |core: &mut LruCore| {
			let mut keys = Vec::new();

			while let Some((key, _)) = core.evict_one() {
				keys.push(key);
			}

			keys
		};

		assert_eq!(drain(&mut first), drain(&mut second));
	}

	#[test]
	fn erase_keeps_sizes_consistent() {
		let mut core = LruCore::new(1000);

		core.insert(1, 100);
		core.insert(2, 250);

		assert_eq!(core.used_size(), 350);
		assert_eq!(core.erase(2), Some(250));
		assert_eq!(core.used_size(), 100);
		assert!(!core.contains(2));
		assert_eq!(core.erase(2), None);
	}
}
