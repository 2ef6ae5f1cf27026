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

/// Insertion-order metadata: never reordered on hit, victims popped from the
/// back.
pub struct FifoCore {
	map: HashMap<Key, Index<FifoObject>, NoHasher>,
	stack: VecList<FifoObject>,

	used_size: CacheSize,
	capacity: CacheSize,
}

struct FifoObject {
	key: Key,
	size: ObjectSize,
}

impl FifoCore {
	pub fn new(capacity: CacheSize) -> Self {
		FifoCore {
			map: HashMap::default(),
			stack: VecList::new(),

			used_size: 0,
			capacity,
		}
	}
}

impl EvictionCore for FifoCore {
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
			return;
		}

		let index = self.stack.push_front(FifoObject::new(key, size));
		self.map.insert(key, index);

		self.used_size += size;
	}

	fn touch(&mut self, _key: Key) -> Option<u64> {
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

impl FifoObject {
	fn new(key: Key, size: ObjectSize) -> Self {
		FifoObject {
			key,
			size,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::policy::{core::EvictionCore, fifo_core::FifoCore};

	#[test]
	fn eviction_follows_insertion_order() {
		let mut core = FifoCore::new(1000);

		for key in [4, 2, 7, 1] {
			core.insert(key, 100);
		}

		core.touch(4);
		core.touch(7);

		let mut drained = Vec::new();

		while let Some((key, _)) = core.evict_one() {
			drained.push(key);
		}

		assert_eq!(drained, vec![4, 2, 7, 1]);
	}

	#[test]
	fn duplicate_insert_is_ignored() {
		let mut core = FifoCore::new(1000);

		core.insert(1, 100);
		core.insert(1, 100);

		assert_eq!(core.len(), 1);
		assert_eq!(core.used_size(), 100);
	}
}
