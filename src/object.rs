/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	alloc::{alloc, dealloc, handle_alloc_error, Layout},
	collections::HashMap,
	ops::Deref,
	ptr::{self, NonNull},
	slice,
	sync::Arc,
};

use crate::{
	CacheSize,
	Key,
	NoHasher,
	ObjectSize,
};

/// Alignment of every cached buffer, chosen for O_DIRECT compatibility.
pub const BUFFER_ALIGN: usize = 4096;

/// An owned, page-aligned byte buffer. Constructed by copying the supplied
/// bytes into a fresh aligned allocation; the allocation is freed on drop.
pub struct AlignedBuf {
	ptr: NonNull<u8>,
	len: usize,
}

pub struct Entry {
	key: Key,
	data: Arc<AlignedBuf>,

	level: u8,
	freq: u64,
}

/// The single source of truth for cached content. Policy metadata holds keys
/// only and must never retain a reference across an eviction it triggers.
#[derive(Default)]
pub struct ItemMap {
	entries: HashMap<Key, Entry, NoHasher>,
}

impl AlignedBuf {
	pub fn copy_from(bytes: &[u8]) -> Self {
		// zero-sized layouts are not allocatable, so reserve at least one byte
		let layout = Layout::from_size_align(bytes.len().max(1), BUFFER_ALIGN)
			.expect("invalid buffer layout");

		let raw = unsafe { alloc(layout) };

		let Some(ptr) = NonNull::new(raw) else {
			handle_alloc_error(layout);
		};

		unsafe {
			ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
		}

		AlignedBuf {
			ptr,
			len: bytes.len(),
		}
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.len
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
	}
}

impl Deref for AlignedBuf {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		self.as_slice()
	}
}

impl Drop for AlignedBuf {
	fn drop(&mut self) {
		// must mirror the layout used in copy_from
		let layout = Layout::from_size_align(self.len.max(1), BUFFER_ALIGN)
			.expect("invalid buffer layout");

		unsafe {
			dealloc(self.ptr.as_ptr(), layout);
		}
	}
}

// the buffer is immutable after construction and uniquely owns its allocation
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl Entry {
	pub fn new(key: Key, data: AlignedBuf) -> Self {
		Entry {
			key,
			data: Arc::new(data),

			level: 0,
			freq: 1,
		}
	}

	#[must_use]
	pub fn key(&self) -> Key {
		self.key
	}

	/// Returns the entry's size in bytes.
	#[must_use]
	pub fn size(&self) -> ObjectSize {
		self.data.len() as ObjectSize
	}

	#[must_use]
	pub fn data(&self) -> Arc<AlignedBuf> {
		self.data.clone()
	}

	/// The entry's residency level. Only meaningful under the leveled policy.
	#[must_use]
	pub fn level(&self) -> u8 {
		self.level
	}

	/// The entry's access count. Only meaningful under the LFU family.
	#[must_use]
	pub fn freq(&self) -> u64 {
		self.freq
	}

	pub(crate) fn set_level(&mut self, level: u8) {
		self.level = level;
	}

	pub(crate) fn set_freq(&mut self, freq: u64) {
		self.freq = freq;
	}
}

impl ItemMap {
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	#[must_use]
	pub fn contains(&self, key: Key) -> bool {
		self.entries.contains_key(&key)
	}

	#[must_use]
	pub fn get(&self, key: Key) -> Option<&Entry> {
		self.entries.get(&key)
	}

	pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut Entry> {
		self.entries.get_mut(&key)
	}

	pub(crate) fn insert(&mut self, entry: Entry) -> Option<Entry> {
		self.entries.insert(entry.key(), entry)
	}

	pub(crate) fn remove(&mut self, key: Key) -> Option<Entry> {
		self.entries.remove(&key)
	}

	pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
		self.entries.keys().copied()
	}

	/// Sums the sizes of all cached entries.
	#[must_use]
	pub fn total_bytes(&self) -> CacheSize {
		self.entries
			.values()
			.map(Entry::size)
			.sum()
	}
}

#[cfg(test)]
mod tests {
	use crate::object::{AlignedBuf, Entry, ItemMap, BUFFER_ALIGN};

	#[test]
	fn buffer_allocation_is_aligned() {
		let buf = AlignedBuf::copy_from(&[1, 2, 3, 4]);
		assert_eq!(buf.as_slice().as_ptr() as usize % BUFFER_ALIGN, 0);
	}

	#[test]
	fn buffer_round_trips_bytes() {
		let bytes: Vec<u8> = (0..255).collect();
		let buf = AlignedBuf::copy_from(&bytes);

		assert_eq!(buf.len(), bytes.len());
		assert_eq!(buf.as_slice(), &bytes[..]);
	}

	#[test]
	fn empty_buffer_is_valid() {
		let buf = AlignedBuf::copy_from(&[]);

		assert!(buf.is_empty());
		assert_eq!(buf.as_slice(), &[] as &[u8]);
	}

	#[test]
	fn item_map_tracks_total_bytes() {
		let mut items = ItemMap::default();

		items.insert(Entry::new(1, AlignedBuf::copy_from(&[0u8; 100])));
		items.insert(Entry::new(2, AlignedBuf::copy_from(&[0u8; 50])));

		assert_eq!(items.len(), 2);
		assert_eq!(items.total_bytes(), 150);

		let removed = items.remove(1).expect("missing entry");
		assert_eq!(removed.size(), 100);
		assert_eq!(items.total_bytes(), 50);
		assert!(!items.contains(1));
	}

	#[test]
	fn entry_data_survives_removal() {
		let mut items = ItemMap::default();
		items.insert(Entry::new(7, AlignedBuf::copy_from(b"posting")));

		let data = items.get(7).map(|entry| entry.data()).expect("missing entry");
		items.remove(7);

		assert_eq!(data.as_slice(), b"posting");
	}
}
