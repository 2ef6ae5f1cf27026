/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::Arc,
};

use log::{debug, error, warn};

use crate::{
	error::CacheError,
	object::{AlignedBuf, Entry, ItemMap},
	pending::{BatchContext, PendingBatch, UpdateKind},
	policy::{
		core::EvictionCore,
		fifo_core::FifoCore,
		lfu_core::LfuCore,
		CachePolicy,
		PolicyEngine,
	},
	stats::AtomicStats,
	BatchId,
	CacheSize,
	Key,
	NoHasher,
	ObjectSize,
};

/// A group of posting lists fetched together on one query miss, retained as a
/// unit so a later query touching any member prefetches its siblings.
pub struct ReadBatch {
	id: BatchId,
	total_bytes: CacheSize,

	keys: BTreeMap<Key, ObjectSize>,
}

/// The batch-read cache: a byte-budgeted LFU of hot posting lists in front of
/// a FIFO of read batches. A batch hit surfaces the whole group through the
/// caller's prefetch window and consumes the batch on refresh; members the
/// query touched are promoted into the hot tier, the rest are dropped.
pub struct BatchReadEngine {
	lfu: LfuCore,
	fifo: FifoCore,

	batches: HashMap<BatchId, ReadBatch, NoHasher>,
	posting_to_batch: HashMap<Key, BatchId, NoHasher>,

	in_use: HashSet<BatchId, NoHasher>,
	next_batch_id: BatchId,
}

impl ReadBatch {
	pub fn new(id: BatchId) -> Self {
		ReadBatch {
			id,
			total_bytes: 0,

			keys: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn id(&self) -> BatchId {
		self.id
	}

	#[must_use]
	pub fn total_bytes(&self) -> CacheSize {
		self.total_bytes
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	#[must_use]
	pub fn contains(&self, key: Key) -> bool {
		self.keys.contains_key(&key)
	}

	pub fn add_key(&mut self, key: Key, size: ObjectSize) {
		if self.keys.insert(key, size).is_none() {
			self.total_bytes += size;
		}
	}

	pub fn remove_key(&mut self, key: Key) -> Option<ObjectSize> {
		let size = self.keys.remove(&key)?;
		self.total_bytes -= size;

		Some(size)
	}

	pub fn keys(&self) -> impl Iterator<Item = (Key, ObjectSize)> + '_ {
		self.keys
			.iter()
			.map(|(key, size)| (*key, *size))
	}

	fn into_keys(self) -> BTreeMap<Key, ObjectSize> {
		self.keys
	}
}

impl BatchReadEngine {
	pub fn new(lfu_capacity: CacheSize, fifo_capacity: CacheSize) -> Self {
		BatchReadEngine {
			lfu: LfuCore::new(lfu_capacity),
			fifo: FifoCore::new(fifo_capacity),

			batches: HashMap::default(),
			posting_to_batch: HashMap::default(),

			in_use: HashSet::default(),
			next_batch_id: 0,
		}
	}

	/// Hands out the first unused batch id at or after `next_batch_id` and
	/// marks it in use.
	fn allocate_batch_id(&mut self) -> BatchId {
		let mut candidate = self.next_batch_id;

		while self.in_use.contains(&candidate) {
			candidate = candidate.wrapping_add(1);
		}

		self.in_use.insert(candidate);

		candidate
	}

	fn deallocate_batch_id(&mut self, id: BatchId) {
		self.in_use.remove(&id);
	}

	fn touch_hot(&mut self, items: &mut ItemMap, key: Key) {
		let Some(freq) = self.lfu.touch(key) else {
			debug!("Skipping a hit on key {key} that raced an eviction");
			return;
		};

		if let Some(entry) = items.get_mut(key) {
			entry.set_freq(freq);
		}
	}

	/// Consumes the read batch holding `key`: members the query batch touched
	/// are promoted into the hot tier, the rest leave the cache, and the
	/// batch id is freed.
	fn consume_batch(
		&mut self,
		items: &mut ItemMap,
		stats: &AtomicStats,
		key: Key,
		hit_keys: &HashSet<Key, NoHasher>,
	) -> Result<(), CacheError> {
		let Some(batch_id) = self.posting_to_batch.get(&key).copied() else {
			// the batch was already consumed by an earlier hit in this
			// refresh and the key now lives in the hot tier
			self.touch_hot(items, key);
			return Ok(());
		};

		let Some(read_batch) = self.batches.remove(&batch_id) else {
			error!("Read batch {batch_id} is referenced by key {key} but not tracked");

			if cfg!(debug_assertions) {
				return Err(CacheError::Internal);
			}

			self.posting_to_batch.remove(&key);
			return Ok(());
		};

		self.fifo.erase(batch_id);
		self.deallocate_batch_id(batch_id);

		for (member, size) in read_batch.into_keys() {
			self.posting_to_batch.remove(&member);

			if hit_keys.contains(&member) {
				self.lfu.evict_until(items, stats, size);
				self.lfu.insert(member, size);

				if let Some(entry) = items.get_mut(member) {
					entry.set_freq(1);
				}
			} else {
				if let Some(entry) = items.remove(member) {
					stats.update_current_size(-(entry.size() as i64));
				}

				stats.incr_evictions(1);
			}
		}

		Ok(())
	}

	/// Evicts whole read batches until `incoming` more bytes fit in the FIFO
	/// budget. Every member of an evicted batch leaves the cache and the
	/// batch id becomes reallocatable.
	fn evict_batches_until(
		&mut self,
		items: &mut ItemMap,
		stats: &AtomicStats,
		incoming: CacheSize,
	) {
		while self.fifo.would_overflow(incoming) {
			let Some((batch_id, _)) = self.fifo.evict_one() else {
				break;
			};

			let Some(read_batch) = self.batches.remove(&batch_id) else {
				error!("Evicted read batch {batch_id} is not tracked");
				continue;
			};

			self.deallocate_batch_id(batch_id);

			for (member, _) in read_batch.into_keys() {
				self.posting_to_batch.remove(&member);

				if let Some(entry) = items.remove(member) {
					stats.update_current_size(-(entry.size() as i64));
				}

				stats.incr_evictions(1);
			}
		}
	}
}

impl PolicyEngine for BatchReadEngine {
	fn is_policy(&self, policy: &CachePolicy) -> bool {
		matches!(
			policy,
			CachePolicy::BatchRead(lfu_capacity, fifo_capacity)
				if *lfu_capacity == self.lfu.capacity()
					&& *fifo_capacity == self.fifo.capacity()
		)
	}

	fn len(&self) -> usize {
		self.lfu.len() + self.posting_to_batch.len()
	}

	fn used_size(&self) -> CacheSize {
		self.lfu.used_size() + self.fifo.used_size()
	}

	fn contains(&self, key: Key) -> bool {
		self.lfu.contains(key) || self.posting_to_batch.contains_key(&key)
	}

	fn lookup(
		&self,
		items: &ItemMap,
		key: Key,
		ctx: &mut BatchContext,
	) -> Option<Arc<AlignedBuf>> {
		if let Some(batch_id) = self.posting_to_batch.get(&key) {
			let Some(read_batch) = self.batches.get(batch_id) else {
				error!("Read batch {batch_id} is referenced by key {key} but not tracked");
				ctx.push_update(key, UpdateKind::Miss);
				return None;
			};

			let Some(entry) = items.get(key) else {
				ctx.push_update(key, UpdateKind::Miss);
				return None;
			};

			// surface the whole group; the requested key is returned
			// directly, its siblings wait in the prefetch window
			for (member, _) in read_batch.keys() {
				if member == key || ctx.window_contains(member) {
					continue;
				}

				let Some(sibling) = items.get(member) else {
					continue;
				};

				ctx.push_window(member, sibling.data());
			}

			ctx.push_update(key, UpdateKind::FifoHit);
			return Some(entry.data());
		}

		if self.lfu.contains(key) {
			let Some(entry) = items.get(key) else {
				ctx.push_update(key, UpdateKind::Miss);
				return None;
			};

			ctx.push_update(key, UpdateKind::LfuHit);
			return Some(entry.data());
		}

		ctx.push_update(key, UpdateKind::Miss);
		None
	}

	fn apply_refresh(
		&mut self,
		items: &mut ItemMap,
		batch: PendingBatch,
		stats: &AtomicStats,
	) -> Result<(), CacheError> {
		self.lfu.evict_until(items, stats, 0);
		self.evict_batches_until(items, stats, 0);

		let hit_keys: HashSet<Key, NoHasher> = batch.hit_keys
			.iter()
			.copied()
			.collect();

		for update in &batch.updates {
			match update.kind {
				UpdateKind::LfuHit => self.touch_hot(items, update.key),
				UpdateKind::FifoHit => self.consume_batch(items, stats, update.key, &hit_keys)?,
				UpdateKind::Miss | UpdateKind::Hit => {},
			}
		}

		let batch_id = self.allocate_batch_id();
		let mut read_batch = ReadBatch::new(batch_id);

		for staged in batch.staged {
			if items.contains(staged.key) {
				debug!("Ignoring duplicate insert of key {}", staged.key);
				continue;
			}

			let size = staged.data.len() as ObjectSize;

			items.insert(Entry::new(staged.key, staged.data));
			stats.update_current_size(size as i64);

			self.posting_to_batch.insert(staged.key, batch_id);
			read_batch.add_key(staged.key, size);
		}

		if read_batch.is_empty() {
			// no member joined, so the id goes straight back
			self.deallocate_batch_id(batch_id);
			return Ok(());
		}

		if read_batch.total_bytes() > self.fifo.capacity() {
			warn!(
				"Admitting a read batch of {} byte(s) over a budget of {} byte(s)",
				read_batch.total_bytes(),
				self.fifo.capacity(),
			);
		}

		self.evict_batches_until(items, stats, read_batch.total_bytes());

		self.fifo.insert(batch_id, read_batch.total_bytes());
		self.batches.insert(batch_id, read_batch);

		self.next_batch_id = batch_id.wrapping_add(1);

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use crate::{
		object::{AlignedBuf, Entry, ItemMap},
		policy::{batch_read::BatchReadEngine, core::EvictionCore},
		stats::AtomicStats,
	};

	#[test]
	fn released_batch_ids_are_reallocatable() {
		let mut engine = BatchReadEngine::new(500, 1000);

		let first = engine.allocate_batch_id();
		assert_eq!(first, 0);

		// an unformed batch hands its id straight back
		engine.deallocate_batch_id(first);
		assert_eq!(engine.allocate_batch_id(), 0);

		// a live id is skipped over
		assert_eq!(engine.allocate_batch_id(), 1);
	}

	#[test]
	fn consuming_a_batch_promotes_touched_members() {
		let mut engine = BatchReadEngine::new(500, 1000);
		let mut items = ItemMap::default();
		let stats = AtomicStats::default();

		let batch_id = engine.allocate_batch_id();
		let mut read_batch = super::ReadBatch::new(batch_id);

		for key in [1, 2, 3] {
			items.insert(Entry::new(key, AlignedBuf::copy_from(&[0u8; 100])));
			stats.update_current_size(100);

			engine.posting_to_batch.insert(key, batch_id);
			read_batch.add_key(key, 100);
		}

		engine.fifo.insert(batch_id, read_batch.total_bytes());
		engine.batches.insert(batch_id, read_batch);

		let hit_keys: HashSet<_, _> = [1u64, 2].into_iter().collect();

		engine
			.consume_batch(&mut items, &stats, 1, &hit_keys)
			.expect("could not consume the batch");

		assert!(engine.lfu.contains(1));
		assert!(engine.lfu.contains(2));
		assert!(!items.contains(3));

		assert!(engine.batches.is_empty());
		assert!(engine.posting_to_batch.is_empty());
		assert!(!engine.in_use.contains(&batch_id));

		assert_eq!(engine.fifo.used_size(), 0);
		assert_eq!(stats.evictions(), 1);
		assert_eq!(stats.current_size(), 200);
	}
}
