/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod core;
mod lru_core;
mod lfu_core;
mod fifo_core;

mod single_tier;
mod two_q;
mod leveled;
mod batch_read;

use std::{fmt, sync::Arc};

use crate::{
	error::CacheError,
	object::{AlignedBuf, ItemMap},
	pending::{BatchContext, PendingBatch},
	stats::AtomicStats,
	CacheSize,
	Key,
};

use crate::policy::{
	batch_read::BatchReadEngine,
	fifo_core::FifoCore,
	leveled::LeveledEngine,
	lfu_core::LfuCore,
	lru_core::LruCore,
	single_tier::SingleTierEngine,
	two_q::TwoQEngine,
};

pub use crate::policy::batch_read::ReadBatch;

pub const DEFAULT_LEVELS: u8 = 4;
pub const DEFAULT_PROMOTION_THRESHOLD: u32 = 4;

const MIN_LEVELS: u8 = 3;
const MAX_LEVELS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CachePolicy {
	Lru,
	Lfu,
	Fifo,
	TwoQ,

	/// Leveled correlated LFU with `(levels, promotion_threshold)`.
	LeveledCorrLfu(u8, u32),

	/// Batch-read cache with `(lfu_capacity_bytes, fifo_capacity_bytes)`.
	BatchRead(CacheSize, CacheSize),
}

/// One eviction policy behind the facade: a read-only lookup on the query
/// path and a bulk metadata refresh after disk I/O completes.
pub(crate) trait PolicyEngine
where
	Self: Send,
{
	fn is_policy(&self, policy: &CachePolicy) -> bool;

	fn len(&self) -> usize;
	fn used_size(&self) -> CacheSize;
	fn contains(&self, key: Key) -> bool;

	/// Classifies the key and returns its bytes on a hit, recording the
	/// outcome in the caller's pending-update log. Never mutates metadata.
	fn lookup(
		&self,
		items: &ItemMap,
		key: Key,
		ctx: &mut BatchContext,
	) -> Option<Arc<AlignedBuf>>;

	/// Applies one query batch's stashed mutations: hit touches and
	/// promotions, staged inserts, and evictions back to budget.
	fn apply_refresh(
		&mut self,
		items: &mut ItemMap,
		batch: PendingBatch,
		stats: &AtomicStats,
	) -> Result<(), CacheError>;
}

impl CachePolicy {
	pub fn leveled_default() -> Self {
		CachePolicy::LeveledCorrLfu(DEFAULT_LEVELS, DEFAULT_PROMOTION_THRESHOLD)
	}

	pub(crate) fn validate(&self, capacity: CacheSize) -> Result<(), CacheError> {
		match self {
			CachePolicy::BatchRead(lfu_capacity, fifo_capacity) => {
				if *lfu_capacity == 0 || *fifo_capacity == 0 {
					return Err(CacheError::ZeroCapacity);
				}
			},

			CachePolicy::LeveledCorrLfu(levels, _) => {
				if capacity == 0 {
					return Err(CacheError::ZeroCapacity);
				}

				if !(MIN_LEVELS..=MAX_LEVELS).contains(levels) {
					return Err(CacheError::InvalidPolicy);
				}
			},

			_ => {
				if capacity == 0 {
					return Err(CacheError::ZeroCapacity);
				}
			},
		}

		Ok(())
	}
}

impl fmt::Display for CachePolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CachePolicy::Lru => write!(f, "lru"),
			CachePolicy::Lfu => write!(f, "lfu"),
			CachePolicy::Fifo => write!(f, "fifo"),
			CachePolicy::TwoQ => write!(f, "2q"),

			CachePolicy::LeveledCorrLfu(levels, threshold) => {
				write!(f, "leveled-corr-lfu({levels}, {threshold})")
			},

			CachePolicy::BatchRead(lfu_capacity, fifo_capacity) => {
				write!(f, "batch-read({lfu_capacity}, {fifo_capacity})")
			},
		}
	}
}

pub(crate) fn init_policy_engine(
	policy: CachePolicy,
	capacity: CacheSize,
) -> Box<dyn PolicyEngine> {
	match policy {
		CachePolicy::Lru => {
			Box::new(SingleTierEngine::new(policy, LruCore::new(capacity)))
		},

		CachePolicy::Lfu => {
			Box::new(SingleTierEngine::new(policy, LfuCore::new(capacity)))
		},

		CachePolicy::Fifo => {
			Box::new(SingleTierEngine::new(policy, FifoCore::new(capacity)))
		},

		CachePolicy::TwoQ => Box::new(TwoQEngine::new(capacity)),

		CachePolicy::LeveledCorrLfu(levels, threshold) => {
			Box::new(LeveledEngine::new(capacity, levels, threshold))
		},

		CachePolicy::BatchRead(lfu_capacity, fifo_capacity) => {
			Box::new(BatchReadEngine::new(lfu_capacity, fifo_capacity))
		},
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		error::CacheError,
		policy::CachePolicy,
	};

	#[test]
	fn it_validates_policy_configuration() {
		assert_eq!(CachePolicy::Lru.validate(1000), Ok(()));
		assert_eq!(CachePolicy::Lru.validate(0), Err(CacheError::ZeroCapacity));

		assert_eq!(CachePolicy::leveled_default().validate(1000), Ok(()));

		assert_eq!(
			CachePolicy::LeveledCorrLfu(2, 4).validate(1000),
			Err(CacheError::InvalidPolicy),
		);

		assert_eq!(
			CachePolicy::BatchRead(0, 1000).validate(0),
			Err(CacheError::ZeroCapacity),
		);

		assert_eq!(CachePolicy::BatchRead(500, 1000).validate(0), Ok(()));
	}

	#[test]
	fn engines_report_their_policy() {
		use crate::policy::{init_policy_engine, PolicyEngine};

		let policies = [
			CachePolicy::Lru,
			CachePolicy::Lfu,
			CachePolicy::Fifo,
			CachePolicy::TwoQ,
			CachePolicy::leveled_default(),
			CachePolicy::BatchRead(500, 500),
		];

		for policy in policies {
			let engine = init_policy_engine(policy, 1000);

			assert!(engine.is_policy(&policy));
			assert_eq!(engine.len(), 0);
		}
	}
}
