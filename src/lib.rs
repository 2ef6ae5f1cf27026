/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::atomic::AtomicU64;

use nohash_hasher::BuildNoHashHasher;

mod cache;
mod lock;
mod object;
mod pending;
mod request;
mod trace;

pub mod stats;
pub use crate::stats::*;

pub mod policy;
pub use crate::policy::{CachePolicy, DEFAULT_LEVELS, DEFAULT_PROMOTION_THRESHOLD};

mod error;
pub use crate::error::CacheError;

pub use crate::cache::{CacheConfig, PostingCache};
pub use crate::lock::{LockKind, LockStat, LOCK_STAT_CAPACITY};
pub use crate::object::{AlignedBuf, Entry, ItemMap, BUFFER_ALIGN};
pub use crate::pending::BatchContext;
pub use crate::request::{ListInfo, ReadRequest};
pub use crate::trace::{RefreshRecord, StatTrace};

/// A cache key: the posting list's byte offset plus its intra-page offset.
pub type Key = u64;

pub type CacheSize = u64;
pub type ObjectSize = u64;
pub type BatchId = u64;

pub type AtomicCacheSize = AtomicU64;

pub(crate) type NoHasher = BuildNoHashHasher<u64>;

/// The number of per-thread pending-update slots. Thread ids supplied to
/// `note_requests` and `refresh` must be below this bound.
pub const MAX_THREADS: usize = 8192;
