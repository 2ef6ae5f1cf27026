/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum CacheError {
	#[error("internal error")]
	Internal,

	#[error("the cache capacity cannot be zero")]
	ZeroCapacity,

	#[error("invalid policy configuration")]
	InvalidPolicy,

	#[error("unknown thread id")]
	UnknownThreadId,

	#[error("no pending batch for the thread")]
	NoPendingBatch,

	#[error("request batch and miss bitmap lengths differ")]
	MismatchedBatch,

	#[error("could not export the stat trace")]
	Export,
}
