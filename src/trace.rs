/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::path::Path;

use log::{error, info};
use serde::Serialize;

use crate::{error::CacheError, stats::StatSnapshot};

/// One exported row per refresh. Hit and miss counts are local to the batch;
/// reuse counts prefetch-window pops that issued no cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RefreshRecord {
	pub hit_count: u64,
	pub miss_count: u64,
	pub reuse_count: u64,

	pub sum_get_latency_ms: f64,
	pub batch_read_latency_ms: f64,
}

/// Append-only per-refresh history: one cumulative snapshot and one batch
/// record per refresh.
#[derive(Debug, Default)]
pub struct StatTrace {
	snapshots: Vec<StatSnapshot>,
	records: Vec<RefreshRecord>,
}

impl StatTrace {
	pub fn push(&mut self, snapshot: StatSnapshot, record: RefreshRecord) {
		self.snapshots.push(snapshot);
		self.records.push(record);
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	#[must_use]
	pub fn snapshots(&self) -> &[StatSnapshot] {
		&self.snapshots
	}

	#[must_use]
	pub fn records(&self) -> &[RefreshRecord] {
		&self.records
	}

	/// Writes the batch records as tab-separated rows, one per refresh, with
	/// no header.
	pub fn export_tsv(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
		let mut writer = csv::WriterBuilder::new()
			.delimiter(b'\t')
			.has_headers(false)
			.from_path(path.as_ref())
			.map_err(|err| {
				error!("Could not open the stat trace file: {err:?}");
				CacheError::Export
			})?;

		for record in &self.records {
			writer.serialize(record).map_err(|err| {
				error!("Could not write a stat trace row: {err:?}");
				CacheError::Export
			})?;
		}

		writer.flush().map_err(|err| {
			error!("Could not flush the stat trace file: {err:?}");
			CacheError::Export
		})?;

		info!("Exported {} stat trace row(s)", self.records.len());

		Ok(())
	}
}
