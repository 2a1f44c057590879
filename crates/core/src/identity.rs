// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deterministic snapshot naming
//!
//! Reconciliation correlates engine objects back to metadata purely by
//! name, so every name the core hands to the engine is built here:
//!
//! - snapshot id: `{normalized_group_name}_{hash8}`
//! - engine object: `{snapshot_id}_{database}`
//! - sparse file: `{base}/{snapshot_id}_{database}[_{logical_name}].ss`

use chrono::{DateTime, SecondsFormat, Utc};
use rewind_sdk::DatabaseGroup;
use sha2::{Digest, Sha256};

use crate::{
	engine::{DataFile, SparseFile},
	metadata::{MetadataError, MetadataStore},
};

/// Hex characters of the display-name hash kept in a snapshot id
pub const ID_HASH_LEN: usize = 8;

/// Sparse file extension
pub const SPARSE_FILE_EXTENSION: &str = "ss";

/// Lowercase ASCII alphanumerics of a group name
pub fn normalize_group_name(group_name: &str) -> String {
	let normalized: String = group_name
		.chars()
		.filter(|c| c.is_ascii_alphanumeric())
		.map(|c| c.to_ascii_lowercase())
		.collect();

	if normalized.is_empty() {
		"group".to_string()
	} else {
		normalized
	}
}

/// Name prefix shared by every engine object of a group
pub fn group_prefix(group_name: &str) -> String {
	format!("{}_", normalize_group_name(group_name))
}

/// Build a snapshot id from the group name, label and creation instant
///
/// Same inputs always give the same id. Collisions need an identical
/// label at the identical millisecond and are not guarded against.
pub fn generate_snapshot_id(group_name: &str, display_name: &str, time: DateTime<Utc>) -> String {
	let timestamp = time.to_rfc3339_opts(SecondsFormat::Millis, true);
	let digest = Sha256::digest(format!("{}{}", display_name, timestamp).as_bytes());
	let hash = hex::encode(digest);

	format!(
		"{}_{}",
		normalize_group_name(group_name),
		&hash[..ID_HASH_LEN]
	)
}

/// Operator label as stored; callers reject blank labels upstream
pub fn generate_display_name(raw: &str) -> String {
	raw.trim().to_string()
}

/// Sequence for the next snapshot of a group: highest existing plus one,
/// 1 for a group without snapshots
///
/// Deleting an older snapshot never hands its sequence out again. Not
/// atomic: the service serializes creators per group.
pub fn next_sequence(store: &dyn MetadataStore, group_id: &str) -> Result<u32, MetadataError> {
	let highest = store
		.snapshots_for_group(group_id)?
		.iter()
		.map(|s| s.sequence)
		.max()
		.unwrap_or(0);
	Ok(highest.saturating_add(1))
}

/// Engine snapshot object name for one database of a snapshot
pub fn engine_object_name(snapshot_id: &str, database: &str) -> String {
	format!("{}_{}", snapshot_id, database)
}

/// Path of one sparse file under `base`
///
/// The separator follows the base path so Windows paths stay Windows paths.
pub fn sparse_file_path(
	base: &str,
	snapshot_id: &str,
	database: &str,
	logical_name: Option<&str>,
) -> String {
	let separator = if base.contains('\\') { '\\' } else { '/' };
	let base = base.trim_end_matches(['/', '\\']);
	let stem = match logical_name {
		Some(logical) => format!("{}_{}", engine_object_name(snapshot_id, database), logical),
		None => engine_object_name(snapshot_id, database),
	};

	format!("{}{}{}.{}", base, separator, stem, SPARSE_FILE_EXTENSION)
}

/// One sparse file per data file; the logical name is only appended when
/// there is more than one data file
pub fn sparse_files(
	base: &str,
	snapshot_id: &str,
	database: &str,
	files: &[DataFile],
) -> Vec<SparseFile> {
	let qualify = files.len() > 1;
	files
		.iter()
		.map(|file| SparseFile {
			logical_name: file.logical_name.clone(),
			path: sparse_file_path(
				base,
				snapshot_id,
				database,
				qualify.then_some(file.logical_name.as_str()),
			),
		})
		.collect()
}

/// An engine object name that follows this crate's naming scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedName<'a> {
	pub group: &'a DatabaseGroup,
	pub snapshot_id: String,
	pub database: String,
}

/// Match `name` against `{group_prefix}{hash8}_{database}` for a known
/// group and one of its member databases
pub fn recognize_object_name<'a>(
	name: &str,
	groups: &'a [DatabaseGroup],
) -> Option<RecognizedName<'a>> {
	groups.iter().find_map(|group| {
		let rest = name.strip_prefix(&group_prefix(&group.name))?;
		let hash = rest.get(..ID_HASH_LEN)?;
		if !hash
			.chars()
			.all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
		{
			return None;
		}
		let database = rest.get(ID_HASH_LEN..)?.strip_prefix('_')?;
		if !group.contains(database) {
			return None;
		}

		Some(RecognizedName {
			group,
			snapshot_id: name[..name.len() - database.len() - 1].to_string(),
			database: database.to_string(),
		})
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn at(ts: &str) -> DateTime<Utc> {
		DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
	}

	#[test]
	fn test_normalize_group_name() {
		assert_eq!(normalize_group_name("Billing Team-2"), "billingteam2");
		assert_eq!(normalize_group_name("  "), "group");
	}

	#[test]
	fn test_snapshot_id_is_deterministic() {
		let t = at("2025-03-01T12:00:00Z");
		let a = generate_snapshot_id("Billing", "EOD", t);
		let b = generate_snapshot_id("Billing", "EOD", t);
		assert_eq!(a, b);
		assert!(a.starts_with("billing_"));
		assert_eq!(a.len(), "billing_".len() + ID_HASH_LEN);
		assert!(a["billing_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn test_snapshot_id_changes_with_label_and_time() {
		let t = at("2025-03-01T12:00:00Z");
		let base = generate_snapshot_id("billing", "EOD", t);
		assert_ne!(base, generate_snapshot_id("billing", "SOD", t));
		assert_ne!(
			base,
			generate_snapshot_id("billing", "EOD", at("2025-03-01T12:00:00.001Z"))
		);
	}

	#[test]
	fn test_display_name_trimmed() {
		assert_eq!(generate_display_name("  before deploy \n"), "before deploy");
	}

	#[test]
	fn test_sparse_file_paths() {
		assert_eq!(
			sparse_file_path("C:\\Snapshots\\", "billing_ab12cd34", "orders", None),
			"C:\\Snapshots\\billing_ab12cd34_orders.ss"
		);
		assert_eq!(
			sparse_file_path("/var/snap", "billing_ab12cd34", "orders", Some("orders_data2")),
			"/var/snap/billing_ab12cd34_orders_orders_data2.ss"
		);
	}

	#[test]
	fn test_sparse_files_qualify_only_multiple() {
		let one = vec![DataFile {
			logical_name: "orders".to_string(),
			physical_name: "/data/orders.mdf".to_string(),
		}];
		let files = sparse_files("/snap", "s_0000aaaa", "orders", &one);
		assert_eq!(files[0].path, "/snap/s_0000aaaa_orders.ss");

		let mut two = one.clone();
		two.push(DataFile {
			logical_name: "orders2".to_string(),
			physical_name: "/data/orders2.ndf".to_string(),
		});
		let files = sparse_files("/snap", "s_0000aaaa", "orders", &two);
		assert_eq!(files[1].path, "/snap/s_0000aaaa_orders_orders2.ss");
	}

	#[test]
	fn test_recognize_object_name() {
		let groups = vec![DatabaseGroup::new(
			"g1",
			"Billing",
			vec!["orders".to_string(), "order_lines".to_string()],
		)];

		let recognized = recognize_object_name("billing_ab12cd34_order_lines", &groups).unwrap();
		assert_eq!(recognized.snapshot_id, "billing_ab12cd34");
		assert_eq!(recognized.database, "order_lines");
		assert_eq!(recognized.group.id, "g1");

		assert!(recognize_object_name("billing_ab12cd34_payroll", &groups).is_none());
		assert!(recognize_object_name("billing_zz12cd34_orders", &groups).is_none());
		assert!(recognize_object_name("orders_snapshot_billing_1", &groups).is_none());
	}
}
