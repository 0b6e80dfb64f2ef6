//! Update-mask application.
//!
//! With mask `M`, only the field paths in `M` are written; dotted paths
//! address nested map fields. A mask path whose incoming value is absent or
//! null deletes that path. Applying the same mask and data twice yields the
//! same document as applying it once.

use crate::prelude::*;
use crate::value::{FieldMap, FieldValue, validate_field_name};

/// Split and validate a dotted field path.
pub fn split_field_path(path: &str) -> EbResult<Vec<&str>> {
	if path.is_empty() {
		return Err(Error::InvalidArgument("empty field path".into()));
	}
	let parts: Vec<&str> = path.split('.').collect();
	for part in &parts {
		validate_field_name(part)?;
	}
	Ok(parts)
}

/// Apply an update mask: copy each masked path from `incoming` into
/// `existing`, deleting paths the incoming data omits or nulls out.
pub fn apply_update_mask(
	existing: &mut FieldMap,
	incoming: &FieldMap,
	mask: &[String],
) -> EbResult<()> {
	for path in mask {
		let parts = split_field_path(path)?;
		match get_at_path(incoming, &parts) {
			Some(value) if *value != FieldValue::Null => {
				set_at_path(existing, &parts, value.clone())?;
			}
			_ => delete_at_path(existing, &parts),
		}
	}
	Ok(())
}

/// Read a nested value by path components. None when any component is
/// missing or an intermediate is not a map.
pub fn get_at_path<'a>(fields: &'a FieldMap, parts: &[&str]) -> Option<&'a FieldValue> {
	let (first, rest) = parts.split_first()?;
	let value = fields.get(*first)?;
	if rest.is_empty() {
		return Some(value);
	}
	match value {
		FieldValue::Map(inner) => get_at_path(inner, rest),
		_ => None,
	}
}

/// Write a nested value, creating intermediate maps. Fails with
/// `FailedPrecondition` when an intermediate exists but is not a map.
pub fn set_at_path(fields: &mut FieldMap, parts: &[&str], value: FieldValue) -> EbResult<()> {
	let (first, rest) = match parts.split_first() {
		Some(split) => split,
		None => return Err(Error::InvalidArgument("empty field path".into())),
	};
	if rest.is_empty() {
		fields.insert((*first).to_string(), value);
		return Ok(());
	}

	let entry = fields
		.entry((*first).to_string())
		.or_insert_with(|| FieldValue::Map(FieldMap::new()));
	match entry {
		FieldValue::Map(inner) => set_at_path(inner, rest, value),
		_ => Err(Error::FailedPrecondition(format!(
			"field path not addressable: '{}' is not a map",
			first
		))),
	}
}

/// Remove a nested value. Missing paths are a no-op.
pub fn delete_at_path(fields: &mut FieldMap, parts: &[&str]) {
	let (first, rest) = match parts.split_first() {
		Some(split) => split,
		None => return,
	};
	if rest.is_empty() {
		fields.remove(*first);
		return;
	}
	if let Some(FieldValue::Map(inner)) = fields.get_mut(*first) {
		delete_at_path(inner, rest);
	}
}


// vim: ts=4
