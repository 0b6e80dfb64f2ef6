//! Set-merge semantics.
//!
//! `Set` with the merge flag deep-merges map fields, replaces arrays
//! wholesale, and overwrites scalars. Fields absent from the patch are left
//! unchanged. Without the merge flag, `Set` replaces the entire field map
//! (handled by the caller).

use crate::value::{FieldMap, FieldValue};

/// Deep-merge `patch` into `target`.
pub fn deep_merge(target: &mut FieldMap, patch: &FieldMap) {
	for (key, patch_value) in patch {
		match (target.get_mut(key), patch_value) {
			// Map into map: recurse
			(Some(FieldValue::Map(target_inner)), FieldValue::Map(patch_inner)) => {
				deep_merge(target_inner, patch_inner);
			}
			// Arrays, scalars, and type changes overwrite entirely
			_ => {
				target.insert(key.clone(), patch_value.clone());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::decode_fields;
	use serde_json::json;

	fn fields(v: serde_json::Value) -> FieldMap {
		match decode_fields(&v) {
			Ok(f) => f,
			Err(err) => panic!("decode failed: {}", err),
		}
	}

	#[test]
	fn test_scalars_overwrite_and_add() {
		let mut target = fields(json!({
			"a": { "integerValue": "1" },
			"b": { "integerValue": "2" },
		}));
		let patch = fields(json!({
			"b": { "integerValue": "3" },
			"c": { "integerValue": "4" },
		}));
		deep_merge(&mut target, &patch);
		let expected = fields(json!({
			"a": { "integerValue": "1" },
			"b": { "integerValue": "3" },
			"c": { "integerValue": "4" },
		}));
		assert_eq!(target, expected);
	}

	#[test]
	fn test_nested_maps_merge_deeply() {
		let mut target = fields(json!({
			"profile": { "mapValue": { "fields": {
				"age": { "integerValue": "30" },
				"city": { "stringValue": "NYC" },
			} } },
		}));
		let patch = fields(json!({
			"profile": { "mapValue": { "fields": { "age": { "integerValue": "31" } } } },
		}));
		deep_merge(&mut target, &patch);
		// city survives: merge is deep, not a replace
		let expected = fields(json!({
			"profile": { "mapValue": { "fields": {
				"age": { "integerValue": "31" },
				"city": { "stringValue": "NYC" },
			} } },
		}));
		assert_eq!(target, expected);
	}

	#[test]
	fn test_arrays_replaced_not_merged() {
		let mut target = fields(json!({
			"tags": { "arrayValue": { "values": [
				{ "stringValue": "a" },
				{ "stringValue": "b" },
				{ "stringValue": "c" },
			] } },
		}));
		let patch = fields(json!({
			"tags": { "arrayValue": { "values": [
				{ "stringValue": "x" },
			] } },
		}));
		deep_merge(&mut target, &patch);
		assert_eq!(target, fields(json!({
			"tags": { "arrayValue": { "values": [{ "stringValue": "x" }] } },
		})));
	}

	#[test]
	fn test_map_replaces_scalar_and_vice_versa() {
		let mut target = fields(json!({ "x": { "stringValue": "scalar" } }));
		let patch = fields(json!({
			"x": { "mapValue": { "fields": { "y": { "integerValue": "1" } } } },
		}));
		deep_merge(&mut target, &patch);
		assert_eq!(target, patch.clone());

		let scalar_patch = fields(json!({ "x": { "booleanValue": false } }));
		deep_merge(&mut target, &scalar_patch);
		assert_eq!(target, scalar_patch);
	}

	#[test]
	fn test_null_is_written_as_a_value() {
		let mut target = fields(json!({ "a": { "integerValue": "1" } }));
		let patch = fields(json!({ "a": { "nullValue": null } }));
		deep_merge(&mut target, &patch);
		assert_eq!(target.get("a"), Some(&FieldValue::Null));
	}

	#[test]
	fn test_empty_patch_is_identity() {
		let mut target = fields(json!({ "a": { "integerValue": "1" } }));
		let before = target.clone();
		deep_merge(&mut target, &FieldMap::new());
		assert_eq!(target, before);
	}
}

// vim: ts=4
