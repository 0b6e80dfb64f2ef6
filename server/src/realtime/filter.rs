//! Query filtering of realtime events.
//!
//! Compositional evaluator over the structured-query AST, applied per
//! subscription before delivery: field filters (dotted paths), composite
//! AND/OR, unary null checks, cursor bounds on the first order-by field, and
//! projection pruning. `allDescendants` matches any event whose full path is
//! prefixed by the subscription path on a segment boundary.

use serde_json::Value as Json;
use std::cmp::Ordering;

use super::RealtimeEvent;
use crate::document::mask::get_at_path;
use crate::query::{
	Direction, FieldOp, Filter, StructuredQuery, UnaryOp,
};
use crate::value::{FieldMap, FieldValue, decode_fields};

/// Decide whether an event is delivered to a subscription at `sub_path`
/// carrying `query`.
pub fn event_matches(sub_path: &str, query: &StructuredQuery, event: &RealtimeEvent) -> bool {
	// Liveness traffic is never filtered
	if event.data.is_none() {
		return true;
	}

	if query.from.first().is_some_and(|sel| sel.all_descendants)
		&& !path_has_prefix(&event.full_path, sub_path)
	{
		return false;
	}

	let fields = match event_fields(event) {
		Some(fields) => fields,
		// Events without a decodable field map pass through unfiltered
		None => return true,
	};

	if let Some(filter) = &query.filter {
		if !eval_filter(&fields, filter) {
			return false;
		}
	}

	matches_cursor_bounds(&fields, query)
}

/// Prune event data down to the projected field paths. Undefined fields are
/// omitted rather than set to null.
pub fn apply_projection(data: &mut Json, query: &StructuredQuery) {
	let Some(select) = &query.select else { return };
	let Some(fields) = data.get_mut("fields").and_then(Json::as_object_mut) else { return };

	let keep: Vec<&str> = select
		.fields
		.iter()
		.map(|f| f.field_path.split('.').next().unwrap_or(f.field_path.as_str()))
		.collect();
	fields.retain(|name, _| keep.contains(&name.as_str()));
}

/// Boundary-checked prefix match: `path` equals `prefix` or continues it at
/// a `/` boundary.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
	if path == prefix {
		return true;
	}
	path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

fn event_fields(event: &RealtimeEvent) -> Option<FieldMap> {
	let data = event.data.as_ref()?;
	let fields = data.get("fields")?;
	decode_fields(fields).ok()
}

/// Evaluate a filter tree against a decoded field map.
pub fn eval_filter(fields: &FieldMap, filter: &Filter) -> bool {
	match filter {
		Filter::FieldFilter(f) => {
			let operand = match FieldValue::from_wire(&f.value) {
				Ok(value) => value,
				Err(_) => return false,
			};
			let parts: Vec<&str> = f.field.field_path.split('.').collect();
			let actual = get_at_path(fields, &parts);
			eval_field_op(actual, f.op, &operand)
		}
		Filter::CompositeFilter(c) => match c.op {
			crate::query::CompositeOp::And => {
				c.filters.iter().all(|inner| eval_filter(fields, inner))
			}
			crate::query::CompositeOp::Or => {
				c.filters.iter().any(|inner| eval_filter(fields, inner))
			}
		},
		Filter::UnaryFilter(u) => {
			let parts: Vec<&str> = u.field.field_path.split('.').collect();
			let actual = get_at_path(fields, &parts);
			match u.op {
				UnaryOp::IsNull => actual == Some(&FieldValue::Null),
				UnaryOp::IsNotNull => actual.is_some_and(|v| *v != FieldValue::Null),
			}
		}
	}
}

fn eval_field_op(actual: Option<&FieldValue>, op: FieldOp, operand: &FieldValue) -> bool {
	let Some(actual) = actual else { return false };
	match op {
		FieldOp::Equal => actual.compare(operand) == Ordering::Equal,
		FieldOp::NotEqual => actual.compare(operand) != Ordering::Equal,
		FieldOp::LessThan => actual.compare(operand) == Ordering::Less,
		FieldOp::LessThanOrEqual => actual.compare(operand) != Ordering::Greater,
		FieldOp::GreaterThan => actual.compare(operand) == Ordering::Greater,
		FieldOp::GreaterThanOrEqual => actual.compare(operand) != Ordering::Less,
		FieldOp::In => match operand {
			FieldValue::Array(allowed) => {
				allowed.iter().any(|v| actual.compare(v) == Ordering::Equal)
			}
			_ => false,
		},
		FieldOp::NotIn => match operand {
			FieldValue::Array(denied) => {
				denied.iter().all(|v| actual.compare(v) != Ordering::Equal)
			}
			_ => false,
		},
		FieldOp::ArrayContains => match actual {
			FieldValue::Array(items) => {
				items.iter().any(|v| v.compare(operand) == Ordering::Equal)
			}
			_ => false,
		},
		FieldOp::ArrayContainsAny => match (actual, operand) {
			(FieldValue::Array(items), FieldValue::Array(wanted)) => items
				.iter()
				.any(|item| wanted.iter().any(|w| item.compare(w) == Ordering::Equal)),
			_ => false,
		},
	}
}

/// Cursor bounds apply to the first order-by field only.
fn matches_cursor_bounds(fields: &FieldMap, query: &StructuredQuery) -> bool {
	let Some(order) = query.order_by.first() else { return true };
	let parts: Vec<&str> = order.field.field_path.split('.').collect();
	let Some(actual) = get_at_path(fields, &parts) else { return true };
	let descending = order.direction == Direction::Descending;

	let bound_value = |cursor: &Option<Vec<Json>>| -> Option<FieldValue> {
		cursor.as_ref()?.first().and_then(|v| FieldValue::from_wire(v).ok())
	};

	if let Some(bound) = bound_value(&query.start_at) {
		let ord = directed(actual.compare(&bound), descending);
		if ord == Ordering::Less {
			return false;
		}
	}
	if let Some(bound) = bound_value(&query.start_after) {
		let ord = directed(actual.compare(&bound), descending);
		if ord != Ordering::Greater {
			return false;
		}
	}
	if let Some(bound) = bound_value(&query.end_at) {
		let ord = directed(actual.compare(&bound), descending);
		if ord == Ordering::Greater {
			return false;
		}
	}
	if let Some(bound) = bound_value(&query.end_before) {
		let ord = directed(actual.compare(&bound), descending);
		if ord != Ordering::Less {
			return false;
		}
	}
	true
}

fn directed(ord: Ordering, descending: bool) -> Ordering {
	if descending { ord.reverse() } else { ord }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::realtime::EventType;
	use serde_json::json;

	fn event(path: &str, fields: Json) -> RealtimeEvent {
		RealtimeEvent {
			event_type: EventType::Added,
			full_path: path.into(),
			data: Some(json!({ "name": path, "fields": fields })),
			old_data: None,
			sequence: 1,
			resume_token: format!("{:020}", 1).into(),
			timestamp: None,
		}
	}

	fn query(v: Json) -> StructuredQuery {
		match serde_json::from_value(v) {
			Ok(q) => q,
			Err(err) => panic!("query parse failed: {}", err),
		}
	}

	const DOC: &str = "projects/p/databases/(default)/documents/products/x1";

	#[test]
	fn test_field_filter_on_event_data() {
		let q = query(json!({
			"from": [{ "collectionId": "products" }],
			"where": { "fieldFilter": {
				"field": { "fieldPath": "price" },
				"op": "GREATER_THAN_OR_EQUAL",
				"value": { "integerValue": "20" },
			} },
		}));
		let base = "projects/p/databases/(default)/documents/products";
		assert!(event_matches(base, &q, &event(DOC, json!({ "price": { "integerValue": "25" } }))));
		assert!(!event_matches(base, &q, &event(DOC, json!({ "price": { "integerValue": "10" } }))));
		// Missing field never matches a comparison
		assert!(!event_matches(base, &q, &event(DOC, json!({ "other": { "integerValue": "99" } }))));
	}

	#[test]
	fn test_composite_or() {
		let q = query(json!({
			"from": [{ "collectionId": "products" }],
			"where": { "compositeFilter": { "op": "OR", "filters": [
				{ "fieldFilter": {
					"field": { "fieldPath": "price" },
					"op": "LESS_THAN",
					"value": { "integerValue": "5" },
				} },
				{ "fieldFilter": {
					"field": { "fieldPath": "featured" },
					"op": "EQUAL",
					"value": { "booleanValue": true },
				} },
			] } },
		}));
		let base = "projects/p/databases/(default)/documents/products";
		assert!(event_matches(base, &q, &event(DOC, json!({
			"price": { "integerValue": "50" },
			"featured": { "booleanValue": true },
		}))));
		assert!(!event_matches(base, &q, &event(DOC, json!({
			"price": { "integerValue": "50" },
			"featured": { "booleanValue": false },
		}))));
	}

	#[test]
	fn test_all_descendants_prefix() {
		let q = query(json!({ "from": [{ "collectionId": "posts", "allDescendants": true }] }));
		let base = "projects/p/databases/(default)/documents/users";
		let nested = "projects/p/databases/(default)/documents/users/u1/posts/p1";
		assert!(event_matches(base, &q, &event(nested, json!({}))));

		let outside = "projects/p/databases/(default)/documents/usersX/u1";
		assert!(!event_matches(base, &q, &event(outside, json!({}))));
	}

	#[test]
	fn test_cursor_bound_on_first_order_field() {
		let q = query(json!({
			"from": [{ "collectionId": "products" }],
			"orderBy": [{ "field": { "fieldPath": "price" } }],
			"startAfter": [{ "integerValue": "20" }],
		}));
		let base = "projects/p/databases/(default)/documents/products";
		assert!(event_matches(base, &q, &event(DOC, json!({ "price": { "integerValue": "30" } }))));
		assert!(!event_matches(base, &q, &event(DOC, json!({ "price": { "integerValue": "20" } }))));
	}

	#[test]
	fn test_projection_prunes_unselected_keys() {
		let q = query(json!({
			"from": [{ "collectionId": "products" }],
			"select": { "fields": [{ "fieldPath": "price" }] },
		}));
		let mut data = json!({ "name": DOC, "fields": {
			"price": { "integerValue": "30" },
			"color": { "stringValue": "red" },
		} });
		apply_projection(&mut data, &q);
		assert!(data["fields"].get("price").is_some());
		assert!(data["fields"].get("color").is_none());
	}

	#[test]
	fn test_array_contains() {
		let q = query(json!({
			"from": [{ "collectionId": "products" }],
			"where": { "fieldFilter": {
				"field": { "fieldPath": "tags" },
				"op": "ARRAY_CONTAINS",
				"value": { "stringValue": "sale" },
			} },
		}));
		let base = "projects/p/databases/(default)/documents/products";
		assert!(event_matches(base, &q, &event(DOC, json!({
			"tags": { "arrayValue": { "values": [
				{ "stringValue": "new" },
				{ "stringValue": "sale" },
			] } },
		}))));
		assert!(!event_matches(base, &q, &event(DOC, json!({
			"tags": { "arrayValue": { "values": [{ "stringValue": "new" }] } },
		}))));
	}
}

// vim: ts=4
