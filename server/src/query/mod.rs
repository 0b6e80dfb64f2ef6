//! Structured query and aggregation ASTs (vendor-compatible wire shapes)
//! and their translation into backend pipelines.

pub mod aggregate;
pub mod handler;
pub mod plan;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::prelude::*;

/// Upper bound on aggregations per query.
pub const MAX_AGGREGATIONS: usize = 5;

/// `from` selector: one collection id, optionally spanning all descendant
/// collections sharing that id (collection-group query).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
	pub collection_id: String,
	#[serde(default)]
	pub all_descendants: bool,
}

/// Reference to a document field by dotted path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
	pub field_path: String,
}

/// Field comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOp {
	#[serde(alias = "EQ")]
	Equal,
	#[serde(alias = "NE")]
	NotEqual,
	#[serde(alias = "LT")]
	LessThan,
	#[serde(alias = "LE")]
	LessThanOrEqual,
	#[serde(alias = "GT")]
	GreaterThan,
	#[serde(alias = "GE")]
	GreaterThanOrEqual,
	In,
	NotIn,
	ArrayContains,
	ArrayContainsAny,
}

/// Composite combinators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositeOp {
	And,
	Or,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnaryOp {
	IsNull,
	IsNotNull,
}

/// Filter tree. Externally tagged to match the wire shape
/// (`{"fieldFilter": {...}}` / `{"compositeFilter": {...}}` /
/// `{"unaryFilter": {...}}`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
	FieldFilter(FieldFilter),
	CompositeFilter(CompositeFilter),
	UnaryFilter(UnaryFilter),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
	pub field: FieldReference,
	pub op: FieldOp,
	/// Operand in wire typed-value form; decoded by the planner.
	pub value: Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeFilter {
	pub op: CompositeOp,
	pub filters: Vec<Filter>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnaryFilter {
	pub op: UnaryOp,
	pub field: FieldReference,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
	#[default]
	#[serde(alias = "ASC")]
	Ascending,
	#[serde(alias = "DESC")]
	Descending,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	pub field: FieldReference,
	#[serde(default)]
	pub direction: Direction,
}

/// Projection: subset of field paths returned to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
	pub fields: Vec<FieldReference>,
}

/// The structured query AST.
///
/// Cursor vectors (`startAt`/`startAfter`/`endAt`/`endBefore`) hold wire
/// typed values matched positionally against `orderBy`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
	#[serde(default)]
	pub from: Vec<CollectionSelector>,
	#[serde(rename = "where")]
	pub filter: Option<Filter>,
	#[serde(default)]
	pub order_by: Vec<Order>,
	pub start_at: Option<Vec<Json>>,
	pub start_after: Option<Vec<Json>>,
	pub end_at: Option<Vec<Json>>,
	pub end_before: Option<Vec<Json>>,
	pub limit: Option<i64>,
	pub offset: Option<i64>,
	/// Reverse-page convenience: reverse orders, limit, reverse results.
	pub limit_to_last: Option<i64>,
	pub select: Option<Projection>,
}

impl StructuredQuery {
	/// Structural validation shared by the planner and the realtime filter.
	pub fn validate(&self) -> EbResult<()> {
		if self.from.len() != 1 {
			return Err(Error::InvalidArgument(format!(
				"query must have exactly one 'from' selector, got {}",
				self.from.len()
			)));
		}
		if self.from[0].collection_id.is_empty() {
			return Err(Error::InvalidArgument("empty collection id in 'from'".into()));
		}
		if self.limit.is_some_and(|l| l < 0) {
			return Err(Error::InvalidArgument("negative limit".into()));
		}
		if self.offset.is_some_and(|o| o < 0) {
			return Err(Error::InvalidArgument("negative offset".into()));
		}
		if self.limit_to_last.is_some_and(|l| l < 0) {
			return Err(Error::InvalidArgument("negative limitToLast".into()));
		}
		if self.limit_to_last.is_some() && self.order_by.is_empty() {
			return Err(Error::InvalidArgument("limitToLast requires orderBy".into()));
		}
		if self.limit_to_last.is_some() && self.limit.is_some() {
			return Err(Error::InvalidArgument("limit and limitToLast are exclusive".into()));
		}
		let has_cursor = self.start_at.is_some()
			|| self.start_after.is_some()
			|| self.end_at.is_some()
			|| self.end_before.is_some();
		if has_cursor && self.order_by.is_empty() {
			return Err(Error::InvalidArgument("cursors require orderBy".into()));
		}
		if let Some(filter) = &self.filter {
			validate_filter(filter)?;
		}
		for order in &self.order_by {
			if order.field.field_path.is_empty() {
				return Err(Error::InvalidArgument("empty orderBy field path".into()));
			}
		}
		if let Some(select) = &self.select {
			for field in &select.fields {
				if field.field_path.is_empty() {
					return Err(Error::InvalidArgument("empty projection field path".into()));
				}
			}
		}
		Ok(())
	}
}

fn validate_filter(filter: &Filter) -> EbResult<()> {
	match filter {
		Filter::FieldFilter(f) => {
			if f.field.field_path.is_empty() {
				return Err(Error::InvalidArgument("empty filter field path".into()));
			}
			Ok(())
		}
		Filter::CompositeFilter(c) => {
			if c.filters.is_empty() {
				return Err(Error::InvalidArgument("empty composite filter".into()));
			}
			for inner in &c.filters {
				validate_filter(inner)?;
			}
			Ok(())
		}
		Filter::UnaryFilter(u) => {
			if u.field.field_path.is_empty() {
				return Err(Error::InvalidArgument("empty unary filter field path".into()));
			}
			Ok(())
		}
	}
}

/// Aggregation kinds. Numeric kinds require a field reference; count takes
/// none.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
	pub alias: String,
	pub count: Option<CountAggregation>,
	pub sum: Option<FieldAggregation>,
	pub avg: Option<FieldAggregation>,
	pub min: Option<FieldAggregation>,
	pub max: Option<FieldAggregation>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CountAggregation {}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAggregation {
	pub field: FieldReference,
}

/// Aggregation query: base query plus group-by keys and aggregations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAggregationQuery {
	pub structured_query: Option<StructuredQuery>,
	#[serde(default)]
	pub group_by: Vec<FieldReference>,
	pub aggregations: Vec<Aggregation>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn parse_query(v: serde_json::Value) -> StructuredQuery {
		match serde_json::from_value(v) {
			Ok(q) => q,
			Err(err) => panic!("query parse failed: {}", err),
		}
	}

	#[test]
	fn test_wire_shape_parses() {
		let query = parse_query(json!({
			"from": [{ "collectionId": "products" }],
			"where": { "fieldFilter": {
				"field": { "fieldPath": "price" },
				"op": "GREATER_THAN_OR_EQUAL",
				"value": { "integerValue": "20" },
			} },
			"orderBy": [{ "field": { "fieldPath": "price" }, "direction": "ASCENDING" }],
			"startAfter": [{ "integerValue": "20" }],
			"limit": 2,
		}));
		assert!(query.validate().is_ok());
		assert_eq!(query.from[0].collection_id, "products");
		assert!(matches!(query.filter, Some(Filter::FieldFilter(_))));
	}

	#[test]
	fn test_composite_filter_nests() {
		let query = parse_query(json!({
			"from": [{ "collectionId": "products" }],
			"where": { "compositeFilter": {
				"op": "OR",
				"filters": [
					{ "fieldFilter": {
						"field": { "fieldPath": "price" },
						"op": "LESS_THAN",
						"value": { "integerValue": "10" },
					} },
					{ "unaryFilter": { "op": "IS_NULL", "field": { "fieldPath": "discount" } } },
				],
			} },
		}));
		assert!(query.validate().is_ok());
	}

	#[test]
	fn test_short_operator_aliases() {
		let query = parse_query(json!({
			"from": [{ "collectionId": "c" }],
			"where": { "fieldFilter": {
				"field": { "fieldPath": "x" },
				"op": "GE",
				"value": { "integerValue": "1" },
			} },
		}));
		match query.filter {
			Some(Filter::FieldFilter(f)) => assert_eq!(f.op, FieldOp::GreaterThanOrEqual),
			other => panic!("unexpected filter: {:?}", other),
		}
	}

	#[test]
	fn test_validation_rejections() {
		let no_from = parse_query(json!({}));
		assert!(no_from.validate().is_err());

		let negative_limit = parse_query(json!({
			"from": [{ "collectionId": "c" }],
			"limit": -1,
		}));
		assert!(negative_limit.validate().is_err());

		let cursor_without_order = parse_query(json!({
			"from": [{ "collectionId": "c" }],
			"startAt": [{ "integerValue": "1" }],
		}));
		assert!(cursor_without_order.validate().is_err());

		let unknown_op: Result<StructuredQuery, _> = serde_json::from_value(json!({
			"from": [{ "collectionId": "c" }],
			"where": { "fieldFilter": {
				"field": { "fieldPath": "x" },
				"op": "LOOKS_LIKE",
				"value": { "integerValue": "1" },
			} },
		}));
		assert!(unknown_op.is_err());
	}
}

// vim: ts=4
