//! Structured-query planner.
//!
//! Translates the vendor AST into backend aggregation pipelines over the
//! tagged storage form. Numeric comparisons cannot match on the tagged leaf
//! directly (integers are stored as base-10 strings), so they go through a
//! `$ifNull` coercion chain that prefers `doubleValue` and converts
//! `integerValue`; ordering materializes the same chain into `__ord{i}` sort
//! keys, which cursor bounds then constrain positionally.

use bson::{Bson, Document, doc};

use crate::document::mask::split_field_path;
use crate::prelude::*;
use crate::value::FieldValue;

use super::{
	CompositeOp, Direction, FieldFilter, FieldOp, Filter, Order, StructuredQuery, UnaryOp,
};

/// A planned single-collection query.
#[derive(Clone, Debug)]
pub struct PlannedQuery {
	/// Match, order-key, cursor, and sort stages, in order.
	stages: Vec<Document>,
	pub offset: Option<i64>,
	pub limit: Option<i64>,
	/// Set for `limitToLast`: orders were reversed, results must be
	/// un-reversed after the scan.
	pub reverse_results: bool,
	/// Effective orders (after any `limitToLast` reversal), used for
	/// engine-side merge of collection-group scans.
	pub orders: Vec<Order>,
	/// Projection field paths; pruning happens post-load.
	pub projection: Option<Vec<String>>,
	ord_keys: Vec<String>,
}

impl PlannedQuery {
	/// Full pipeline for one container, bounds included.
	pub fn pipeline(&self) -> Vec<Document> {
		let mut stages = self.stages.clone();
		if let Some(offset) = self.offset {
			stages.push(doc! { "$skip": offset });
		}
		if let Some(limit) = self.limit {
			stages.push(doc! { "$limit": limit });
		}
		self.push_unset(&mut stages);
		stages
	}

	/// Pipeline without offset/limit, for collection-group scans that merge
	/// and bound engine-side.
	pub fn pipeline_unbounded(&self) -> Vec<Document> {
		let mut stages = self.stages.clone();
		self.push_unset(&mut stages);
		stages
	}

	fn push_unset(&self, stages: &mut Vec<Document>) {
		if !self.ord_keys.is_empty() {
			let keys: Vec<Bson> =
				self.ord_keys.iter().map(|k| Bson::String(k.clone())).collect();
			stages.push(doc! { "$unset": keys });
		}
	}
}

/// Plan a validated structured query.
pub fn plan_query(query: &StructuredQuery) -> EbResult<PlannedQuery> {
	query.validate()?;

	let mut stages = Vec::new();
	if let Some(filter) = &query.filter {
		stages.push(doc! { "$match": translate_filter(filter)? });
	}

	// limitToLast reverses the orders, applies the limit, and reverses the
	// results afterwards.
	let mut orders = query.order_by.clone();
	let mut reverse_results = false;
	let limit = match query.limit_to_last {
		Some(last) => {
			for order in &mut orders {
				order.direction = match order.direction {
					Direction::Ascending => Direction::Descending,
					Direction::Descending => Direction::Ascending,
				};
			}
			reverse_results = true;
			Some(last)
		}
		None => query.limit,
	};

	let mut ord_keys = Vec::new();
	if !orders.is_empty() {
		let mut add_fields = Document::new();
		let mut sort = Document::new();
		for (i, order) in orders.iter().enumerate() {
			let key = format!("__ord{}", i);
			add_fields.insert(key.clone(), order_key_expr(&order.field.field_path)?);
			sort.insert(key.clone(), if order.direction == Direction::Descending { -1 } else { 1 });
			ord_keys.push(key);
		}
		sort.insert("_id", 1); // deterministic tiebreak
		stages.push(doc! { "$addFields": add_fields });

		for bound in cursor_bounds(query, &orders)? {
			stages.push(doc! { "$match": bound });
		}
		stages.push(doc! { "$sort": sort });
	}

	let projection = query
		.select
		.as_ref()
		.map(|sel| sel.fields.iter().map(|f| f.field_path.clone()).collect());

	Ok(PlannedQuery {
		stages,
		offset: query.offset.filter(|o| *o > 0),
		limit,
		reverse_results,
		orders,
		projection,
		ord_keys,
	})
}

/// Dotted logical field path -> tagged storage path
/// (`a.b` -> `fields.a.mapValue.fields.b`).
pub fn storage_field_path(field_path: &str) -> EbResult<String> {
	let parts = split_field_path(field_path)?;
	Ok(format!("fields.{}", parts.join(".mapValue.fields.")))
}

/// Numeric read of a tagged field: prefer `doubleValue`, convert
/// `integerValue`, else null.
pub fn numeric_leaf_expr(storage_path: &str) -> Bson {
	bson::bson!({ "$ifNull": [
		format!("${}.doubleValue", storage_path),
		{ "$convert": {
			"input": format!("${}.integerValue", storage_path),
			"to": "double",
			"onError": Bson::Null,
			"onNull": Bson::Null,
		} },
	] })
}

/// Sort key for an arbitrary tagged field: first non-null leaf across the
/// orderable tags. Mixed-type fields fall back to backend type order.
pub fn order_key_expr(field_path: &str) -> EbResult<Bson> {
	let p = storage_field_path(field_path)?;
	Ok(bson::bson!({ "$ifNull": [
		numeric_leaf_expr(&p),
		{ "$ifNull": [
			format!("${}.stringValue", p),
			{ "$ifNull": [
				format!("${}.timestampValue", p),
				format!("${}.booleanValue", p),
			] },
		] },
	] }))
}

/// Translate a filter tree compositionally into a backend filter document.
pub fn translate_filter(filter: &Filter) -> EbResult<Document> {
	match filter {
		Filter::FieldFilter(f) => translate_field_filter(f),
		Filter::CompositeFilter(c) => {
			let mut parts = Vec::with_capacity(c.filters.len());
			for inner in &c.filters {
				parts.push(translate_filter(inner)?);
			}
			Ok(match c.op {
				CompositeOp::And => doc! { "$and": parts },
				CompositeOp::Or => doc! { "$or": parts },
			})
		}
		Filter::UnaryFilter(u) => {
			let p = storage_field_path(&u.field.field_path)?;
			Ok(match u.op {
				// IS_NULL is equality with the typed null
				UnaryOp::IsNull => doc! { p: { "nullValue": Bson::Null } },
				UnaryOp::IsNotNull => doc! { "$and": [
					{ p.as_str(): { "$exists": true } },
					{ format!("{}.nullValue", p): { "$exists": false } },
				] },
			})
		}
	}
}

fn translate_field_filter(filter: &FieldFilter) -> EbResult<Document> {
	let operand = FieldValue::from_wire(&filter.value)?;
	let p = storage_field_path(&filter.field.field_path)?;

	match filter.op {
		FieldOp::Equal => {
			if operand.is_numeric() {
				Ok(numeric_cmp("$eq", &p, &operand, false))
			} else {
				Ok(doc! { p: operand.to_bson() })
			}
		}
		FieldOp::NotEqual => {
			if operand.is_numeric() {
				Ok(numeric_cmp("$ne", &p, &operand, true))
			} else {
				Ok(doc! { p: { "$exists": true, "$ne": operand.to_bson() } })
			}
		}
		FieldOp::LessThan => inequality("$lt", &p, &operand),
		FieldOp::LessThanOrEqual => inequality("$lte", &p, &operand),
		FieldOp::GreaterThan => inequality("$gt", &p, &operand),
		FieldOp::GreaterThanOrEqual => inequality("$gte", &p, &operand),
		FieldOp::In => {
			let FieldValue::Array(allowed) = &operand else {
				return Err(Error::InvalidArgument("IN operand must be an array".into()));
			};
			if allowed.is_empty() {
				return Err(Error::InvalidArgument("IN operand must be non-empty".into()));
			}
			let mut parts = Vec::with_capacity(allowed.len());
			for value in allowed {
				let eq = FieldFilter {
					field: filter.field.clone(),
					op: FieldOp::Equal,
					value: value.to_wire(),
				};
				parts.push(translate_field_filter(&eq)?);
			}
			Ok(doc! { "$or": parts })
		}
		FieldOp::NotIn => {
			let FieldValue::Array(denied) = &operand else {
				return Err(Error::InvalidArgument("NOT_IN operand must be an array".into()));
			};
			if denied.is_empty() {
				return Err(Error::InvalidArgument("NOT_IN operand must be non-empty".into()));
			}
			let mut parts = vec![doc! { p.as_str(): { "$exists": true } }];
			for value in denied {
				let ne = FieldFilter {
					field: filter.field.clone(),
					op: FieldOp::NotEqual,
					value: value.to_wire(),
				};
				parts.push(translate_field_filter(&ne)?);
			}
			Ok(doc! { "$and": parts })
		}
		FieldOp::ArrayContains => Ok(doc! {
			format!("{}.arrayValue.values", p): { "$elemMatch": { "$eq": operand.to_bson() } }
		}),
		FieldOp::ArrayContainsAny => {
			let FieldValue::Array(wanted) = &operand else {
				return Err(Error::InvalidArgument(
					"ARRAY_CONTAINS_ANY operand must be an array".into(),
				));
			};
			if wanted.is_empty() {
				return Err(Error::InvalidArgument(
					"ARRAY_CONTAINS_ANY operand must be non-empty".into(),
				));
			}
			let typed: Vec<Bson> = wanted.iter().map(FieldValue::to_bson).collect();
			Ok(doc! {
				format!("{}.arrayValue.values", p): { "$elemMatch": { "$in": typed } }
			})
		}
	}
}

fn inequality(mongo_op: &str, p: &str, operand: &FieldValue) -> EbResult<Document> {
	match operand {
		FieldValue::Integer(_) | FieldValue::Double(_) => {
			Ok(numeric_cmp(mongo_op, p, operand, true))
		}
		FieldValue::String(s) => {
			Ok(doc! { format!("{}.stringValue", p): { mongo_op: s.clone() } })
		}
		FieldValue::Timestamp(ts) => {
			Ok(doc! { format!("{}.timestampValue", p): { mongo_op: ts.to_bson() } })
		}
		FieldValue::Boolean(b) => {
			Ok(doc! { format!("{}.booleanValue", p): { mongo_op: *b } })
		}
		other => Err(Error::InvalidArgument(format!(
			"unsupported inequality operand type: {:?}",
			other
		))),
	}
}

/// Numeric comparison through the coercion chain. The null guard keeps
/// documents without the field out of the match (null sorts below numbers
/// in the backend's comparison order).
fn numeric_cmp(mongo_op: &str, p: &str, operand: &FieldValue, guard: bool) -> Document {
	let number = match operand {
		FieldValue::Integer(n) => *n as f64,
		FieldValue::Double(d) => *d,
		_ => f64::NAN,
	};
	let leaf = numeric_leaf_expr(p);
	if guard {
		doc! { "$expr": { "$and": [
			{ "$gt": [leaf.clone(), Bson::Null] },
			{ mongo_op: [leaf, number] },
		] } }
	} else {
		doc! { "$expr": { mongo_op: [leaf, number] } }
	}
}

/// Cursor value mapped into the order-key space (`__ord{i}` values).
fn cursor_key_bson(value: &FieldValue) -> EbResult<Bson> {
	match value {
		FieldValue::Integer(n) => Ok(Bson::Double(*n as f64)),
		FieldValue::Double(d) => Ok(Bson::Double(*d)),
		FieldValue::String(s) => Ok(Bson::String(s.clone())),
		FieldValue::Boolean(b) => Ok(Bson::Boolean(*b)),
		FieldValue::Timestamp(ts) => Ok(ts.to_bson()),
		other => {
			Err(Error::InvalidArgument(format!("unsupported cursor value type: {:?}", other)))
		}
	}
}

/// Build positional tuple bounds over the order keys for every cursor the
/// query carries.
fn cursor_bounds(query: &StructuredQuery, orders: &[Order]) -> EbResult<Vec<Document>> {
	let mut bounds = Vec::new();
	let cursors: [(&Option<Vec<serde_json::Value>>, bool, bool); 4] = [
		(&query.start_at, true, true),
		(&query.start_after, true, false),
		(&query.end_at, false, true),
		(&query.end_before, false, false),
	];
	for (cursor, is_start, inclusive) in cursors {
		if let Some(values) = cursor {
			bounds.push(tuple_bound(orders, values, is_start, inclusive)?);
		}
	}
	Ok(bounds)
}

fn tuple_bound(
	orders: &[Order],
	values: &[serde_json::Value],
	is_start: bool,
	inclusive: bool,
) -> EbResult<Document> {
	if values.is_empty() || values.len() > orders.len() {
		return Err(Error::InvalidArgument(format!(
			"cursor has {} values for {} orderBy fields",
			values.len(),
			orders.len()
		)));
	}

	let mut keys: Vec<Bson> = Vec::with_capacity(values.len());
	for value in values {
		keys.push(cursor_key_bson(&FieldValue::from_wire(value)?)?);
	}

	// (k0, k1, ...) beyond the bound, position by position:
	//   k0 > v0  OR  (k0 == v0 AND k1 > v1)  OR ...
	let mut alternatives = Vec::new();
	for i in 0..keys.len() {
		let last = i == keys.len() - 1;
		let mut conjunction = Vec::new();
		for (j, key) in keys.iter().take(i).enumerate() {
			conjunction.push(doc! { format!("__ord{}", j): key.clone() });
		}
		let descending = orders[i].direction == Direction::Descending;
		let op = match (is_start, descending, last && inclusive) {
			(true, false, false) => "$gt",
			(true, false, true) => "$gte",
			(true, true, false) => "$lt",
			(true, true, true) => "$lte",
			(false, false, false) => "$lt",
			(false, false, true) => "$lte",
			(false, true, false) => "$gt",
			(false, true, true) => "$gte",
		};
		conjunction.push(doc! { format!("__ord{}", i): { op: keys[i].clone() } });
		alternatives.push(doc! { "$and": conjunction });
	}
	Ok(doc! { "$or": alternatives })
}


// vim: ts=4
