//! Aggregation planner.
//!
//! Builds `$match` / `$group` / `$project` pipelines for count, sum, avg,
//! min, and max, optionally grouped. Numeric typing is inferred per
//! document in the pipeline itself (prefer `doubleValue`, convert
//! `integerValue`, else 0) rather than from any static field-type table.
//! Group keys stay in tagged form end to end so result rows re-type them by
//! their source tag.
//!
//! Collection-group scope aggregates engine-side: a per-container match
//! pipeline feeds an accumulator, since partial aggregates (avg in
//! particular) do not merge across containers.

use bson::{Bson, Document, doc};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::document::mask::get_at_path;
use crate::prelude::*;
use crate::value::{FieldMap, FieldValue};

use super::plan::{numeric_leaf_expr, storage_field_path, translate_filter};
use super::{Aggregation, MAX_AGGREGATIONS, StructuredAggregationQuery};

/// One validated aggregation entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregateKind {
	Count,
	Sum(String),
	Avg(String),
	Min(String),
	Max(String),
}

#[derive(Clone, Debug)]
pub struct PlannedAggregation {
	pub alias: String,
	pub kind: AggregateKind,
}

/// Validate aliases and kinds: at most 5 entries, unique aliases, exactly
/// one kind per entry, numeric kinds carry a field.
pub fn validate_aggregations(query: &StructuredAggregationQuery) -> EbResult<Vec<PlannedAggregation>> {
	if query.aggregations.is_empty() {
		return Err(Error::InvalidArgument("at least one aggregation is required".into()));
	}
	if query.aggregations.len() > MAX_AGGREGATIONS {
		return Err(Error::InvalidArgument(format!(
			"at most {} aggregations per query, got {}",
			MAX_AGGREGATIONS,
			query.aggregations.len()
		)));
	}

	let mut planned = Vec::with_capacity(query.aggregations.len());
	for agg in &query.aggregations {
		validate_alias(&agg.alias)?;
		if planned.iter().any(|p: &PlannedAggregation| p.alias == agg.alias) {
			return Err(Error::InvalidArgument(format!("duplicate alias: {}", agg.alias)));
		}
		planned.push(PlannedAggregation { alias: agg.alias.clone(), kind: kind_of(agg)? });
	}
	Ok(planned)
}

fn kind_of(agg: &Aggregation) -> EbResult<AggregateKind> {
	let mut kinds = Vec::new();
	if agg.count.is_some() {
		kinds.push(AggregateKind::Count);
	}
	if let Some(sum) = &agg.sum {
		kinds.push(AggregateKind::Sum(sum.field.field_path.clone()));
	}
	if let Some(avg) = &agg.avg {
		kinds.push(AggregateKind::Avg(avg.field.field_path.clone()));
	}
	if let Some(min) = &agg.min {
		kinds.push(AggregateKind::Min(min.field.field_path.clone()));
	}
	if let Some(max) = &agg.max {
		kinds.push(AggregateKind::Max(max.field.field_path.clone()));
	}
	match kinds.len() {
		1 => kinds
			.pop()
			.ok_or_else(|| Error::Internal("aggregation kind vanished".into())),
		n => Err(Error::InvalidArgument(format!(
			"aggregation '{}' must have exactly one kind, got {}",
			agg.alias, n
		))),
	}
}

fn validate_alias(alias: &str) -> EbResult<()> {
	if alias.is_empty() {
		return Err(Error::InvalidArgument("empty aggregation alias".into()));
	}
	if !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
		return Err(Error::InvalidArgument(format!("invalid aggregation alias: {}", alias)));
	}
	Ok(())
}

/// Sum/avg read of a field: prefer double, coerce integer, else 0.
fn numeric_value_expr(field_path: &str) -> EbResult<Bson> {
	let p = storage_field_path(field_path)?;
	Ok(bson::bson!({ "$ifNull": [numeric_leaf_expr(&p), 0] }))
}

/// Build the backend pipeline for a single-container aggregation.
pub fn build_pipeline(
	query: &StructuredAggregationQuery,
	planned: &[PlannedAggregation],
) -> EbResult<Vec<Document>> {
	let mut pipeline = Vec::new();

	if let Some(base) = &query.structured_query {
		if let Some(filter) = &base.filter {
			pipeline.push(doc! { "$match": translate_filter(filter)? });
		}
	}

	// Group id: scalar for single-field groupBy, document for multi, null
	// when ungrouped. Tagged storage form, so grouping equality is typed
	// equality.
	let group_id: Bson = match query.group_by.len() {
		0 => Bson::Null,
		1 => Bson::String(format!("${}", storage_field_path(&query.group_by[0].field_path)?)),
		_ => {
			let mut id = Document::new();
			for (i, field) in query.group_by.iter().enumerate() {
				id.insert(
					format!("g{}", i),
					format!("${}", storage_field_path(&field.field_path)?),
				);
			}
			Bson::Document(id)
		}
	};

	let mut group = doc! { "_id": group_id };
	for agg in planned {
		let acc = match &agg.kind {
			AggregateKind::Count => doc! { "$sum": 1 },
			AggregateKind::Sum(field) => doc! { "$sum": numeric_value_expr(field)? },
			AggregateKind::Avg(field) => doc! { "$avg": numeric_value_expr(field)? },
			AggregateKind::Min(field) => {
				doc! { "$min": numeric_leaf_expr(&storage_field_path(field)?) }
			}
			AggregateKind::Max(field) => {
				doc! { "$max": numeric_leaf_expr(&storage_field_path(field)?) }
			}
		};
		group.insert(agg.alias.clone(), acc);
	}
	pipeline.push(doc! { "$group": group });

	// Grouped queries drop rows whose group key is missing
	if !query.group_by.is_empty() {
		pipeline.push(doc! { "$match": { "_id": { "$ne": Bson::Null } } });
	}

	// Hoist group keys, expose aliases, suppress the internal id
	let mut project = doc! { "_id": 0 };
	match query.group_by.len() {
		0 => {}
		1 => {
			project.insert("__key0", "$_id");
		}
		n => {
			for i in 0..n {
				project.insert(format!("__key{}", i), format!("$_id.g{}", i));
			}
		}
	}
	for agg in planned {
		project.insert(agg.alias.clone(), 1);
	}
	pipeline.push(doc! { "$project": project });

	Ok(pipeline)
}

/// Type one backend result row: group keys re-typed by their source tag,
/// numeric aliases emitted as `integerValue`/`doubleValue` by value kind.
pub fn typed_row(
	row: &Document,
	query: &StructuredAggregationQuery,
	planned: &[PlannedAggregation],
) -> EbResult<Json> {
	let mut out = serde_json::Map::new();

	for (i, field) in query.group_by.iter().enumerate() {
		let key = format!("__key{}", i);
		let value = match row.get(&key) {
			Some(tagged) => FieldValue::from_bson(tagged)?.to_wire(),
			None => serde_json::json!({ "nullValue": Json::Null }),
		};
		out.insert(field.field_path.clone(), value);
	}

	for agg in planned {
		out.insert(agg.alias.clone(), typed_numeric(row.get(agg.alias.as_str())));
	}

	Ok(Json::Object(out))
}

/// Synthetic row for an empty, ungrouped result set: count aggregations
/// report zero, the rest null.
pub fn synthetic_empty_row(planned: &[PlannedAggregation]) -> Json {
	let mut out = serde_json::Map::new();
	for agg in planned {
		let value = match agg.kind {
			AggregateKind::Count => serde_json::json!({ "integerValue": "0" }),
			_ => serde_json::json!({ "nullValue": Json::Null }),
		};
		out.insert(agg.alias.clone(), value);
	}
	Json::Object(out)
}

fn typed_numeric(value: Option<&Bson>) -> Json {
	match value {
		Some(Bson::Int32(n)) => serde_json::json!({ "integerValue": n.to_string() }),
		Some(Bson::Int64(n)) => serde_json::json!({ "integerValue": n.to_string() }),
		Some(Bson::Double(d)) => serde_json::json!({ "doubleValue": d }),
		_ => serde_json::json!({ "nullValue": Json::Null }),
	}
}

// --- Engine-side accumulation (collection-group scope) ---

struct AliasState {
	count: i64,
	sum: f64,
	avg_sum: f64,
	avg_count: i64,
	min: Option<f64>,
	max: Option<f64>,
}

impl AliasState {
	fn new() -> Self {
		Self { count: 0, sum: 0.0, avg_sum: 0.0, avg_count: 0, min: None, max: None }
	}
}

/// Accumulates documents from several containers into one aggregation
/// result, mirroring the backend pipeline's semantics.
pub struct EngineAggregator<'a> {
	query: &'a StructuredAggregationQuery,
	planned: &'a [PlannedAggregation],
	groups: BTreeMap<String, (Vec<FieldValue>, Vec<AliasState>)>,
}

impl<'a> EngineAggregator<'a> {
	pub fn new(query: &'a StructuredAggregationQuery, planned: &'a [PlannedAggregation]) -> Self {
		Self { query, planned, groups: BTreeMap::new() }
	}

	pub fn add_document(&mut self, fields: &FieldMap) {
		let mut key_values = Vec::with_capacity(self.query.group_by.len());
		for field in &self.query.group_by {
			let parts: Vec<&str> = field.field_path.split('.').collect();
			match get_at_path(fields, &parts) {
				// Missing group key: the row would be dropped anyway
				None => return,
				Some(value) => key_values.push(value.clone()),
			}
		}
		let key = serde_json::to_string(
			&key_values.iter().map(FieldValue::to_wire).collect::<Vec<_>>(),
		)
		.unwrap_or_default();

		let entry = self.groups.entry(key).or_insert_with(|| {
			let states = self.planned.iter().map(|_| AliasState::new()).collect();
			(key_values, states)
		});

		for (agg, state) in self.planned.iter().zip(entry.1.iter_mut()) {
			match &agg.kind {
				AggregateKind::Count => state.count += 1,
				AggregateKind::Sum(field) => {
					state.sum += numeric_field(fields, field).unwrap_or(0.0);
				}
				AggregateKind::Avg(field) => {
					state.avg_sum += numeric_field(fields, field).unwrap_or(0.0);
					state.avg_count += 1;
				}
				AggregateKind::Min(field) => {
					if let Some(n) = numeric_field(fields, field) {
						state.min = Some(state.min.map_or(n, |m| m.min(n)));
					}
				}
				AggregateKind::Max(field) => {
					if let Some(n) = numeric_field(fields, field) {
						state.max = Some(state.max.map_or(n, |m| m.max(n)));
					}
				}
			}
		}
	}

	pub fn rows(self) -> Vec<Json> {
		let grouped = !self.query.group_by.is_empty();
		if self.groups.is_empty() {
			return if grouped { Vec::new() } else { vec![synthetic_empty_row(self.planned)] };
		}

		self.groups
			.into_values()
			.map(|(key_values, states)| {
				let mut out = serde_json::Map::new();
				for (field, value) in self.query.group_by.iter().zip(key_values.iter()) {
					out.insert(field.field_path.clone(), value.to_wire());
				}
				for (agg, state) in self.planned.iter().zip(states.iter()) {
					let value = match &agg.kind {
						AggregateKind::Count => {
							serde_json::json!({ "integerValue": state.count.to_string() })
						}
						AggregateKind::Sum(_) => serde_json::json!({ "doubleValue": state.sum }),
						AggregateKind::Avg(_) => {
							if state.avg_count > 0 {
								serde_json::json!({
									"doubleValue": state.avg_sum / state.avg_count as f64
								})
							} else {
								serde_json::json!({ "nullValue": Json::Null })
							}
						}
						AggregateKind::Min(_) => match state.min {
							Some(n) => serde_json::json!({ "doubleValue": n }),
							None => serde_json::json!({ "nullValue": Json::Null }),
						},
						AggregateKind::Max(_) => match state.max {
							Some(n) => serde_json::json!({ "doubleValue": n }),
							None => serde_json::json!({ "nullValue": Json::Null }),
						},
					};
					out.insert(agg.alias.clone(), value);
				}
				Json::Object(out)
			})
			.collect()
	}
}

/// Flexible numeric read: prefer double, coerce integer, else None.
fn numeric_field(fields: &FieldMap, field_path: &str) -> Option<f64> {
	let parts: Vec<&str> = field_path.split('.').collect();
	match get_at_path(fields, &parts) {
		Some(FieldValue::Double(d)) => Some(*d),
		Some(FieldValue::Integer(n)) => Some(*n as f64),
		_ => None,
	}
}


// vim: ts=4
