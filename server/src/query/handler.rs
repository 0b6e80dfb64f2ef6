//! Query execution and HTTP glue.
//!
//! Single-collection scopes run entirely as backend pipelines. Collection
//! group scopes fan out over every catalog container whose trailing segment
//! matches, then merge, order, and bound the results engine-side.

use axum::Json;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

use crate::document::mask::get_at_path;
use crate::document::{StoredDocument, decode_stored};
use crate::path::{QueryScope, ResourcePath};
use crate::prelude::*;
use crate::rules::RuleOp;
use crate::store_adapter::{ContainerRef, FindOptions};
use crate::tenancy::physical_database;
use crate::types::AuthContext;

use super::aggregate::{self, EngineAggregator};
use super::plan::{plan_query, translate_filter};
use super::{Direction, Order, StructuredAggregationQuery, StructuredQuery};

/// Execute a structured query in a scope.
pub async fn run_query(
	app: &App,
	scope: &QueryScope,
	query: &StructuredQuery,
) -> EbResult<Vec<StoredDocument>> {
	let planned = plan_query(query)?;
	let project_id = scope.parent.project_id();
	let database_id = scope.parent.database_id();

	let mut documents = if scope.all_descendants {
		let parent = if scope.parent.is_root() {
			None
		} else {
			Some(scope.parent.relative_path())
		};
		let metas = app
			.catalog
			.collections_with_id(project_id, database_id, &scope.collection_id, parent.as_deref())
			.await?;
		let database = physical_database(None, project_id, database_id);

		let mut merged = Vec::new();
		for meta in metas {
			let container = ContainerRef::new(database.clone(), meta.container.clone());
			let raw = app.store_adapter.aggregate(&container, planned.pipeline_unbounded()).await?;
			for doc in &raw {
				merged.push(decode_stored(doc)?);
			}
		}
		sort_documents(&mut merged, &planned.orders);
		let start = usize::try_from(planned.offset.unwrap_or(0)).unwrap_or(0);
		let mut bounded: Vec<StoredDocument> = merged.into_iter().skip(start).collect();
		if let Some(limit) = planned.limit {
			bounded.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
		}
		bounded
	} else {
		let collection = scope.target_collection()?;
		let container =
			app.catalog.resolve(project_id, database_id, &collection.collection_path()?);
		let raw = app.store_adapter.aggregate(&container, planned.pipeline()).await?;
		let mut decoded = Vec::with_capacity(raw.len());
		for doc in &raw {
			decoded.push(decode_stored(doc)?);
		}
		decoded
	};

	if planned.reverse_results {
		documents.reverse();
	}
	if let Some(projection) = &planned.projection {
		let keep: Vec<&str> = projection
			.iter()
			.map(|p| p.split('.').next().unwrap_or(p.as_str()))
			.collect();
		for doc in &mut documents {
			doc.fields.retain(|name, _| keep.contains(&name.as_str()));
		}
	}
	Ok(documents)
}

/// Execute an aggregation query in a scope.
pub async fn run_aggregation(
	app: &App,
	scope: &QueryScope,
	query: &StructuredAggregationQuery,
) -> EbResult<Vec<JsonValue>> {
	let planned = aggregate::validate_aggregations(query)?;
	let project_id = scope.parent.project_id();
	let database_id = scope.parent.database_id();

	if scope.all_descendants {
		let parent = if scope.parent.is_root() {
			None
		} else {
			Some(scope.parent.relative_path())
		};
		let metas = app
			.catalog
			.collections_with_id(project_id, database_id, &scope.collection_id, parent.as_deref())
			.await?;
		let database = physical_database(None, project_id, database_id);

		let filter = match query.structured_query.as_ref().and_then(|q| q.filter.as_ref()) {
			Some(filter) => translate_filter(filter)?,
			None => bson::Document::new(),
		};
		let mut accumulator = EngineAggregator::new(query, &planned);
		for meta in metas {
			let container = ContainerRef::new(database.clone(), meta.container.clone());
			let raw = app
				.store_adapter
				.find(&container, filter.clone(), FindOptions::default())
				.await?;
			for doc in &raw {
				accumulator.add_document(&decode_stored(doc)?.fields);
			}
		}
		return Ok(accumulator.rows());
	}

	let collection = scope.target_collection()?;
	let container = app.catalog.resolve(project_id, database_id, &collection.collection_path()?);
	let pipeline = aggregate::build_pipeline(query, &planned)?;
	let raw = app.store_adapter.aggregate(&container, pipeline).await?;

	if raw.is_empty() && query.group_by.is_empty() {
		return Ok(vec![aggregate::synthetic_empty_row(&planned)]);
	}
	let mut rows = Vec::with_capacity(raw.len());
	for row in &raw {
		rows.push(aggregate::typed_row(row, query, &planned)?);
	}
	Ok(rows)
}

/// `POST {parent}:runQuery` glue.
pub async fn run_query_at(
	app: &App,
	auth: Option<AuthContext>,
	project: &str,
	database: &str,
	parent_rest: &str,
	body: JsonValue,
) -> EbResult<Json<JsonValue>> {
	let parent = parse_parent(project, database, parent_rest)?;
	let query: StructuredQuery = serde_json::from_value(
		body.get("structuredQuery")
			.cloned()
			.ok_or_else(|| Error::InvalidArgument("missing structuredQuery".into()))?,
	)
	.map_err(|err| Error::InvalidArgument(format!("invalid structuredQuery: {}", err)))?;
	query.validate()?;

	let selector = &query.from[0];
	let scope = QueryScope::new(parent, &selector.collection_id, selector.all_descendants)?;
	crate::document::handler::enforce(
		app,
		auth.as_ref(),
		&scope.target_collection()?,
		RuleOp::List,
		None,
		None,
	)
	.await?;

	let documents = run_query(app, &scope, &query).await?;
	let read_time = Timestamp::now().to_rfc3339();
	let results: Vec<JsonValue> = documents
		.iter()
		.map(|doc| serde_json::json!({ "document": doc.to_wire(), "readTime": read_time }))
		.collect();
	Ok(Json(JsonValue::Array(results)))
}

/// `POST {parent}:runAggregationQuery` glue.
pub async fn run_aggregation_at(
	app: &App,
	auth: Option<AuthContext>,
	project: &str,
	database: &str,
	parent_rest: &str,
	body: JsonValue,
) -> EbResult<Json<JsonValue>> {
	let parent = parse_parent(project, database, parent_rest)?;
	let query: StructuredAggregationQuery = serde_json::from_value(
		body.get("structuredAggregationQuery")
			.cloned()
			.ok_or_else(|| Error::InvalidArgument("missing structuredAggregationQuery".into()))?,
	)
	.map_err(|err| {
		Error::InvalidArgument(format!("invalid structuredAggregationQuery: {}", err))
	})?;

	let selector = query
		.structured_query
		.as_ref()
		.and_then(|q| q.from.first())
		.ok_or_else(|| Error::InvalidArgument("aggregation query must carry a 'from'".into()))?
		.clone();
	let scope = QueryScope::new(parent, &selector.collection_id, selector.all_descendants)?;
	crate::document::handler::enforce(
		app,
		auth.as_ref(),
		&scope.target_collection()?,
		RuleOp::List,
		None,
		None,
	)
	.await?;

	let rows = run_aggregation(app, &scope, &query).await?;
	let read_time = Timestamp::now().to_rfc3339();
	let results: Vec<JsonValue> = rows
		.into_iter()
		.map(|row| serde_json::json!({ "result": { "aggregateFields": row }, "readTime": read_time }))
		.collect();
	Ok(Json(JsonValue::Array(results)))
}

/// `POST .../documents:runQuery` (database root scope).
pub async fn run_query_root(
	axum::extract::State(app): axum::extract::State<App>,
	crate::core::extract::MaybeAuth(auth): crate::core::extract::MaybeAuth,
	axum::extract::Path((project, database)): axum::extract::Path<(String, String)>,
	Json(body): Json<JsonValue>,
) -> EbResult<Json<JsonValue>> {
	run_query_at(&app, auth, &project, &database, "", body).await
}

/// `POST .../documents:runAggregationQuery` (database root scope).
pub async fn run_aggregation_root(
	axum::extract::State(app): axum::extract::State<App>,
	crate::core::extract::MaybeAuth(auth): crate::core::extract::MaybeAuth,
	axum::extract::Path((project, database)): axum::extract::Path<(String, String)>,
	Json(body): Json<JsonValue>,
) -> EbResult<Json<JsonValue>> {
	run_aggregation_at(&app, auth, &project, &database, "", body).await
}

fn parse_parent(project: &str, database: &str, rest: &str) -> EbResult<ResourcePath> {
	let rest = rest.trim_end_matches('/');
	if rest.is_empty() {
		Ok(ResourcePath::root(ProjectId::parse(project)?, DatabaseId::parse(database)?))
	} else {
		crate::document::handler::parse_full_path(project, database, rest)
	}
}

/// Merge sort for collection-group scans: order fields first (missing
/// values sort low), document path as tiebreak.
fn sort_documents(documents: &mut [StoredDocument], orders: &[Order]) {
	documents.sort_by(|a, b| {
		for order in orders {
			let parts: Vec<&str> = order.field.field_path.split('.').collect();
			let va = get_at_path(&a.fields, &parts);
			let vb = get_at_path(&b.fields, &parts);
			let ord = match (va, vb) {
				(None, None) => Ordering::Equal,
				(None, Some(_)) => Ordering::Less,
				(Some(_), None) => Ordering::Greater,
				(Some(x), Some(y)) => x.compare(y),
			};
			let ord = if order.direction == Direction::Descending { ord.reverse() } else { ord };
			if ord != Ordering::Equal {
				return ord;
			}
		}
		a.path.format().cmp(&b.path.format())
	});
}


// vim: ts=4
