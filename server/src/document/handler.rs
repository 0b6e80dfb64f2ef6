//! Document HTTP handlers.
//!
//! One wildcard route serves the whole `documents/` subtree; the request
//! method and a possible `:operation` suffix on the last segment select the
//! operation. Rules are enforced here, before the engine call, so the
//! operation layer below stays permission-free.

use axum::{
	Json,
	extract::{Path, Query, State},
	http::HeaderMap,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::core::extract::{MaybeAuth, organization_id};
use crate::document::{self, ListOptions};
use crate::path::ResourcePath;
use crate::prelude::*;
use crate::rules::{AccessRequest, RuleOp};
use crate::types::AuthContext;
use crate::value::{decode_fields, fields_to_plain};

/// Query params shared by the document routes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentParams {
	pub document_id: Option<String>,
	#[serde(rename = "updateMask.fieldPaths")]
	pub update_mask: Option<String>,
	#[serde(default)]
	pub merge: bool,
	pub page_size: Option<i64>,
	pub page_token: Option<String>,
	pub order_by: Option<String>,
	#[serde(default)]
	pub show_missing: bool,
}

/// Evaluate rules for an operation on a path.
pub(crate) async fn enforce(
	app: &App,
	auth: Option<&AuthContext>,
	path: &ResourcePath,
	op: RuleOp,
	resource_data: Option<JsonValue>,
	request_data: Option<JsonValue>,
) -> EbResult<()> {
	let request = AccessRequest {
		project_id: path.project_id(),
		database_id: path.database_id(),
		segments: path.segments().to_vec(),
		op,
		auth,
		resource_data,
		request_data,
	};
	app.rules.enforce(app, &request).await
}

pub(crate) fn parse_full_path(project: &str, database: &str, rest: &str) -> EbResult<ResourcePath> {
	ResourcePath::parse(&format!(
		"projects/{}/databases/{}/documents/{}",
		project, database, rest
	))
}

/// GET `/v1/projects/{p}/databases/{d}/documents/{*path}`:
/// document get, or collection list.
pub async fn get_or_list(
	State(app): State<App>,
	MaybeAuth(auth): MaybeAuth,
	Path((project, database, rest)): Path<(String, String, String)>,
	Query(params): Query<DocumentParams>,
) -> EbResult<Json<JsonValue>> {
	let path = parse_full_path(&project, &database, &rest)?;

	if path.is_document() {
		let found = match document::get_document(&app, &path).await {
			Ok(doc) => Some(doc),
			Err(Error::NotFound(_)) => None,
			Err(err) => return Err(err),
		};
		let resource = found.as_ref().map(|doc| fields_to_plain(&doc.fields));
		enforce(&app, auth.as_ref(), &path, RuleOp::Read, resource, None).await?;

		let doc =
			found.ok_or_else(|| Error::NotFound(format!("document not found: {}", path)))?;
		return Ok(Json(doc.to_wire()));
	}

	enforce(&app, auth.as_ref(), &path, RuleOp::List, None, None).await?;
	let result = document::list_documents(
		&app,
		&path,
		ListOptions {
			page_size: params.page_size,
			page_token: params.page_token,
			order_by: params.order_by,
			show_missing: params.show_missing,
		},
	)
	.await?;

	let mut documents: Vec<JsonValue> =
		result.documents.iter().map(document::StoredDocument::to_wire).collect();
	for name in &result.missing {
		// Name-only stubs for missing subcollection parents
		documents.push(serde_json::json!({ "name": name }));
	}
	let mut response = serde_json::json!({ "documents": documents });
	if let Some(token) = result.next_page_token {
		response["nextPageToken"] = JsonValue::String(token);
	}
	Ok(Json(response))
}

/// POST `/v1/projects/{p}/databases/{d}/documents/{*path}`:
/// document create, or a `:runQuery` / `:runAggregationQuery` /
/// `:transform` operation addressed to the path.
pub async fn post_dispatch(
	State(app): State<App>,
	MaybeAuth(auth): MaybeAuth,
	headers: HeaderMap,
	Path((project, database, rest)): Path<(String, String, String)>,
	Query(params): Query<DocumentParams>,
	Json(body): Json<JsonValue>,
) -> EbResult<Json<JsonValue>> {
	if let Some(parent) = rest.strip_suffix(":runQuery") {
		return crate::query::handler::run_query_at(&app, auth, &project, &database, parent, body)
			.await;
	}
	if let Some(parent) = rest.strip_suffix(":runAggregationQuery") {
		return crate::query::handler::run_aggregation_at(
			&app, auth, &project, &database, parent, body,
		)
		.await;
	}
	if let Some(target) = rest.strip_suffix(":transform") {
		return crate::writes::handler::transform_at(
			&app, auth, &project, &database, target, body,
		)
		.await;
	}

	let collection = parse_full_path(&project, &database, &rest)?;
	let fields = decode_fields(body.get("fields").unwrap_or(&JsonValue::Object(Default::default())))?;

	// Record the organization on first write when the header carries one
	if let Some(org) = organization_id(&headers) {
		if !app.settings.strict_mode {
			app.catalog.ensure_project(collection.project_id(), Some(&org)).await?;
		}
	}

	let doc_path = match &params.document_id {
		Some(id) => collection.child(id)?,
		None => collection.child(&document::random_doc_id())?,
	};
	enforce(
		&app,
		auth.as_ref(),
		&doc_path,
		RuleOp::Create,
		None,
		Some(fields_to_plain(&fields)),
	)
	.await?;

	let doc_id = doc_path
		.document_id()
		.ok_or_else(|| Error::Internal("document path without id".into()))?;
	let stored = document::create_document(&app, &collection, Some(doc_id), fields).await?;
	Ok(Json(stored.to_wire()))
}

/// PATCH `/v1/{document}?updateMask.fieldPaths=a,b`: masked update.
pub async fn patch_document(
	State(app): State<App>,
	MaybeAuth(auth): MaybeAuth,
	Path((project, database, rest)): Path<(String, String, String)>,
	Query(params): Query<DocumentParams>,
	Json(body): Json<JsonValue>,
) -> EbResult<Json<JsonValue>> {
	let path = parse_full_path(&project, &database, &rest)?;
	let fields = decode_fields(body.get("fields").unwrap_or(&JsonValue::Object(Default::default())))?;
	let mask: Option<Vec<String>> = params
		.update_mask
		.as_ref()
		.map(|raw| raw.split(',').map(|p| p.trim().to_string()).collect());

	let resource = match document::get_document(&app, &path).await {
		Ok(doc) => Some(fields_to_plain(&doc.fields)),
		Err(Error::NotFound(_)) => None,
		Err(err) => return Err(err),
	};
	enforce(
		&app,
		auth.as_ref(),
		&path,
		RuleOp::Update,
		resource,
		Some(fields_to_plain(&fields)),
	)
	.await?;

	let stored = document::update_document(&app, &path, fields, mask.as_deref()).await?;
	Ok(Json(stored.to_wire()))
}

/// PUT `/v1/{document}?merge=true`: set with optional merge.
pub async fn put_document(
	State(app): State<App>,
	MaybeAuth(auth): MaybeAuth,
	Path((project, database, rest)): Path<(String, String, String)>,
	Query(params): Query<DocumentParams>,
	Json(body): Json<JsonValue>,
) -> EbResult<Json<JsonValue>> {
	let path = parse_full_path(&project, &database, &rest)?;
	let fields = decode_fields(body.get("fields").unwrap_or(&JsonValue::Object(Default::default())))?;

	let existing = match document::get_document(&app, &path).await {
		Ok(doc) => Some(fields_to_plain(&doc.fields)),
		Err(Error::NotFound(_)) => None,
		Err(err) => return Err(err),
	};
	let op = if existing.is_some() { RuleOp::Update } else { RuleOp::Create };
	enforce(&app, auth.as_ref(), &path, op, existing, Some(fields_to_plain(&fields))).await?;

	let stored = document::set_document(&app, &path, fields, params.merge).await?;
	Ok(Json(stored.to_wire()))
}

/// DELETE `/v1/{document}`.
pub async fn delete_document(
	State(app): State<App>,
	MaybeAuth(auth): MaybeAuth,
	Path((project, database, rest)): Path<(String, String, String)>,
) -> EbResult<Json<JsonValue>> {
	let path = parse_full_path(&project, &database, &rest)?;

	let resource = match document::get_document(&app, &path).await {
		Ok(doc) => Some(fields_to_plain(&doc.fields)),
		Err(Error::NotFound(_)) => None,
		Err(err) => return Err(err),
	};
	enforce(&app, auth.as_ref(), &path, RuleOp::Delete, resource, None).await?;

	document::delete_document(&app, &path).await?;
	Ok(Json(serde_json::json!({})))
}

// vim: ts=4
