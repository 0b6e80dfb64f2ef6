//! Project, database, and collection metadata HTTP handlers.

use axum::{
	Json,
	extract::{Path, State},
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::prelude::*;

use super::IndexDef;

/// `GET /v1/projects/{project}`.
pub async fn get_project(
	State(app): State<App>,
	Path(project): Path<String>,
) -> EbResult<Json<JsonValue>> {
	let project_id = ProjectId::parse(&project)?;
	match app.catalog.get_project(&project_id).await? {
		Some(info) => Ok(Json(serde_json::to_value(info)?)),
		None => Err(Error::NotFound(format!("project not found: {}", project_id))),
	}
}

/// `GET /v1/projects/{project}/databases/{database}` (plain metadata) or
/// `.../{database}:rules` (the deployed rules source).
pub async fn get_database_op(
	State(app): State<App>,
	Path((project, dbop)): Path<(String, String)>,
) -> EbResult<Json<JsonValue>> {
	let project_id = ProjectId::parse(&project)?;
	match dbop.split_once(':') {
		Some((database, "rules")) => {
			let database_id = DatabaseId::parse(database)?;
			crate::rules::handler::get_rules_source(&app, &project_id, &database_id).await
		}
		Some((_, op)) => {
			Err(Error::InvalidArgument(format!("unknown database operation: {}", op)))
		}
		None => {
			let database_id = DatabaseId::parse(&dbop)?;
			match app.catalog.get_database(&project_id, &database_id).await? {
				Some(info) => Ok(Json(serde_json::to_value(info)?)),
				None => Err(Error::NotFound(format!(
					"database not found: {}/{}",
					project_id, database_id
				))),
			}
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetaPatch {
	#[serde(default)]
	pub indexes: Vec<IndexDef>,
}

/// `PATCH /v1/projects/{p}/databases/{d}/collections/{*path}`:
/// metadata-only collection update (index descriptors).
pub async fn patch_collection_meta(
	State(app): State<App>,
	Path((project, database, collection_path)): Path<(String, String, String)>,
	Json(patch): Json<CollectionMetaPatch>,
) -> EbResult<Json<JsonValue>> {
	let project_id = ProjectId::parse(&project)?;
	let database_id = DatabaseId::parse(&database)?;
	let meta = app
		.catalog
		.update_collection_meta(&project_id, &database_id, &collection_path, patch.indexes)
		.await?;
	Ok(Json(serde_json::to_value(meta)?))
}

// vim: ts=4
