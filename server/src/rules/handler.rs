//! Rules deployment HTTP handlers.

use axum::{
	Json,
	extract::{Path, State},
	http::StatusCode,
	response::{IntoResponse, Response},
};

use crate::prelude::*;

use super::DeployResult;

/// `PUT /v1/projects/{project}/databases/{database}:rules`: deploy rules
/// source. Parse failures come back as a 400 with the full diagnostics
/// list.
pub async fn put_database_op(
	State(app): State<App>,
	Path((project, dbop)): Path<(String, String)>,
	body: String,
) -> EbResult<Response> {
	let (database, op) = dbop
		.split_once(':')
		.ok_or_else(|| Error::InvalidArgument(format!("missing database operation: {}", dbop)))?;
	if op != "rules" {
		return Err(Error::InvalidArgument(format!("unknown database operation: {}", op)));
	}
	let project_id = ProjectId::parse(&project)?;
	let database_id = DatabaseId::parse(database)?;

	match app.rules.deploy(&project_id, &database_id, &body).await? {
		DeployResult::Deployed { version, content_hash, rule_count } => Ok(Json(
			serde_json::json!({
				"version": version,
				"contentHash": content_hash,
				"ruleCount": rule_count,
			}),
		)
		.into_response()),
		DeployResult::Rejected(errors) => Ok((
			StatusCode::BAD_REQUEST,
			Json(serde_json::json!({ "errors": errors })),
		)
			.into_response()),
	}
}

/// `GET .../{database}:rules` dispatch target: the stored rules source.
pub async fn get_rules_source(
	app: &App,
	project_id: &ProjectId,
	database_id: &DatabaseId,
) -> EbResult<Json<serde_json::Value>> {
	match app.rules.get_source(project_id, database_id).await? {
		Some(source) => Ok(Json(serde_json::json!({ "source": source }))),
		None => Err(Error::NotFound(format!(
			"no ruleset deployed for {}/{}",
			project_id, database_id
		))),
	}
}

// vim: ts=4
