//! Write-surface HTTP handlers: batch writes, transactions, and atomic
//! field transforms.
//!
//! The database-scoped operations share one route
//! (`/v1/projects/{p}/databases/{database}:op`); the suffix picks the
//! operation.

use axum::{
	Json,
	extract::{Path, State},
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::core::extract::MaybeAuth;
use crate::document::handler::{enforce, parse_full_path};
use crate::prelude::*;
use crate::rules::RuleOp;
use crate::types::AuthContext;
use crate::value::{FieldValue, fields_to_plain};

use super::batch::{self, BatchWriteRequest, WriteKind, WriteOperation};
use super::{FieldOperator, apply_field_operator};

/// `POST /v1/projects/{project}/databases/{database}:operation`.
pub async fn database_op(
	State(app): State<App>,
	MaybeAuth(auth): MaybeAuth,
	Path((project, dbop)): Path<(String, String)>,
	Json(body): Json<JsonValue>,
) -> EbResult<Json<JsonValue>> {
	let (database, op) = dbop
		.split_once(':')
		.ok_or_else(|| Error::InvalidArgument(format!("missing database operation: {}", dbop)))?;
	let project_id = ProjectId::parse(&project)?;
	let database_id = DatabaseId::parse(database)?;

	match op {
		"batchWrite" => {
			let request: BatchWriteRequest = serde_json::from_value(body)
				.map_err(|err| Error::InvalidArgument(format!("invalid batch: {}", err)))?;
			enforce_writes(&app, auth.as_ref(), &request).await?;
			let response = batch::apply_batch(&app, &project_id, &database_id, &request).await?;
			Ok(Json(serde_json::to_value(response)?))
		}
		"beginTransaction" => {
			let transaction = app.transactions.begin(&app, &project_id, &database_id).await?;
			Ok(Json(serde_json::json!({ "transaction": transaction })))
		}
		"commit" => {
			let transaction = body
				.get("transaction")
				.and_then(JsonValue::as_str)
				.map(ToString::to_string);
			let writes: Vec<WriteOperation> = match body.get("writes") {
				Some(writes) => serde_json::from_value(writes.clone())
					.map_err(|err| Error::InvalidArgument(format!("invalid writes: {}", err)))?,
				None => Vec::new(),
			};

			match transaction {
				Some(transaction) => {
					let request = BatchWriteRequest { writes };
					batch::validate_batch(&project_id, &database_id, &request)?;
					enforce_writes(&app, auth.as_ref(), &request).await?;

					let mut write_results = Vec::with_capacity(request.writes.len());
					for write in &request.writes {
						match app.transactions.apply_write_in(&app, &transaction, write).await {
							Ok(result) => write_results.push(result),
							Err(err) => {
								// One failed write aborts the whole scope
								let _ = app.transactions.rollback(&transaction).await;
								return Err(err);
							}
						}
					}
					app.transactions.commit(&app, &transaction).await?;
					Ok(Json(serde_json::json!({
						"writeResults": write_results,
						"commitTime": Timestamp::now().to_rfc3339(),
					})))
				}
				None => {
					let request = BatchWriteRequest { writes };
					enforce_writes(&app, auth.as_ref(), &request).await?;
					let response =
						batch::apply_batch(&app, &project_id, &database_id, &request).await?;
					Ok(Json(serde_json::json!({
						"writeResults": response.write_results,
						"commitTime": Timestamp::now().to_rfc3339(),
					})))
				}
			}
		}
		"rollback" => {
			let transaction = body
				.get("transaction")
				.and_then(JsonValue::as_str)
				.ok_or_else(|| Error::InvalidArgument("missing transaction id".into()))?;
			app.transactions.rollback(transaction).await?;
			Ok(Json(serde_json::json!({})))
		}
		other => Err(Error::InvalidArgument(format!("unknown database operation: {}", other))),
	}
}

/// Wire shape of a `:transform` request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformRequest {
	field_path: String,
	increment: Option<JsonValue>,
	array_union: Option<ValuesArg>,
	array_remove: Option<ValuesArg>,
	#[serde(default)]
	server_timestamp: bool,
}

#[derive(Debug, Deserialize)]
struct ValuesArg {
	values: Vec<JsonValue>,
}

/// `POST {document}:transform`: apply one atomic field operator.
pub async fn transform_at(
	app: &App,
	auth: Option<AuthContext>,
	project: &str,
	database: &str,
	target_rest: &str,
	body: JsonValue,
) -> EbResult<Json<JsonValue>> {
	let path = parse_full_path(project, database, target_rest)?;
	let request: TransformRequest = serde_json::from_value(body)
		.map_err(|err| Error::InvalidArgument(format!("invalid transform: {}", err)))?;

	let operator = parse_operator(&request)?;

	let resource = match crate::document::get_document(app, &path).await {
		Ok(doc) => Some(fields_to_plain(&doc.fields)),
		Err(Error::NotFound(_)) => None,
		Err(err) => return Err(err),
	};
	enforce(app, auth.as_ref(), &path, RuleOp::Update, resource, None).await?;

	let new_value = apply_field_operator(app, &path, &request.field_path, operator).await?;
	Ok(Json(serde_json::json!({
		"name": path.format(),
		"fieldPath": request.field_path,
		"newValue": new_value.to_wire(),
	})))
}

fn parse_operator(request: &TransformRequest) -> EbResult<FieldOperator> {
	let mut operators = Vec::new();
	if let Some(delta) = &request.increment {
		operators.push(FieldOperator::Increment(FieldValue::from_wire(delta)?));
	}
	if let Some(arg) = &request.array_union {
		operators.push(FieldOperator::ArrayUnion(decode_elements(&arg.values)?));
	}
	if let Some(arg) = &request.array_remove {
		operators.push(FieldOperator::ArrayRemove(decode_elements(&arg.values)?));
	}
	if request.server_timestamp {
		operators.push(FieldOperator::ServerTimestamp);
	}
	match operators.len() {
		1 => operators
			.pop()
			.ok_or_else(|| Error::Internal("operator vanished".into())),
		n => Err(Error::InvalidArgument(format!(
			"transform must carry exactly one operator, got {}",
			n
		))),
	}
}

fn decode_elements(values: &[JsonValue]) -> EbResult<Vec<FieldValue>> {
	let mut decoded = Vec::with_capacity(values.len());
	for value in values {
		decoded.push(FieldValue::from_wire(value)?);
	}
	Ok(decoded)
}

/// Rules check per batched write, before anything applies.
async fn enforce_writes(
	app: &App,
	auth: Option<&AuthContext>,
	request: &BatchWriteRequest,
) -> EbResult<()> {
	for write in &request.writes {
		let path = crate::path::ResourcePath::parse(&write.path)?;
		let op = match write.kind {
			WriteKind::Create => RuleOp::Create,
			WriteKind::Set | WriteKind::Update => RuleOp::Update,
			WriteKind::Delete => RuleOp::Delete,
		};
		let request_data = match &write.data {
			Some(data) => Some(fields_to_plain(&crate::value::decode_fields(data)?)),
			None => None,
		};
		enforce(app, auth, &path, op, None, request_data).await?;
	}
	Ok(())
}

// vim: ts=4
