//! Ordered batch writes.
//!
//! A batch is pre-validated as a whole (well-formed document paths, data
//! presence, the 500-operation cap) and rejected atomically on any
//! validation failure. The apply phase then runs in declared order and
//! reports one `WriteResult` and one `Status` per operation.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::document;
use crate::path::ResourcePath;
use crate::prelude::*;
use crate::value::decode_fields;

/// Batch size cap.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWriteRequest {
	#[serde(default)]
	pub writes: Vec<WriteOperation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
	Create,
	Set,
	Update,
	Delete,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOperation {
	#[serde(rename = "type", alias = "op")]
	pub kind: WriteKind,
	/// Full resource path of the target document (or collection, for
	/// create-with-auto-id).
	pub path: String,
	/// Wire `fields` object; required for create/set/update.
	pub data: Option<Json>,
	pub update_mask: Option<Vec<String>>,
	#[serde(default)]
	pub merge: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub update_time: Option<Timestamp>,
}

/// Per-operation outcome; code 0 means success.
#[derive(Clone, Debug, Serialize)]
pub struct WriteStatus {
	pub code: u16,
	pub message: String,
}

impl WriteStatus {
	pub fn ok() -> Self {
		Self { code: 0, message: "OK".to_string() }
	}

	pub fn from_error(err: &Error) -> Self {
		Self { code: err.code(), message: err.to_string() }
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWriteResponse {
	pub write_results: Vec<WriteResult>,
	pub status: Vec<WriteStatus>,
}

/// Validate the whole batch up front. Returns the parsed target paths in
/// declared order.
pub fn validate_batch(
	project_id: &ProjectId,
	database_id: &DatabaseId,
	request: &BatchWriteRequest,
) -> EbResult<Vec<ResourcePath>> {
	if request.writes.len() > MAX_BATCH_OPS {
		return Err(Error::InvalidArgument(format!(
			"batch exceeds {} operations ({})",
			MAX_BATCH_OPS,
			request.writes.len()
		)));
	}

	let mut paths = Vec::with_capacity(request.writes.len());
	for (i, write) in request.writes.iter().enumerate() {
		let path = ResourcePath::parse(&write.path)
			.map_err(|err| Error::InvalidArgument(format!("write {}: {}", i, err)))?;
		if path.project_id() != project_id || path.database_id() != database_id {
			return Err(Error::InvalidArgument(format!(
				"write {} targets a different database: {}",
				i, write.path
			)));
		}
		match write.kind {
			WriteKind::Create => {
				if !path.is_document() && !path.is_collection() {
					return Err(Error::InvalidArgument(format!(
						"write {}: create target must be a document or collection path",
						i
					)));
				}
			}
			WriteKind::Set | WriteKind::Update | WriteKind::Delete => {
				if !path.is_document() {
					return Err(Error::InvalidArgument(format!(
						"write {}: target must be a document path",
						i
					)));
				}
			}
		}
		if write.data.is_none() && write.kind != WriteKind::Delete {
			return Err(Error::InvalidArgument(format!(
				"write {}: data is required for {:?}",
				i, write.kind
			)));
		}
		paths.push(path);
	}
	Ok(paths)
}

/// Apply a validated batch in declared order with per-operation status.
pub async fn apply_batch(
	app: &App,
	project_id: &ProjectId,
	database_id: &DatabaseId,
	request: &BatchWriteRequest,
) -> EbResult<BatchWriteResponse> {
	let paths = validate_batch(project_id, database_id, request)?;

	let mut write_results = Vec::with_capacity(request.writes.len());
	let mut status = Vec::with_capacity(request.writes.len());
	for (write, path) in request.writes.iter().zip(paths.iter()) {
		match apply_one(app, write, path).await {
			Ok(update_time) => {
				write_results.push(WriteResult { update_time });
				status.push(WriteStatus::ok());
			}
			Err(err) => {
				debug!("batch write failed on {}: {}", write.path, err);
				write_results.push(WriteResult::default());
				status.push(WriteStatus::from_error(&err));
			}
		}
	}
	Ok(BatchWriteResponse { write_results, status })
}

async fn apply_one(
	app: &App,
	write: &WriteOperation,
	path: &ResourcePath,
) -> EbResult<Option<Timestamp>> {
	let fields = match &write.data {
		Some(data) => decode_fields(data)?,
		None => crate::value::FieldMap::new(),
	};
	match write.kind {
		WriteKind::Create => {
			let stored = if path.is_document() {
				let parent = path
					.parent()
					.ok_or_else(|| Error::InvalidArgument("document path without parent".into()))?;
				let doc_id = path
					.document_id()
					.ok_or_else(|| Error::Internal("document path without id".into()))?;
				document::create_document(app, &parent, Some(doc_id), fields).await?
			} else {
				document::create_document(app, path, None, fields).await?
			};
			Ok(Some(stored.update_time))
		}
		WriteKind::Set => {
			let stored = document::set_document(app, path, fields, write.merge).await?;
			Ok(Some(stored.update_time))
		}
		WriteKind::Update => {
			let stored =
				document::update_document(app, path, fields, write.update_mask.as_deref())
					.await?;
			Ok(Some(stored.update_time))
		}
		WriteKind::Delete => {
			document::delete_document(app, path).await?;
			Ok(None)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn ids() -> (ProjectId, DatabaseId) {
		let project = match ProjectId::parse("p1") {
			Ok(p) => p,
			Err(err) => panic!("bad project id: {}", err),
		};
		let database = match DatabaseId::parse("") {
			Ok(d) => d,
			Err(err) => panic!("bad database id: {}", err),
		};
		(project, database)
	}

	fn write(kind: WriteKind, path: &str, data: Option<Json>) -> WriteOperation {
		WriteOperation { kind, path: path.to_string(), data, update_mask: None, merge: false }
	}

	#[test]
	fn test_validate_batch_caps_at_500() {
		let (project, database) = ids();
		let request = BatchWriteRequest {
			writes: (0..=MAX_BATCH_OPS)
				.map(|i| {
					write(
						WriteKind::Delete,
						&format!("projects/p1/databases/(default)/documents/c/d{}", i),
						None,
					)
				})
				.collect(),
		};
		assert!(matches!(
			validate_batch(&project, &database, &request),
			Err(Error::InvalidArgument(_))
		));
	}

	#[test]
	fn test_validate_batch_requires_data() {
		let (project, database) = ids();
		let request = BatchWriteRequest {
			writes: vec![write(
				WriteKind::Set,
				"projects/p1/databases/(default)/documents/c/d1",
				None,
			)],
		};
		assert!(validate_batch(&project, &database, &request).is_err());
	}

	#[test]
	fn test_validate_batch_rejects_foreign_database() {
		let (project, database) = ids();
		let request = BatchWriteRequest {
			writes: vec![write(
				WriteKind::Delete,
				"projects/other/databases/(default)/documents/c/d1",
				None,
			)],
		};
		assert!(validate_batch(&project, &database, &request).is_err());
	}

	#[test]
	fn test_validate_batch_accepts_wire_shape() {
		let (project, database) = ids();
		let request: BatchWriteRequest = match serde_json::from_value(json!({
			"writes": [
				{ "type": "create",
					"path": "projects/p1/databases/(default)/documents/users",
					"data": { "name": { "stringValue": "Ana" } } },
				{ "op": "delete",
					"path": "projects/p1/databases/(default)/documents/users/u2" },
			],
		})) {
			Ok(r) => r,
			Err(err) => panic!("batch parse failed: {}", err),
		};
		let paths = validate_batch(&project, &database, &request);
		assert!(paths.is_ok());
	}
}

// vim: ts=4
