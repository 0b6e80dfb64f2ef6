//! Document store operations.
//!
//! Create, Get, Update (with update-mask), Set (with merge flag), Delete,
//! and List over the typed field model. Every mutation lands in the backend
//! first and then emits a change event to the realtime bus.

pub mod handler;
pub mod mask;
pub mod merge;

use bson::doc;
use rand::RngExt;
use serde_json::Value as Json;

use crate::path::ResourcePath;
use crate::prelude::*;
use crate::realtime::EventType;
use crate::store_adapter::{
	FindOptions, KEY_CREATE_TIME, KEY_FIELDS, KEY_ID, KEY_PATH, KEY_UPDATE_TIME,
};
use crate::value::{FieldMap, encode_fields, fields_from_bson, fields_to_bson};

/// Maximum encoded document size (wire JSON bytes).
pub const MAX_DOCUMENT_BYTES: usize = 1 << 20;

/// Auto-generated document id length (hosted-service shape).
const DOC_ID_LENGTH: usize = 20;
const DOC_ID_CHARS: [char; 62] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
	'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
	'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
	'V', 'W', 'X', 'Y', 'Z',
];

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

/// A stored document with its identity and times.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
	pub path: ResourcePath,
	pub fields: FieldMap,
	pub create_time: Timestamp,
	pub update_time: Timestamp,
}

impl StoredDocument {
	/// Wire JSON form: `{name, fields, createTime, updateTime}`.
	pub fn to_wire(&self) -> Json {
		serde_json::json!({
			"name": self.path.format(),
			"fields": encode_fields(&self.fields),
			"createTime": self.create_time.to_rfc3339(),
			"updateTime": self.update_time.to_rfc3339(),
		})
	}

	pub(crate) fn to_stored_bson(&self) -> EbResult<bson::Document> {
		let doc_id = self
			.path
			.document_id()
			.ok_or_else(|| Error::Internal("stored document without document path".into()))?;
		Ok(doc! {
			KEY_ID: doc_id,
			KEY_PATH: self.path.format(),
			KEY_FIELDS: fields_to_bson(&self.fields),
			KEY_CREATE_TIME: self.create_time.to_bson(),
			KEY_UPDATE_TIME: self.update_time.to_bson(),
		})
	}
}

/// Decode a backend document into the typed model.
pub fn decode_stored(doc: &bson::Document) -> EbResult<StoredDocument> {
	let path = ResourcePath::parse(
		doc.get_str(KEY_PATH).map_err(|_| Error::Parse("stored document missing path".into()))?,
	)?;
	let fields = match doc.get_document(KEY_FIELDS) {
		Ok(inner) => fields_from_bson(inner)?,
		Err(_) => FieldMap::new(),
	};
	let create_time = doc
		.get_datetime(KEY_CREATE_TIME)
		.map(|dt| Timestamp::from_bson_datetime(*dt))
		.map_err(|_| Error::Parse("stored document missing createTime".into()))?;
	let update_time = doc
		.get_datetime(KEY_UPDATE_TIME)
		.map(|dt| Timestamp::from_bson_datetime(*dt))
		.map_err(|_| Error::Parse("stored document missing updateTime".into()))?;
	Ok(StoredDocument { path, fields, create_time, update_time })
}

/// Random 20-char alphanumeric document id.
pub fn random_doc_id() -> String {
	let mut rng = rand::rng();
	let mut id = String::with_capacity(DOC_ID_LENGTH);
	for _ in 0..DOC_ID_LENGTH {
		id.push(DOC_ID_CHARS[rng.random_range(0..DOC_ID_CHARS.len())]);
	}
	id
}

/// Reject oversized documents at the write boundary.
pub fn validate_document_size(fields: &FieldMap) -> EbResult<()> {
	let encoded = serde_json::to_string(&encode_fields(fields))?;
	if encoded.len() > MAX_DOCUMENT_BYTES {
		return Err(Error::InvalidArgument(format!(
			"document exceeds {} bytes ({})",
			MAX_DOCUMENT_BYTES,
			encoded.len()
		)));
	}
	Ok(())
}

/// Create a document. Without an id one is generated; creating over an
/// existing document fails with `AlreadyExists`.
pub async fn create_document(
	app: &App,
	collection: &ResourcePath,
	doc_id: Option<&str>,
	fields: FieldMap,
) -> EbResult<StoredDocument> {
	if !collection.is_collection() {
		return Err(Error::InvalidArgument(format!(
			"create target must be a collection path: {}",
			collection
		)));
	}
	validate_document_size(&fields)?;

	let generated;
	let doc_id = match doc_id {
		Some(id) => id,
		None => {
			generated = random_doc_id();
			&generated
		}
	};
	let path = collection.child(doc_id)?;

	let container = app
		.catalog
		.resolve_for_write(
			collection.project_id(),
			collection.database_id(),
			&collection.collection_path()?,
		)
		.await?;

	let now = Timestamp::now();
	let stored = StoredDocument { path, fields, create_time: now, update_time: now };
	app.store_adapter.insert(&container, stored.to_stored_bson()?).await?;

	app.bus.publish(EventType::Added, &stored.path.format(), Some(stored.to_wire()), None);
	Ok(stored)
}

/// Get a document. Absent documents fail with `NotFound`.
pub async fn get_document(app: &App, path: &ResourcePath) -> EbResult<StoredDocument> {
	let (container, doc_id) = locate(app, path)?;
	match app.store_adapter.get(&container, doc_id).await? {
		Some(doc) => decode_stored(&doc),
		None => Err(Error::NotFound(format!("document not found: {}", path))),
	}
}

/// Update an existing document. With a mask, only the masked field paths
/// are written (a masked path absent or null in the data is deleted);
/// without one the whole field map is replaced.
pub async fn update_document(
	app: &App,
	path: &ResourcePath,
	incoming: FieldMap,
	mask: Option<&[String]>,
) -> EbResult<StoredDocument> {
	let (container, doc_id) = locate(app, path)?;
	let existing = match app.store_adapter.get(&container, doc_id).await? {
		Some(doc) => decode_stored(&doc)?,
		None => return Err(Error::NotFound(format!("document not found: {}", path))),
	};
	let old_wire = existing.to_wire();

	let fields = match mask {
		Some(mask) => {
			let mut merged = existing.fields.clone();
			mask::apply_update_mask(&mut merged, &incoming, mask)?;
			merged
		}
		None => incoming,
	};
	validate_document_size(&fields)?;

	let stored = StoredDocument {
		path: existing.path,
		fields,
		create_time: existing.create_time,
		update_time: Timestamp::now(),
	};
	app.store_adapter.replace(&container, doc_id, stored.to_stored_bson()?, false).await?;

	app.bus.publish(
		EventType::Modified,
		&stored.path.format(),
		Some(stored.to_wire()),
		Some(old_wire),
	);
	Ok(stored)
}

/// Set a document: upsert with either full replacement or deep merge.
pub async fn set_document(
	app: &App,
	path: &ResourcePath,
	incoming: FieldMap,
	merge: bool,
) -> EbResult<StoredDocument> {
	if !path.is_document() {
		return Err(Error::InvalidArgument(format!("set target must be a document path: {}", path)));
	}
	let doc_id = path
		.document_id()
		.ok_or_else(|| Error::Internal("document path without id".into()))?;
	let container = app
		.catalog
		.resolve_for_write(path.project_id(), path.database_id(), &path.collection_path()?)
		.await?;

	let existing = match app.store_adapter.get(&container, doc_id).await? {
		Some(doc) => Some(decode_stored(&doc)?),
		None => None,
	};

	let now = Timestamp::now();
	let (stored, event_type, old_wire) = match existing {
		Some(current) => {
			let old_wire = current.to_wire();
			let fields = if merge {
				let mut merged = current.fields;
				merge::deep_merge(&mut merged, &incoming);
				merged
			} else {
				incoming
			};
			let stored = StoredDocument {
				path: path.clone(),
				fields,
				create_time: current.create_time,
				update_time: now,
			};
			(stored, EventType::Modified, Some(old_wire))
		}
		None => {
			let stored = StoredDocument {
				path: path.clone(),
				fields: incoming,
				create_time: now,
				update_time: now,
			};
			(stored, EventType::Added, None)
		}
	};
	validate_document_size(&stored.fields)?;

	app.store_adapter.replace(&container, doc_id, stored.to_stored_bson()?, true).await?;
	app.bus.publish(event_type, &stored.path.format(), Some(stored.to_wire()), old_wire);
	Ok(stored)
}

/// Delete a document. Absent documents fail with `NotFound`.
pub async fn delete_document(app: &App, path: &ResourcePath) -> EbResult<()> {
	let (container, doc_id) = locate(app, path)?;
	let existing = match app.store_adapter.get(&container, doc_id).await? {
		Some(doc) => decode_stored(&doc)?,
		None => return Err(Error::NotFound(format!("document not found: {}", path))),
	};

	if !app.store_adapter.delete(&container, doc_id).await? {
		return Err(Error::NotFound(format!("document not found: {}", path)));
	}
	app.bus.publish(EventType::Removed, &path.format(), None, Some(existing.to_wire()));
	Ok(())
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
	pub page_size: Option<i64>,
	pub page_token: Option<String>,
	/// `field` or `field desc`.
	pub order_by: Option<String>,
	/// Also report document ids that exist only as parents of registered
	/// subcollections.
	pub show_missing: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ListResult {
	pub documents: Vec<StoredDocument>,
	/// Full paths of missing parent documents (name-only stubs).
	pub missing: Vec<String>,
	pub next_page_token: Option<String>,
}

/// List a collection's documents with paging.
pub async fn list_documents(
	app: &App,
	collection: &ResourcePath,
	opts: ListOptions,
) -> EbResult<ListResult> {
	if !collection.is_collection() {
		return Err(Error::InvalidArgument(format!(
			"list target must be a collection path: {}",
			collection
		)));
	}
	let page_size = match opts.page_size {
		Some(size) if size <= 0 => {
			return Err(Error::InvalidArgument("pageSize must be positive".into()));
		}
		Some(size) => size.min(MAX_PAGE_SIZE),
		None => DEFAULT_PAGE_SIZE,
	};
	let container = app.catalog.resolve(
		collection.project_id(),
		collection.database_id(),
		&collection.collection_path()?,
	);

	let mut result = ListResult::default();
	match &opts.order_by {
		None => {
			// Keyed paging on the document id
			let filter = match opts.page_token.as_deref() {
				Some(token) => doc! { KEY_ID: { "$gt": decode_page_token(token, "i")? } },
				None => bson::Document::new(),
			};
			let find = FindOptions {
				sort: Some(doc! { KEY_ID: 1 }),
				skip: None,
				limit: Some(page_size + 1),
			};
			let mut docs = app.store_adapter.find(&container, filter, find).await?;
			if docs.len() as i64 > page_size {
				docs.truncate(page_size as usize);
				if let Some(last) = docs.last() {
					if let Ok(id) = last.get_str(KEY_ID) {
						result.next_page_token = Some(encode_page_token("i", id));
					}
				}
			}
			for doc in &docs {
				result.documents.push(decode_stored(doc)?);
			}
		}
		Some(order_by) => {
			// Ordered paging by offset over the planned sort
			let (field, descending) = parse_order_by(order_by)?;
			let offset = match opts.page_token.as_deref() {
				Some(token) => decode_page_token(token, "o")?
					.parse::<i64>()
					.map_err(|_| Error::InvalidArgument("invalid page token".into()))?,
				None => 0,
			};
			let pipeline = vec![
				doc! { "$addFields": { "__ord0": crate::query::plan::order_key_expr(&field)? } },
				doc! { "$sort": { "__ord0": if descending { -1 } else { 1 }, KEY_ID: 1 } },
				doc! { "$skip": offset },
				doc! { "$limit": page_size + 1 },
				doc! { "$unset": ["__ord0"] },
			];
			let mut docs = app.store_adapter.aggregate(&container, pipeline).await?;
			if docs.len() as i64 > page_size {
				docs.truncate(page_size as usize);
				result.next_page_token =
					Some(encode_page_token("o", &(offset + page_size).to_string()));
			}
			for doc in &docs {
				result.documents.push(decode_stored(doc)?);
			}
		}
	}

	if opts.show_missing {
		let parents = app
			.catalog
			.subcollection_parents(
				collection.project_id(),
				collection.database_id(),
				&collection.collection_path()?,
			)
			.await?;
		for parent_id in parents {
			if result.documents.iter().any(|d| d.path.document_id() == Some(parent_id.as_ref())) {
				continue;
			}
			if app.store_adapter.get(&container, &parent_id).await?.is_none() {
				result.missing.push(collection.child(&parent_id)?.format());
			}
		}
	}

	Ok(result)
}

fn locate<'a>(app: &App, path: &'a ResourcePath) -> EbResult<(crate::store_adapter::ContainerRef, &'a str)> {
	if !path.is_document() {
		return Err(Error::InvalidArgument(format!("not a document path: {}", path)));
	}
	let doc_id = path
		.document_id()
		.ok_or_else(|| Error::Internal("document path without id".into()))?;
	let container =
		app.catalog.resolve(path.project_id(), path.database_id(), &path.collection_path()?);
	Ok((container, doc_id))
}

fn parse_order_by(order_by: &str) -> EbResult<(String, bool)> {
	let mut parts = order_by.split_whitespace();
	let field = parts
		.next()
		.ok_or_else(|| Error::InvalidArgument("empty orderBy".into()))?
		.to_string();
	let descending = match parts.next() {
		None => false,
		Some("asc") | Some("ASC") | Some("ASCENDING") => false,
		Some("desc") | Some("DESC") | Some("DESCENDING") => true,
		Some(other) => {
			return Err(Error::InvalidArgument(format!("invalid orderBy direction: {}", other)));
		}
	};
	Ok((field, descending))
}

fn encode_page_token(kind: &str, value: &str) -> String {
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
	URL_SAFE_NO_PAD.encode(format!("{}:{}", kind, value))
}

fn decode_page_token(token: &str, expected_kind: &str) -> EbResult<String> {
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
	let raw = URL_SAFE_NO_PAD
		.decode(token.as_bytes())
		.map_err(|_| Error::InvalidArgument("invalid page token".into()))?;
	let decoded = String::from_utf8(raw)
		.map_err(|_| Error::InvalidArgument("invalid page token".into()))?;
	let (kind, value) = decoded
		.split_once(':')
		.ok_or_else(|| Error::InvalidArgument("invalid page token".into()))?;
	if kind != expected_kind {
		return Err(Error::InvalidArgument("page token does not match the requested order".into()));
	}
	Ok(value.to_string())
}


// vim: ts=4
