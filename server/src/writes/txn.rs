//! Transaction lifecycle.
//!
//! `begin` binds a generated transaction id to a backend session
//! transaction for one (project, database); reads and writes then funnel
//! through that handle, and `commit` translates backend signals into
//! `Aborted` (retryable conflict) or `FailedPrecondition` (non-retryable).
//! Change events buffer in the transaction and publish only after a
//! successful commit. Idle transactions are expired by the reaper; dropping
//! the handle rolls the backend session back.

use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::batch::{WriteKind, WriteOperation, WriteResult};
use crate::document::mask::apply_update_mask;
use crate::document::merge::deep_merge;
use crate::document::{StoredDocument, decode_stored, random_doc_id, validate_document_size};
use crate::path::ResourcePath;
use crate::prelude::*;
use crate::realtime::EventType;
use crate::store_adapter::StoreTransaction;
use crate::value::{FieldMap, decode_fields};

struct PendingEvent {
	event_type: EventType,
	full_path: String,
	data: Option<Json>,
	old_data: Option<Json>,
}

struct ActiveTransaction {
	txn: Box<dyn StoreTransaction>,
	project_id: ProjectId,
	database_id: DatabaseId,
	last_used: Instant,
	pending_events: Vec<PendingEvent>,
}

/// Registry of active transactions keyed by their generated id.
#[derive(Default)]
pub struct TransactionManager {
	active: Mutex<HashMap<Box<str>, ActiveTransaction>>,
}

impl TransactionManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Begin a transaction scoped to one database and return its id.
	pub async fn begin(
		&self,
		app: &App,
		project_id: &ProjectId,
		database_id: &DatabaseId,
	) -> EbResult<Box<str>> {
		let physical = crate::tenancy::physical_database(None, project_id, database_id);
		let txn = app.store_adapter.transaction(&physical).await?;

		let id: Box<str> = uuid::Uuid::new_v4().to_string().into();
		self.active.lock().insert(
			id.clone(),
			ActiveTransaction {
				txn,
				project_id: project_id.clone(),
				database_id: database_id.clone(),
				last_used: Instant::now(),
				pending_events: Vec::new(),
			},
		);
		debug!("transaction {} started for {}/{}", id, project_id, database_id);
		Ok(id)
	}

	/// Read a document through a transaction's view.
	pub async fn get_in(
		&self,
		app: &App,
		transaction_id: &str,
		path: &ResourcePath,
	) -> EbResult<Option<StoredDocument>> {
		let mut entry = self.take(transaction_id)?;
		let result = transactional_get(app, &mut entry, path).await;
		self.put_back(transaction_id, entry);
		result
	}

	/// Apply one write through a transaction. The change event buffers
	/// until commit.
	pub async fn apply_write_in(
		&self,
		app: &App,
		transaction_id: &str,
		write: &WriteOperation,
	) -> EbResult<WriteResult> {
		let mut entry = self.take(transaction_id)?;
		let result = transactional_write(app, &mut entry, write).await;
		self.put_back(transaction_id, entry);
		result
	}

	/// Commit and publish the buffered change events.
	pub async fn commit(&self, app: &App, transaction_id: &str) -> EbResult<()> {
		let mut entry = self.take(transaction_id)?;
		match entry.txn.commit().await {
			Ok(()) => {
				for event in entry.pending_events {
					app.bus.publish(
						event.event_type,
						&event.full_path,
						event.data,
						event.old_data,
					);
				}
				debug!("transaction {} committed", transaction_id);
				Ok(())
			}
			// Retryable conflicts pass through as Aborted; everything else
			// is a non-retryable precondition failure
			Err(Error::Aborted(msg)) => Err(Error::Aborted(msg)),
			Err(err) => {
				warn!("transaction {} commit failed: {}", transaction_id, err);
				Err(Error::FailedPrecondition(format!(
					"transaction could not be committed: {}",
					err
				)))
			}
		}
	}

	/// Roll back and discard buffered events.
	pub async fn rollback(&self, transaction_id: &str) -> EbResult<()> {
		let mut entry = self.take(transaction_id)?;
		entry.txn.rollback().await
	}

	/// Expire transactions idle beyond `timeout`. Dropping the handle rolls
	/// the backend session back.
	pub fn expire_idle(&self, timeout: Duration) -> usize {
		let now = Instant::now();
		let mut active = self.active.lock();
		let before = active.len();
		active.retain(|id, entry| {
			let keep = now.duration_since(entry.last_used) <= timeout;
			if !keep {
				warn!("expiring idle transaction {}", id);
			}
			keep
		});
		before - active.len()
	}

	pub fn active_count(&self) -> usize {
		self.active.lock().len()
	}

	fn take(&self, transaction_id: &str) -> EbResult<ActiveTransaction> {
		self.active.lock().remove(transaction_id).ok_or_else(|| {
			Error::FailedPrecondition(format!(
				"transaction is stale or unknown: {}",
				transaction_id
			))
		})
	}

	fn put_back(&self, transaction_id: &str, mut entry: ActiveTransaction) {
		entry.last_used = Instant::now();
		self.active.lock().insert(transaction_id.into(), entry);
	}
}

async fn transactional_get(
	app: &App,
	entry: &mut ActiveTransaction,
	path: &ResourcePath,
) -> EbResult<Option<StoredDocument>> {
	check_scope(entry, path)?;
	if !path.is_document() {
		return Err(Error::InvalidArgument(format!("not a document path: {}", path)));
	}
	let doc_id = path
		.document_id()
		.ok_or_else(|| Error::Internal("document path without id".into()))?;
	let container =
		app.catalog.resolve(path.project_id(), path.database_id(), &path.collection_path()?);
	match entry.txn.get(&container, doc_id).await? {
		Some(doc) => Ok(Some(decode_stored(&doc)?)),
		None => Ok(None),
	}
}

async fn transactional_write(
	app: &App,
	entry: &mut ActiveTransaction,
	write: &WriteOperation,
) -> EbResult<WriteResult> {
	let path = ResourcePath::parse(&write.path)?;
	check_scope(entry, &path)?;

	let incoming = match &write.data {
		Some(data) => decode_fields(data)?,
		None if write.kind == WriteKind::Delete => FieldMap::new(),
		None => {
			return Err(Error::InvalidArgument(format!(
				"data is required for {:?}",
				write.kind
			)));
		}
	};

	// Creates may target a collection path for an auto-generated id
	let path = if write.kind == WriteKind::Create && path.is_collection() {
		path.child(&random_doc_id())?
	} else {
		path
	};
	if !path.is_document() {
		return Err(Error::InvalidArgument(format!("not a document path: {}", path)));
	}
	let doc_id = path
		.document_id()
		.ok_or_else(|| Error::Internal("document path without id".into()))?;
	let container = app
		.catalog
		.resolve_for_write(path.project_id(), path.database_id(), &path.collection_path()?)
		.await?;

	let existing = match entry.txn.get(&container, doc_id).await? {
		Some(doc) => Some(decode_stored(&doc)?),
		None => None,
	};
	let now = Timestamp::now();

	match write.kind {
		WriteKind::Create => {
			if existing.is_some() {
				return Err(Error::AlreadyExists(format!("document already exists: {}", path)));
			}
			validate_document_size(&incoming)?;
			let stored = StoredDocument {
				path: path.clone(),
				fields: incoming,
				create_time: now,
				update_time: now,
			};
			entry.txn.insert(&container, stored.to_stored_bson()?).await?;
			entry.pending_events.push(PendingEvent {
				event_type: EventType::Added,
				full_path: stored.path.format(),
				data: Some(stored.to_wire()),
				old_data: None,
			});
			Ok(WriteResult { update_time: Some(now) })
		}
		WriteKind::Set => {
			let (fields, create_time, event_type, old_wire) = match existing {
				Some(current) => {
					let old_wire = current.to_wire();
					let fields = if write.merge {
						let mut merged = current.fields;
						deep_merge(&mut merged, &incoming);
						merged
					} else {
						incoming
					};
					(fields, current.create_time, EventType::Modified, Some(old_wire))
				}
				None => (incoming, now, EventType::Added, None),
			};
			validate_document_size(&fields)?;
			let stored =
				StoredDocument { path: path.clone(), fields, create_time, update_time: now };
			entry.txn.replace(&container, doc_id, stored.to_stored_bson()?, true).await?;
			entry.pending_events.push(PendingEvent {
				event_type,
				full_path: stored.path.format(),
				data: Some(stored.to_wire()),
				old_data: old_wire,
			});
			Ok(WriteResult { update_time: Some(now) })
		}
		WriteKind::Update => {
			let current = existing
				.ok_or_else(|| Error::NotFound(format!("document not found: {}", path)))?;
			let old_wire = current.to_wire();
			let fields = match &write.update_mask {
				Some(mask) => {
					let mut merged = current.fields.clone();
					apply_update_mask(&mut merged, &incoming, mask)?;
					merged
				}
				None => incoming,
			};
			validate_document_size(&fields)?;
			let stored = StoredDocument {
				path: path.clone(),
				fields,
				create_time: current.create_time,
				update_time: now,
			};
			entry.txn.replace(&container, doc_id, stored.to_stored_bson()?, false).await?;
			entry.pending_events.push(PendingEvent {
				event_type: EventType::Modified,
				full_path: stored.path.format(),
				data: Some(stored.to_wire()),
				old_data: Some(old_wire),
			});
			Ok(WriteResult { update_time: Some(now) })
		}
		WriteKind::Delete => {
			let current = existing
				.ok_or_else(|| Error::NotFound(format!("document not found: {}", path)))?;
			entry.txn.delete(&container, doc_id).await?;
			entry.pending_events.push(PendingEvent {
				event_type: EventType::Removed,
				full_path: path.format(),
				data: None,
				old_data: Some(current.to_wire()),
			});
			Ok(WriteResult { update_time: None })
		}
	}
}

fn check_scope(entry: &ActiveTransaction, path: &ResourcePath) -> EbResult<()> {
	if path.project_id() != &entry.project_id || path.database_id() != &entry.database_id {
		return Err(Error::InvalidArgument(format!(
			"path {} is outside the transaction's database {}/{}",
			path, entry.project_id, entry.database_id
		)));
	}
	Ok(())
}

// vim: ts=4
