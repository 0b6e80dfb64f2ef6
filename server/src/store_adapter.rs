//! Document Store Adapter
//!
//! Trait and types for pluggable backend document stores that hold the
//! engine's typed documents in per-tenant physical databases and
//! per-collection physical containers.
//!
//! The engine does all query planning itself and hands the adapter finished
//! BSON filter documents and aggregation pipelines; the adapter contributes
//! atomic single-document operations, pipeline execution, and session
//! transactions. Driver internals never leak above this trait.
//!
//! Read operations work directly on the adapter. Multi-operation writes
//! that need atomicity go through a transaction handle.

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::prelude::*;

/// Stored document key holding the document id.
pub const KEY_ID: &str = "_id";
/// Stored document key holding the canonical resource path.
pub const KEY_PATH: &str = "path";
/// Stored document key holding the typed field map.
pub const KEY_FIELDS: &str = "fields";
/// Stored document key holding the creation time.
pub const KEY_CREATE_TIME: &str = "createTime";
/// Stored document key holding the last update time.
pub const KEY_UPDATE_TIME: &str = "updateTime";

/// Physical location of one logical collection: a backend database plus a
/// container (backend collection) inside it.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ContainerRef {
	pub database: Box<str>,
	pub container: Box<str>,
}

impl ContainerRef {
	pub fn new(database: impl Into<Box<str>>, container: impl Into<Box<str>>) -> Self {
		Self { database: database.into(), container: container.into() }
	}
}

impl std::fmt::Display for ContainerRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}", self.database, self.container)
	}
}

/// Options for a filtered find.
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
	/// Backend sort document (field -> 1/-1), already planned by the engine.
	pub sort: Option<Document>,
	pub skip: Option<u64>,
	pub limit: Option<i64>,
}

/// Document Store Adapter trait.
///
/// Unified interface over the backend. All methods are safe under
/// concurrent invocation; per-document writes are linearizable as delivered.
#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	/// Get one document by id. Returns None if absent.
	async fn get(&self, container: &ContainerRef, doc_id: &str) -> EbResult<Option<Document>>;

	/// Insert a new document. Fails with `AlreadyExists` when the id is
	/// already present.
	async fn insert(&self, container: &ContainerRef, doc: Document) -> EbResult<()>;

	/// Replace a document wholesale. With `upsert`, a missing document is
	/// created. Returns whether a document was matched.
	async fn replace(
		&self,
		container: &ContainerRef,
		doc_id: &str,
		doc: Document,
		upsert: bool,
	) -> EbResult<bool>;

	/// Partial update: `$set` the given dotted storage paths and `$unset`
	/// the removed ones. Returns whether a document was matched.
	async fn update_fields(
		&self,
		container: &ContainerRef,
		doc_id: &str,
		set: Document,
		unset: &[String],
	) -> EbResult<bool>;

	/// Delete a document by id. Returns whether a document was deleted.
	async fn delete(&self, container: &ContainerRef, doc_id: &str) -> EbResult<bool>;

	/// Run a planned filter with optional sort/skip/limit.
	async fn find(
		&self,
		container: &ContainerRef,
		filter: Document,
		opts: FindOptions,
	) -> EbResult<Vec<Document>>;

	/// Execute a planned aggregation pipeline.
	async fn aggregate(
		&self,
		container: &ContainerRef,
		pipeline: Vec<Document>,
	) -> EbResult<Vec<Document>>;

	/// Begin a session transaction scoped to one physical database.
	async fn transaction(&self, database: &str) -> EbResult<Box<dyn StoreTransaction>>;
}

/// Transaction handle for atomic multi-operation writes.
///
/// Reads observe the transaction's own uncommitted writes. Dropping an
/// uncommitted transaction rolls it back. Commit failures are classified:
/// transient backend conflicts surface as `Aborted` (retryable), everything
/// else as non-retryable errors.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
	/// Read a document from the transaction's view.
	async fn get(&mut self, container: &ContainerRef, doc_id: &str) -> EbResult<Option<Document>>;

	/// Insert a new document within the transaction.
	async fn insert(&mut self, container: &ContainerRef, doc: Document) -> EbResult<()>;

	/// Replace (or with `upsert` create) a document within the transaction.
	async fn replace(
		&mut self,
		container: &ContainerRef,
		doc_id: &str,
		doc: Document,
		upsert: bool,
	) -> EbResult<bool>;

	/// Delete a document within the transaction.
	async fn delete(&mut self, container: &ContainerRef, doc_id: &str) -> EbResult<bool>;

	/// Commit, applying all changes atomically.
	async fn commit(&mut self) -> EbResult<()>;

	/// Roll back, discarding all changes.
	async fn rollback(&mut self) -> EbResult<()>;
}

// vim: ts=4
