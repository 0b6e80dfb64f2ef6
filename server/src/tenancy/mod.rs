//! Tenancy: physical layout, collection catalog, auto-materialization.
//!
//! Projects own databases, databases own collections. Collection references
//! resolve through a pure naming strategy and are cached by the
//! (project, database, collectionPath) triple. On first write the missing
//! parents are auto-created with default attributes (hosted-service
//! behavior); strict mode turns that into a `NotFound` instead.

pub mod handler;
pub mod naming;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::prelude::*;
use crate::store_adapter::{ContainerRef, FindOptions, StoreAdapter};

pub use naming::{NamingStrategy, physical_database};

/// Backend database holding project/database metadata records.
pub const META_DATABASE: &str = "emberbase_meta";
const META_PROJECTS: &str = "projects";
const META_DATABASES: &str = "databases";
/// Per-tenant-database registry of logical collections.
const CATALOG_CONTAINER: &str = "_collections";

const REF_CACHE_SIZE: usize = 1024;
const MAX_INDEX_FIELDS: usize = 100;

const DEFAULT_LOCATION: &str = "us-central1";

/// Lifecycle state shared by projects and databases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
	Active,
	Deleted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
	#[serde(rename = "_id")]
	pub project_id: ProjectId,
	pub organization_id: Option<Box<str>>,
	pub display_name: Box<str>,
	pub location_id: Box<str>,
	pub state: ResourceState,
	pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseType {
	Native,
	LegacyMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyMode {
	Optimistic,
	Pessimistic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
	/// `{project}/{database}` composite key.
	#[serde(rename = "_id")]
	pub key: Box<str>,
	pub project_id: ProjectId,
	pub database_id: DatabaseId,
	#[serde(rename = "type")]
	pub database_type: DatabaseType,
	pub concurrency_mode: ConcurrencyMode,
	pub location_id: Box<str>,
	pub state: ResourceState,
	pub created_at: Timestamp,
}

/// Sort order of one indexed field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexOrder {
	Ascending,
	Descending,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexField {
	pub field_path: Box<str>,
	pub order: IndexOrder,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
	pub name: Box<str>,
	pub fields: Vec<IndexField>,
	pub state: ResourceState,
}

/// Catalog record of one logical collection inside a tenant database.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMeta {
	/// Logical collection path (slash-joined).
	#[serde(rename = "_id")]
	pub path: Box<str>,
	/// Trailing path segment; the collection-group key.
	pub collection_id: Box<str>,
	/// Derived physical container name.
	pub container: Box<str>,
	pub created_at: Timestamp,
	#[serde(default)]
	pub indexes: Vec<IndexDef>,
}

type RefCacheKey = (Box<str>, Box<str>, Box<str>);

/// Collection manager: resolves logical paths to physical containers,
/// maintains the per-database catalog, and materializes missing parents.
pub struct Catalog {
	adapter: Arc<dyn StoreAdapter>,
	strategy: NamingStrategy,
	strict: bool,
	refs: Mutex<LruCache<RefCacheKey, ContainerRef>>,
}

impl Catalog {
	pub fn new(adapter: Arc<dyn StoreAdapter>, strategy: NamingStrategy, strict: bool) -> Self {
		let cap = NonZeroUsize::new(REF_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
		Self { adapter, strategy, strict, refs: Mutex::new(LruCache::new(cap)) }
	}

	/// Resolve a collection reference for reading. Pure derivation, no
	/// materialization.
	pub fn resolve(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_path: &str,
	) -> ContainerRef {
		let key: RefCacheKey = (
			project_id.as_str().into(),
			database_id.as_str().into(),
			collection_path.into(),
		);
		{
			let mut cache = self.refs.lock();
			if let Some(found) = cache.get(&key) {
				return found.clone();
			}
		}

		let database = physical_database(None, project_id, database_id);
		let container = self.strategy.container_name(project_id, database_id, collection_path);
		let resolved = ContainerRef::new(database, container);

		self.refs.lock().put(key, resolved.clone());
		resolved
	}

	/// Resolve a collection reference for writing: ensures the project,
	/// database, and catalog entry exist first. In strict mode a missing
	/// parent is an error instead.
	pub async fn resolve_for_write(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_path: &str,
	) -> EbResult<ContainerRef> {
		if self.strict {
			if self.get_project(project_id).await?.is_none() {
				return Err(Error::NotFound(format!("project not found: {}", project_id)));
			}
			if self.get_database(project_id, database_id).await?.is_none() {
				return Err(Error::NotFound(format!(
					"database not found: {}/{}",
					project_id, database_id
				)));
			}
		} else {
			self.ensure_project(project_id, None).await?;
			self.ensure_database(project_id, database_id).await?;
		}

		let resolved = self.resolve(project_id, database_id, collection_path);
		self.register_collection(collection_path, &resolved).await?;
		Ok(resolved)
	}

	pub async fn get_project(&self, project_id: &ProjectId) -> EbResult<Option<ProjectInfo>> {
		let container = ContainerRef::new(META_DATABASE, META_PROJECTS);
		match self.adapter.get(&container, project_id.as_str()).await? {
			Some(doc) => Ok(Some(bson::from_document(doc)?)),
			None => Ok(None),
		}
	}

	/// Create the project record if absent, with default attributes.
	pub async fn ensure_project(
		&self,
		project_id: &ProjectId,
		organization_id: Option<&str>,
	) -> EbResult<ProjectInfo> {
		if let Some(existing) = self.get_project(project_id).await? {
			return Ok(existing);
		}

		let info = ProjectInfo {
			project_id: project_id.clone(),
			organization_id: organization_id.map(Into::into),
			display_name: project_id.as_str().into(),
			location_id: DEFAULT_LOCATION.into(),
			state: ResourceState::Active,
			created_at: Timestamp::now(),
		};
		let container = ContainerRef::new(META_DATABASE, META_PROJECTS);
		match self.adapter.insert(&container, bson::to_document(&info)?).await {
			Ok(()) => {
				info!("auto-created project {}", project_id);
				Ok(info)
			}
			// Lost a concurrent create race; the record exists now
			Err(Error::AlreadyExists(_)) => self
				.get_project(project_id)
				.await?
				.ok_or_else(|| Error::Internal("project vanished after create race".into())),
			Err(err) => Err(err),
		}
	}

	pub async fn get_database(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
	) -> EbResult<Option<DatabaseInfo>> {
		let container = ContainerRef::new(META_DATABASE, META_DATABASES);
		let key = format!("{}/{}", project_id, database_id);
		match self.adapter.get(&container, &key).await? {
			Some(doc) => Ok(Some(bson::from_document(doc)?)),
			None => Ok(None),
		}
	}

	/// Create the database record if absent: Native type, Optimistic
	/// concurrency, default location.
	pub async fn ensure_database(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
	) -> EbResult<DatabaseInfo> {
		if let Some(existing) = self.get_database(project_id, database_id).await? {
			return Ok(existing);
		}

		let info = DatabaseInfo {
			key: format!("{}/{}", project_id, database_id).into(),
			project_id: project_id.clone(),
			database_id: database_id.clone(),
			database_type: DatabaseType::Native,
			concurrency_mode: ConcurrencyMode::Optimistic,
			location_id: DEFAULT_LOCATION.into(),
			state: ResourceState::Active,
			created_at: Timestamp::now(),
		};
		let container = ContainerRef::new(META_DATABASE, META_DATABASES);
		match self.adapter.insert(&container, bson::to_document(&info)?).await {
			Ok(()) => {
				info!("auto-created database {}/{}", project_id, database_id);
				Ok(info)
			}
			Err(Error::AlreadyExists(_)) => self
				.get_database(project_id, database_id)
				.await?
				.ok_or_else(|| Error::Internal("database vanished after create race".into())),
			Err(err) => Err(err),
		}
	}

	/// Register a logical collection in the tenant database's catalog.
	async fn register_collection(
		&self,
		collection_path: &str,
		resolved: &ContainerRef,
	) -> EbResult<()> {
		let catalog = ContainerRef::new(resolved.database.clone(), CATALOG_CONTAINER);
		if self.adapter.get(&catalog, collection_path).await?.is_some() {
			return Ok(());
		}

		let collection_id =
			collection_path.rsplit('/').next().unwrap_or(collection_path).to_string();
		let meta = CollectionMeta {
			path: collection_path.into(),
			collection_id: collection_id.into(),
			container: resolved.container.clone(),
			created_at: Timestamp::now(),
			indexes: Vec::new(),
		};
		match self.adapter.insert(&catalog, bson::to_document(&meta)?).await {
			Ok(()) | Err(Error::AlreadyExists(_)) => Ok(()),
			Err(err) => Err(err),
		}
	}

	pub async fn get_collection_meta(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_path: &str,
	) -> EbResult<Option<CollectionMeta>> {
		let database = physical_database(None, project_id, database_id);
		let catalog = ContainerRef::new(database, CATALOG_CONTAINER);
		match self.adapter.get(&catalog, collection_path).await? {
			Some(doc) => Ok(Some(bson::from_document(doc)?)),
			None => Ok(None),
		}
	}

	/// Collections whose trailing segment matches `collection_id`, optionally
	/// restricted to descendants of `parent` (relative path). Scope of a
	/// collection-group query.
	pub async fn collections_with_id(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_id: &str,
		parent: Option<&str>,
	) -> EbResult<Vec<CollectionMeta>> {
		let database = physical_database(None, project_id, database_id);
		let catalog = ContainerRef::new(database, CATALOG_CONTAINER);
		let filter = bson::doc! { "collectionId": collection_id };
		let docs = self.adapter.find(&catalog, filter, FindOptions::default()).await?;

		let mut results = Vec::new();
		for doc in docs {
			let meta: CollectionMeta = bson::from_document(doc)?;
			if let Some(prefix) = parent {
				let under_parent = meta
					.path
					.strip_prefix(prefix)
					.is_some_and(|rest| rest.starts_with('/'));
				if !under_parent {
					continue;
				}
			}
			results.push(meta);
		}
		Ok(results)
	}

	/// Registered direct subcollections of documents in `collection_path`,
	/// as (document id, subcollection path) pairs. Used by `showMissing`.
	pub async fn subcollection_parents(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_path: &str,
	) -> EbResult<Vec<Box<str>>> {
		let database = physical_database(None, project_id, database_id);
		let catalog = ContainerRef::new(database, CATALOG_CONTAINER);
		let docs = self.adapter.find(&catalog, bson::Document::new(), FindOptions::default()).await?;

		let prefix = format!("{}/", collection_path);
		let mut parents = Vec::new();
		for doc in docs {
			let meta: CollectionMeta = bson::from_document(doc)?;
			if let Some(rest) = meta.path.strip_prefix(&prefix) {
				if let Some(doc_id) = rest.split('/').next() {
					if !doc_id.is_empty() && !parents.iter().any(|p: &Box<str>| &**p == doc_id) {
						parents.push(doc_id.into());
					}
				}
			}
		}
		Ok(parents)
	}

	/// Metadata-only collection update: replaces index descriptors. The
	/// collection itself is a virtual namespace; documents are untouched.
	pub async fn update_collection_meta(
		&self,
		project_id: &ProjectId,
		database_id: &DatabaseId,
		collection_path: &str,
		indexes: Vec<IndexDef>,
	) -> EbResult<CollectionMeta> {
		validate_indexes(&indexes)?;

		let mut meta = self
			.get_collection_meta(project_id, database_id, collection_path)
			.await?
			.ok_or_else(|| {
				Error::NotFound(format!("collection not found: {}", collection_path))
			})?;
		meta.indexes = indexes;

		let database = physical_database(None, project_id, database_id);
		let catalog = ContainerRef::new(database, CATALOG_CONTAINER);
		self.adapter
			.replace(&catalog, collection_path, bson::to_document(&meta)?, false)
			.await?;
		Ok(meta)
	}
}

fn validate_indexes(indexes: &[IndexDef]) -> EbResult<()> {
	for index in indexes {
		if index.fields.is_empty() || index.fields.len() > MAX_INDEX_FIELDS {
			return Err(Error::InvalidArgument(format!(
				"index {} must have between 1 and {} fields",
				index.name, MAX_INDEX_FIELDS
			)));
		}
	}
	for (i, index) in indexes.iter().enumerate() {
		if indexes[..i].iter().any(|other| other.name == index.name) {
			return Err(Error::InvalidArgument(format!("duplicate index name: {}", index.name)));
		}
	}
	Ok(())
}


// vim: ts=4
