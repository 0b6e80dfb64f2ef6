//! MongoDB implementation of the Emberbase store adapter.
//!
//! Each tenant's physical database maps to a MongoDB database, each logical
//! collection to a MongoDB collection. The engine plans all filters and
//! pipelines itself; this adapter only executes them and contributes atomic
//! single-document operations plus session transactions.

mod error;
mod transaction;

use async_trait::async_trait;
use bson::{Document, doc};
use futures::stream::TryStreamExt;
use mongodb::Client;
use tracing::debug;

use emberbase::error::EbResult;
use emberbase::store_adapter::{
	ContainerRef, FindOptions, KEY_ID, StoreAdapter, StoreTransaction,
};

pub use error::from_mongo_error;
pub use transaction::MongoTransaction;

#[derive(Clone, Debug)]
pub struct StoreAdapterMongo {
	client: Client,
}

impl StoreAdapterMongo {
	/// Connect to the backend (`MONGODB_URI`-style DSN).
	pub async fn new(uri: &str) -> EbResult<Self> {
		let client = Client::with_uri_str(uri).await.map_err(from_mongo_error)?;
		debug!("connected mongodb store adapter");
		Ok(Self { client })
	}

	pub fn from_client(client: Client) -> Self {
		Self { client }
	}

	fn collection(&self, container: &ContainerRef) -> mongodb::Collection<Document> {
		self.client
			.database(&container.database)
			.collection::<Document>(&container.container)
	}
}

#[async_trait]
impl StoreAdapter for StoreAdapterMongo {
	async fn get(&self, container: &ContainerRef, doc_id: &str) -> EbResult<Option<Document>> {
		self.collection(container)
			.find_one(doc! { KEY_ID: doc_id })
			.await
			.map_err(from_mongo_error)
	}

	async fn insert(&self, container: &ContainerRef, doc: Document) -> EbResult<()> {
		self.collection(container)
			.insert_one(doc)
			.await
			.map(|_| ())
			.map_err(from_mongo_error)
	}

	async fn replace(
		&self,
		container: &ContainerRef,
		doc_id: &str,
		doc: Document,
		upsert: bool,
	) -> EbResult<bool> {
		let result = self
			.collection(container)
			.replace_one(doc! { KEY_ID: doc_id }, doc)
			.upsert(upsert)
			.await
			.map_err(from_mongo_error)?;
		Ok(result.matched_count > 0 || result.upserted_id.is_some())
	}

	async fn update_fields(
		&self,
		container: &ContainerRef,
		doc_id: &str,
		set: Document,
		unset: &[String],
	) -> EbResult<bool> {
		let mut update = Document::new();
		if !set.is_empty() {
			update.insert("$set", set);
		}
		if !unset.is_empty() {
			let mut unset_doc = Document::new();
			for path in unset {
				unset_doc.insert(path.clone(), "");
			}
			update.insert("$unset", unset_doc);
		}
		if update.is_empty() {
			return Ok(true);
		}

		let result = self
			.collection(container)
			.update_one(doc! { KEY_ID: doc_id }, update)
			.await
			.map_err(from_mongo_error)?;
		Ok(result.matched_count > 0)
	}

	async fn delete(&self, container: &ContainerRef, doc_id: &str) -> EbResult<bool> {
		let result = self
			.collection(container)
			.delete_one(doc! { KEY_ID: doc_id })
			.await
			.map_err(from_mongo_error)?;
		Ok(result.deleted_count > 0)
	}

	async fn find(
		&self,
		container: &ContainerRef,
		filter: Document,
		opts: FindOptions,
	) -> EbResult<Vec<Document>> {
		let collection = self.collection(container);
		let mut find = collection.find(filter);
		if let Some(sort) = opts.sort {
			find = find.sort(sort);
		}
		if let Some(skip) = opts.skip {
			find = find.skip(skip);
		}
		if let Some(limit) = opts.limit {
			find = find.limit(limit);
		}
		let cursor = find.await.map_err(from_mongo_error)?;
		cursor.try_collect().await.map_err(from_mongo_error)
	}

	async fn aggregate(
		&self,
		container: &ContainerRef,
		pipeline: Vec<Document>,
	) -> EbResult<Vec<Document>> {
		let cursor = self
			.collection(container)
			.aggregate(pipeline)
			.await
			.map_err(from_mongo_error)?;
		cursor.try_collect().await.map_err(from_mongo_error)
	}

	async fn transaction(&self, database: &str) -> EbResult<Box<dyn StoreTransaction>> {
		let mut session = self.client.start_session().await.map_err(from_mongo_error)?;
		session.start_transaction().await.map_err(from_mongo_error)?;
		Ok(Box::new(MongoTransaction::new(self.client.clone(), session, database)))
	}
}

// vim: ts=4
