//! Session transaction for the MongoDB adapter.
//!
//! Wraps a driver `ClientSession` with an open multi-document transaction.
//! Reads through the session observe the transaction's own uncommitted
//! writes. An uncommitted session aborts when dropped, so abandoning the
//! handle rolls back.

use async_trait::async_trait;
use bson::{Document, doc};
use mongodb::{Client, ClientSession};
use tracing::debug;

use emberbase::error::{EbResult, Error};
use emberbase::store_adapter::{ContainerRef, KEY_ID, StoreTransaction};

use crate::error::from_mongo_error;

pub struct MongoTransaction {
	client: Client,
	session: ClientSession,
	database: Box<str>,
	finished: bool,
}

impl MongoTransaction {
	pub fn new(client: Client, session: ClientSession, database: &str) -> Self {
		Self { client, session, database: database.into(), finished: false }
	}

	fn collection(&self, container: &ContainerRef) -> mongodb::Collection<Document> {
		self.client
			.database(&container.database)
			.collection::<Document>(&container.container)
	}

	fn check_open(&self) -> EbResult<()> {
		if self.finished {
			return Err(Error::FailedPrecondition(format!(
				"transaction on {} already finished",
				self.database
			)));
		}
		Ok(())
	}
}

#[async_trait]
impl StoreTransaction for MongoTransaction {
	async fn get(&mut self, container: &ContainerRef, doc_id: &str) -> EbResult<Option<Document>> {
		self.check_open()?;
		self.collection(container)
			.find_one(doc! { KEY_ID: doc_id })
			.session(&mut self.session)
			.await
			.map_err(from_mongo_error)
	}

	async fn insert(&mut self, container: &ContainerRef, doc: Document) -> EbResult<()> {
		self.check_open()?;
		self.collection(container)
			.insert_one(doc)
			.session(&mut self.session)
			.await
			.map(|_| ())
			.map_err(from_mongo_error)
	}

	async fn replace(
		&mut self,
		container: &ContainerRef,
		doc_id: &str,
		doc: Document,
		upsert: bool,
	) -> EbResult<bool> {
		self.check_open()?;
		let result = self
			.collection(container)
			.replace_one(doc! { KEY_ID: doc_id }, doc)
			.upsert(upsert)
			.session(&mut self.session)
			.await
			.map_err(from_mongo_error)?;
		Ok(result.matched_count > 0 || result.upserted_id.is_some())
	}

	async fn delete(&mut self, container: &ContainerRef, doc_id: &str) -> EbResult<bool> {
		self.check_open()?;
		let result = self
			.collection(container)
			.delete_one(doc! { KEY_ID: doc_id })
			.session(&mut self.session)
			.await
			.map_err(from_mongo_error)?;
		Ok(result.deleted_count > 0)
	}

	async fn commit(&mut self) -> EbResult<()> {
		self.check_open()?;
		self.finished = true;
		self.session.commit_transaction().await.map_err(from_mongo_error)?;
		debug!("transaction committed on {}", self.database);
		Ok(())
	}

	async fn rollback(&mut self) -> EbResult<()> {
		if self.finished {
			return Ok(());
		}
		self.finished = true;
		self.session.abort_transaction().await.map_err(from_mongo_error)?;
		debug!("transaction aborted on {}", self.database);
		Ok(())
	}
}

// vim: ts=4
