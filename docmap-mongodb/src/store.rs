use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, FindOneOptions, FindOptions},
};
use tracing::trace;

use docmap_core::{
    backend::{FindSpec, StoreBackend, StoreBackendBuilder, UpdateResult},
    document::Record,
    error::{DocumentStoreError, DocumentStoreResult},
    query::Sort,
};

/// MongoDB storage backend.
///
/// Criteria, projections, sort keys and update documents are handed to the server
/// unchanged, so everything the MongoDB query language supports is available.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Record> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

fn find_options(spec: &FindSpec) -> FindOptions {
    let mut options = FindOptions::default();

    options.projection = spec.projection.clone();
    options.skip = spec.skip;
    options.limit = spec.limit.filter(|limit| *limit > 0).map(|limit| limit as i64);

    if !spec.sort.is_empty() {
        options.sort = Some(Sort::to_record(&spec.sort));
    }

    options
}

fn find_one_options(spec: &FindSpec) -> FindOneOptions {
    let mut options = FindOneOptions::default();

    options.projection = spec.projection.clone();
    options.skip = spec.skip;

    if !spec.sort.is_empty() {
        options.sort = Some(Sort::to_record(&spec.sort));
    }

    options
}

fn is_replacement(update: &Record) -> bool {
    update.keys().all(|key| !key.starts_with('$'))
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_documents(&self, documents: Vec<Record>, collection: &str) -> DocumentStoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        trace!(collection, count = documents.len(), "inserting records");

        self.get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn find_documents(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Vec<Record>> {
        trace!(collection, criteria = %spec.criteria, "finding records");

        let options = find_options(&spec);

        self.get_collection(collection)
            .find(spec.criteria)
            .with_options(options)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Record>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn find_one_document(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Option<Record>> {
        trace!(collection, criteria = %spec.criteria, "finding one record");

        let options = find_one_options(&spec);

        self.get_collection(collection)
            .find_one(spec.criteria)
            .with_options(options)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult> {
        trace!(collection, criteria = %criteria, multi, upsert, "updating records");

        let collection = self.get_collection(collection);

        let result = match (is_replacement(&update), multi) {
            (true, true) => {
                return Err(DocumentStoreError::Backend(
                    "Replacement updates apply to a single record".to_string(),
                ));
            }
            (true, false) => collection
                .replace_one(criteria, update)
                .upsert(upsert)
                .await,
            (false, true) => collection
                .update_many(criteria, update)
                .upsert(upsert)
                .await,
            (false, false) => collection
                .update_one(criteria, update)
                .upsert(upsert)
                .await,
        }
        .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(criteria)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        trace!(collection, criteria = %criteria, "removing records");

        Ok(
            self.get_collection(collection)
                .delete_many(criteria)
                .await
                .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
                .deleted_count
        )
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
