//! Storage backend abstraction.
//!
//! This module defines the collection-level interface a document store must offer
//! for query sets and the database handle to work on top of it: find with
//! projection, sort, skip and limit; count; update with operator documents;
//! insert; and remove.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for all storage operations.
//! Implementations are required to be thread-safe (`Send + Sync`) and support concurrent access.
//! Criteria, projections, sort specifications and update documents use the MongoDB
//! query dialect; backends that are not MongoDB evaluate the subset they support and
//! reject the rest with [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend).
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmap::backend::{FindSpec, StoreBackend};
//! use bson::doc;
//!
//! let backend = InMemoryStore::new();
//! backend.insert_documents(vec![doc! { "_id": 1, "name": "Alice" }], "users").await?;
//!
//! let spec = FindSpec::new(doc! { "name": "Alice" }).limit(1);
//! let found = backend.find_documents(spec, "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Bson;
use std::{fmt::Debug, sync::Arc};

use crate::{document::Record, error::DocumentStoreResult, query::Sort};

/// The parameters of a find operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    /// Criteria records must match. Empty matches everything.
    pub criteria: Record,
    /// Fields to return. `None` returns whole records.
    pub projection: Option<Record>,
    /// Sort keys in priority order.
    pub sort: Vec<Sort>,
    /// Number of matching records to skip.
    pub skip: Option<u64>,
    /// Maximum number of records to return.
    pub limit: Option<u64>,
}

impl FindSpec {
    pub fn new(criteria: Record) -> Self {
        FindSpec { criteria, ..Default::default() }
    }

    pub fn projection(mut self, projection: Option<Record>) -> Self {
        self.projection = projection;
        self
    }

    pub fn sort(mut self, sort: Vec<Sort>) -> Self {
        self.sort = sort;
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// The outcome of an update operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Number of records matching the criteria.
    pub matched: u64,
    /// Number of records actually changed.
    pub modified: u64,
    /// Identifier of the record created by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific but should be
/// documented by the implementer.
///
/// # Async Runtime
///
/// Databases in immediate mode drive these futures with a plain executor on the
/// calling thread. Backends that need a particular runtime to make progress must only
/// be used in deferred mode from within that runtime.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new records into a collection.
    ///
    /// Every record must carry an `_id`. Inserting an identifier that already exists
    /// is an error.
    async fn insert_documents(
        &self,
        documents: Vec<Record>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Returns the records matching `spec`, projected, sorted, skipped and limited.
    ///
    /// Without sort keys the order is backend-defined.
    async fn find_documents(
        &self,
        spec: FindSpec,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Record>>;

    /// Returns the first record matching `spec`, if any.
    async fn find_one_document(
        &self,
        spec: FindSpec,
        collection: &str,
    ) -> DocumentStoreResult<Option<Record>> {
        Ok(self
            .find_documents(spec.limit(1), collection)
            .await?
            .into_iter()
            .next())
    }

    /// Applies `update` to the records matching `criteria`.
    ///
    /// `update` is either an operator document (`$set`, `$unset`, `$inc`) or a
    /// replacement record. Only the first match is updated unless `multi` is set.
    /// With `upsert` a record is created from the criteria when nothing matches.
    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Counts the records matching `criteria`.
    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64>;

    /// Removes the records matching `criteria` and returns how many were removed.
    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with persistent storage or
    /// external connections should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend + ?Sized,
{
    async fn insert_documents(
        &self,
        documents: Vec<Record>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (**self)
            .insert_documents(documents, collection)
            .await
    }

    async fn find_documents(
        &self,
        spec: FindSpec,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Record>> {
        (**self)
            .find_documents(spec, collection)
            .await
    }

    async fn find_one_document(
        &self,
        spec: FindSpec,
        collection: &str,
    ) -> DocumentStoreResult<Option<Record>> {
        (**self)
            .find_one_document(spec, collection)
            .await
    }

    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult> {
        (**self)
            .update_documents(criteria, update, multi, upsert, collection)
            .await
    }

    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        (**self)
            .count_documents(criteria, collection)
            .await
    }

    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        (**self)
            .remove_documents(criteria, collection)
            .await
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    async fn insert_documents(
        &self,
        documents: Vec<Record>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (**self)
            .insert_documents(documents, collection)
            .await
    }

    async fn find_documents(
        &self,
        spec: FindSpec,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Record>> {
        (**self)
            .find_documents(spec, collection)
            .await
    }

    async fn find_one_document(
        &self,
        spec: FindSpec,
        collection: &str,
    ) -> DocumentStoreResult<Option<Record>> {
        (**self)
            .find_one_document(spec, collection)
            .await
    }

    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult> {
        (**self)
            .update_documents(criteria, update, multi, upsert, collection)
            .await
    }

    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        (**self)
            .count_documents(criteria, collection)
            .await
    }

    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        (**self)
            .remove_documents(criteria, collection)
            .await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
