//! The database handle.
//!
//! A [`Database`] ties a [`StoreBackend`] to an execution [`Mode`] and a
//! [`SchemaRegistry`]. It hands out [`QuerySet`]s and persists [`Document`]s.
//! Handles are cheap to clone and every clone shares the same backend.
//!
//! # Example
//!
//! ```ignore
//! use docmap::prelude::*;
//!
//! let db = Database::builder(InMemoryStore::new())
//!     .immediate()
//!     .schema(&users)
//!     .build();
//!
//! let user = Document::new(&users);
//! user.set("name", "ada")?;
//! db.insert(&user).wait()?;
//! ```

use bson::{Bson, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc};
use tracing::debug;

use crate::{
    backend::{FindSpec, StoreBackend},
    document::{Document, Record},
    error::{DocumentStoreError, DocumentStoreResult},
    lookup::{Lookup, Mode},
    queryset::QuerySet,
    reference::ReferenceCache,
    schema::{ID_FIELD, Schema, SchemaRegistry},
};

/// Serializable database settings, for setups driven by configuration files or
/// the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// How store operations are executed.
    pub mode: Mode,
    /// Share one reference cache across every query of the handle.
    pub reference_cache: bool,
}

struct DatabaseInner {
    backend: Arc<dyn StoreBackend>,
    mode: Mode,
    registry: SchemaRegistry,
}

/// A handle to one document store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    cache: Option<ReferenceCache>,
}

impl Database {
    /// Creates a deferred-mode database with an empty registry.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::builder(backend).build()
    }

    /// Starts configuring a database on top of `backend`.
    pub fn builder(backend: impl StoreBackend + 'static) -> DatabaseBuilder {
        DatabaseBuilder::new(Arc::new(backend))
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.backend
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    /// Registers a schema so that references can name it.
    pub fn register(&self, schema: &Arc<Schema>) {
        self.inner.registry.register(schema);
    }

    /// Looks up a registered schema by type name.
    pub fn schema(&self, name: &str) -> DocumentStoreResult<Arc<Schema>> {
        self.inner.registry.resolve(name)
    }

    /// The reference cache shared by every query of this handle, if any.
    pub fn reference_cache(&self) -> Option<ReferenceCache> {
        self.cache.clone()
    }

    /// Returns a handle on the same store whose queries share `cache`.
    ///
    /// The cache then lives as long as any document loaded through the handle, or
    /// until it is cleared.
    pub fn with_reference_cache(&self, cache: ReferenceCache) -> Database {
        Database {
            inner: self.inner.clone(),
            cache: Some(cache),
        }
    }

    /// Returns a query set over every document of `schema`.
    pub fn queryset(&self, schema: &Arc<Schema>) -> QuerySet {
        QuerySet::new(self.clone(), schema.clone())
    }

    pub(crate) fn run<T, F>(&self, future: F) -> Lookup<T>
    where
        T: Send + 'static,
        F: Future<Output = DocumentStoreResult<T>> + Send + 'static,
    {
        self.inner.mode.run(future)
    }

    /// Stores a new document.
    ///
    /// A document without an identifier is given a fresh object id. The document
    /// is bound to this database and its pending changes are cleared once the
    /// store has accepted it.
    pub fn insert(&self, document: &Document) -> Lookup<()> {
        let (collection, record) = match self.prepare_insert(document) {
            Ok(prepared) => prepared,
            Err(err) => return Lookup::failed(err),
        };
        let backend = self.inner.backend.clone();
        let document = document.clone();

        debug!(collection = %collection, id = ?document.id(), "inserting document");

        self.run(async move {
            backend
                .insert_documents(vec![record.clone()], &collection)
                .await?;
            document.mark_persisted(&record);

            Ok(())
        })
    }

    fn prepare_insert(&self, document: &Document) -> DocumentStoreResult<(String, Record)> {
        let collection = document.schema().require_collection()?.to_string();

        if document.id().is_none() {
            document.set(ID_FIELD, ObjectId::new())?;
        }

        document.bind(self);

        Ok((collection, document.to_record()?))
    }

    /// Persists the pending changes of a document.
    ///
    /// Changed attributes are written with `$set`, deleted ones with `$unset`.
    /// A document whose identifier is unset or not yet persisted is inserted
    /// instead.
    pub fn save(&self, document: &Document) -> Lookup<()> {
        let id = match document.id() {
            Some(id) if !document.changed_fields().iter().any(|name| name == ID_FIELD) => id,
            _ => return self.insert(document),
        };

        let (collection, set, update) = match Self::prepare_save(document) {
            Ok(prepared) => prepared,
            Err(err) => return Lookup::failed(err),
        };
        document.bind(self);

        if update.is_empty() {
            return Lookup::Ready(Ok(()));
        }

        let backend = self.inner.backend.clone();
        let document = document.clone();

        debug!(collection = %collection, id = %id, "saving document");

        self.run(async move {
            backend
                .update_documents(doc! { ID_FIELD: id }, update, false, true, &collection)
                .await?;
            document.mark_persisted(&set);

            Ok(())
        })
    }

    fn prepare_save(document: &Document) -> DocumentStoreResult<(String, Record, Record)> {
        let collection = document.schema().require_collection()?.to_string();
        let mut set = Record::new();
        let mut unset = Record::new();

        for name in document.changed_fields() {
            if name == ID_FIELD {
                continue;
            }

            match document.schema().accessor(&name)?.dump(document)? {
                Some(value) => {
                    set.insert(name, value);
                }
                None => {
                    unset.insert(name, Bson::String(String::new()));
                }
            }
        }

        let mut update = Record::new();
        if !set.is_empty() {
            update.insert("$set", set.clone());
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        Ok((collection, set, update))
    }

    /// Removes a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Usage`] for a document without an identifier.
    pub fn remove(&self, document: &Document) -> Lookup<()> {
        let (collection, id) = match Self::stored_identity(document) {
            Ok(identity) => identity,
            Err(err) => return Lookup::failed(err),
        };
        let backend = self.inner.backend.clone();

        debug!(collection = %collection, id = %id, "removing document");

        self.run(async move {
            backend
                .remove_documents(doc! { ID_FIELD: id }, &collection)
                .await?;

            Ok(())
        })
    }

    /// Replaces the state of a document with what is currently stored, dropping
    /// pending changes.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if the document is no
    /// longer stored.
    pub fn reload(&self, document: &Document) -> Lookup<()> {
        let (collection, id) = match Self::stored_identity(document) {
            Ok(identity) => identity,
            Err(err) => return Lookup::failed(err),
        };
        let backend = self.inner.backend.clone();
        let document = document.clone();
        document.bind(self);

        debug!(collection = %collection, id = %id, "reloading document");

        self.run(async move {
            let criteria = doc! { ID_FIELD: id };
            let record = backend
                .find_one_document(FindSpec::new(criteria.clone()), &collection)
                .await?
                .ok_or_else(|| DocumentStoreError::DocumentNotFound(criteria.to_string(), collection))?;
            document.reset(record);

            Ok(())
        })
    }

    fn stored_identity(document: &Document) -> DocumentStoreResult<(String, Bson)> {
        let collection = document.schema().require_collection()?.to_string();
        let id = document.id().ok_or_else(|| {
            DocumentStoreError::Usage(format!(
                "{} document has no identifier and was never stored",
                document.schema().name()
            ))
        })?;

        Ok((collection, id))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.inner.backend)
            .field("mode", &self.inner.mode)
            .field("registry", &self.inner.registry)
            .field("reference_cache", &self.cache)
            .finish()
    }
}

/// Builder for [`Database`].
pub struct DatabaseBuilder {
    backend: Arc<dyn StoreBackend>,
    mode: Mode,
    registry: SchemaRegistry,
    cache: Option<ReferenceCache>,
}

impl DatabaseBuilder {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            mode: Mode::default(),
            registry: SchemaRegistry::new(),
            cache: None,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Blocks on every store operation.
    pub fn immediate(self) -> Self {
        self.mode(Mode::Immediate)
    }

    /// Returns pending lookups that must be awaited.
    pub fn deferred(self) -> Self {
        self.mode(Mode::Deferred)
    }

    /// Uses an existing registry, shared with other handles.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers a schema.
    pub fn schema(self, schema: &Arc<Schema>) -> Self {
        self.registry.register(schema);
        self
    }

    pub fn reference_cache(mut self, cache: ReferenceCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Applies serialized options on top of the current settings.
    pub fn options(mut self, options: &DatabaseOptions) -> Self {
        self.mode = options.mode;
        if options.reference_cache && self.cache.is_none() {
            self.cache = Some(ReferenceCache::new());
        }
        self
    }

    pub fn build(self) -> Database {
        Database {
            inner: Arc::new(DatabaseInner {
                backend: self.backend,
                mode: self.mode,
                registry: self.registry,
            }),
            cache: self.cache,
        }
    }
}
