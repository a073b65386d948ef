//! Cross-document references.
//!
//! A [`ReferenceField`] stores the bare identifier of a document in another
//! collection and resolves it on read. Assigning an identifier never touches
//! the store, so a document needs a database binding only to read references. Resolution goes through the
//! [`QuerySet`](crate::queryset::QuerySet) of the referenced schema, so it
//! follows the [`Mode`](crate::lookup::Mode) of the database the owning document
//! is bound to:
//!
//! - immediate: the read returns the referenced [`Document`] directly
//! - deferred: the read returns a [`ReferenceHandle`] that must be awaited
//!
//! Resolved references are memoized in a [`ReferenceCache`] shared by every
//! document loaded through the same query, so a page of documents pointing at
//! the same author issues a single lookup.
//!
//! # Example
//!
//! ```ignore
//! let book = db.queryset(&books).with_id(id).await?.unwrap();
//!
//! // deferred
//! let author = book.get("author")?.as_reference().unwrap().get().await?;
//! ```

use bson::{Bson, oid::ObjectId};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use rand::RngCore;
use std::{collections::HashMap, fmt, future::IntoFuture, sync::Arc};
use tracing::trace;

use crate::{
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldContext, MAX_FAKE_DEPTH},
    lookup::Lookup,
    marker::Marker,
    schema::{ID_FIELD, Schema},
    value::Value,
};

/// The schema a reference points at.
#[derive(Debug, Clone)]
pub enum ReferenceTarget {
    Schema(Arc<Schema>),
    /// Resolved through the registry of the owning document's database.
    Named(String),
}

/// A field storing the identifier of a document in another collection.
#[derive(Debug, Clone)]
pub struct ReferenceField {
    target: ReferenceTarget,
    smart_null: bool,
}

impl ReferenceField {
    /// References documents of `schema`.
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            target: ReferenceTarget::Schema(schema.clone()),
            smart_null: false,
        }
    }

    /// References documents of the schema registered under `name`.
    ///
    /// Use this for self references and for schemas declared later.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            target: ReferenceTarget::Named(name.into()),
            smart_null: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.smart_null = true;
        self
    }

    pub fn target(&self) -> &ReferenceTarget {
        &self.target
    }

    fn target_name(&self) -> &str {
        match &self.target {
            ReferenceTarget::Schema(schema) => schema.name(),
            ReferenceTarget::Named(name) => name,
        }
    }

    fn target_schema(&self, ctx: &FieldContext<'_>) -> DocumentStoreResult<Arc<Schema>> {
        match &self.target {
            ReferenceTarget::Schema(schema) => Ok(schema.clone()),
            ReferenceTarget::Named(name) => match ctx.document().database() {
                Some(database) => database.registry().resolve(name),
                None => Err(not_bound(ctx)),
            },
        }
    }

    /// Resolves an identifier into the referenced document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotBound`] if the owning document is not
    /// bound to a database, and [`DocumentStoreError::BrokenReference`] if an
    /// immediate lookup finds nothing. Deferred lookups report a broken
    /// reference when the handle is awaited.
    pub fn resolve(&self, ctx: &FieldContext<'_>, id: Bson) -> DocumentStoreResult<Value> {
        let owner = ctx.document();
        let database = owner.database().ok_or_else(|| not_bound(ctx))?;
        let schema = self.target_schema(ctx)?;
        let cache = owner
            .reference_cache()
            .or_else(|| database.reference_cache());

        if let Some(cache) = &cache {
            if let Some(hit) = cache.get(schema.name(), &id) {
                trace!(schema = schema.name(), id = %id, "reference cache hit");
                return Ok(hit);
            }
        }

        // the resolved document gets a cache of its own, so the cache never holds
        // a document that holds the cache
        let queryset = database.queryset(&schema);
        let collection = schema.require_collection()?.to_string();
        let missing = id.clone();
        let lookup = queryset.find_one_or_else(
            bson::doc! { ID_FIELD: id.clone() },
            None,
            move || DocumentStoreError::BrokenReference {
                collection,
                id: missing.to_string(),
            },
        );

        let value = match lookup {
            Lookup::Ready(result) => Value::Document(result?),
            Lookup::Pending(future) => {
                Value::Reference(ReferenceHandle::new(id.clone(), schema.clone(), future))
            }
        };

        if let Some(cache) = &cache {
            cache.insert(schema.name(), &id, value.clone());
        }

        Ok(value)
    }
}

fn not_bound(ctx: &FieldContext<'_>) -> DocumentStoreError {
    DocumentStoreError::NotBound {
        field: ctx.name().to_string(),
        document: ctx.document().schema().name().to_string(),
    }
}

impl Field for ReferenceField {
    fn smart_null(&self) -> bool {
        self.smart_null
    }

    fn get_default(&self, _ctx: &FieldContext<'_>) -> Marker<Value> {
        if self.smart_null {
            Marker::Present(Value::null())
        } else {
            Marker::NotSet
        }
    }

    fn prepare_value(&self, ctx: &FieldContext<'_>, value: Value) -> DocumentStoreResult<Value> {
        match value {
            Value::Document(document) => {
                if document.schema().name() != self.target_name() {
                    return Err(ctx.invalid(format!(
                        "expected a {} document, got {}",
                        self.target_name(),
                        document.schema().name()
                    )));
                }

                Ok(Value::Document(document))
            }
            Value::Reference(handle) => Ok(Value::Reference(handle)),
            // unparseable strings are kept and fail at resolution
            Value::Bson(Bson::String(id)) => Ok(Value::Bson(match ObjectId::parse_str(&id) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => Bson::String(id),
            })),
            Value::Bson(id) => Ok(Value::Bson(id)),
        }
    }

    /// Assigned identifiers are looked up on their first read.
    fn materialize(&self, ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Option<Value>> {
        match value {
            Value::Bson(Bson::Null) => Ok(None),
            Value::Bson(id) => self.resolve(ctx, id.clone()).map(Some),
            Value::Document(_) | Value::Reference(_) => Ok(None),
        }
    }

    fn matches_raw(&self, _ctx: &FieldContext<'_>, value: &Value, raw: &Bson) -> Option<bool> {
        Some(match value.identifier() {
            Some(id) => id == *raw,
            None => *raw == Bson::Null,
        })
    }

    fn to_store(&self, ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Bson> {
        value.identifier().ok_or_else(|| {
            ctx.invalid(format!(
                "the referenced {} document has no identifier",
                self.target_name()
            ))
        })
    }

    fn from_store(&self, ctx: &FieldContext<'_>, raw: Bson) -> DocumentStoreResult<Value> {
        self.resolve(ctx, raw)
    }

    fn get_fake(
        &self,
        ctx: &FieldContext<'_>,
        rng: &mut dyn RngCore,
        depth: usize,
    ) -> DocumentStoreResult<Marker<Value>> {
        if depth >= MAX_FAKE_DEPTH {
            return Ok(self.get_default(ctx));
        }

        let schema = self.target_schema(ctx)?;
        let fake = Document::fake(&schema, rng, depth + 1)?;
        if let Some(database) = ctx.document().database() {
            fake.bind(&database);
        }
        if fake.id().is_none() && schema.field(ID_FIELD).is_some() {
            fake.set(ID_FIELD, ObjectId::new())?;
        }

        Ok(Marker::Present(Value::Document(fake)))
    }
}

type SharedLookup = Shared<BoxFuture<'static, DocumentStoreResult<Document>>>;

/// A reference resolved under deferred mode.
///
/// The handle stands for the bare identifier: it displays and compares as the
/// identifier. Awaiting it runs the lookup once and memoizes the result, so
/// awaiting it again, or awaiting a clone, never queries the store twice.
#[derive(Clone)]
pub struct ReferenceHandle {
    id: Bson,
    schema: Arc<Schema>,
    lookup: SharedLookup,
}

impl ReferenceHandle {
    pub(crate) fn new(
        id: Bson,
        schema: Arc<Schema>,
        lookup: BoxFuture<'static, DocumentStoreResult<Document>>,
    ) -> Self {
        Self {
            id,
            schema,
            lookup: lookup.shared(),
        }
    }

    /// The referenced identifier.
    pub fn id(&self) -> &Bson {
        &self.id
    }

    /// The schema of the referenced document.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns `true` once the lookup has completed.
    pub fn is_resolved(&self) -> bool {
        self.lookup.peek().is_some()
    }

    /// The referenced document, if the lookup has completed successfully.
    pub fn document(&self) -> Option<Document> {
        match self.lookup.peek() {
            Some(Ok(document)) => Some(document.clone()),
            _ => None,
        }
    }

    /// Waits for the referenced document.
    pub async fn get(&self) -> DocumentStoreResult<Document> {
        self.lookup.clone().await
    }
}

impl IntoFuture for ReferenceHandle {
    type Output = DocumentStoreResult<Document>;
    type IntoFuture = SharedLookup;

    fn into_future(self) -> Self::IntoFuture {
        self.lookup
    }
}

impl IntoFuture for &ReferenceHandle {
    type Output = DocumentStoreResult<Document>;
    type IntoFuture = SharedLookup;

    fn into_future(self) -> Self::IntoFuture {
        self.lookup.clone()
    }
}

impl PartialEq<Bson> for ReferenceHandle {
    fn eq(&self, other: &Bson) -> bool {
        &self.id == other
    }
}

impl fmt::Display for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Bson::ObjectId(oid) => write!(f, "{}", oid.to_hex()),
            Bson::String(id) => f.write_str(id),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Debug for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reference({}:{} {})",
            self.schema.collection().unwrap_or(self.schema.name()),
            self,
            if self.is_resolved() { '+' } else { '-' }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    schema: String,
    id: String,
}

impl CacheKey {
    fn new(schema: &str, id: &Bson) -> Self {
        Self {
            schema: schema.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Value>,
    hits: u64,
    misses: u64,
}

/// Resolved references keyed by referenced schema and identifier.
///
/// A cache is scoped to one query context: it is created by the caller and
/// handed to a [`QuerySet`](crate::queryset::QuerySet), whose documents share it.
/// Entries may be pending [`ReferenceHandle`]s, so a second resolution of the
/// same identifier awaits the first lookup instead of issuing another one.
#[derive(Clone, Default)]
pub struct ReferenceCache {
    state: Arc<Mutex<CacheState>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, schema: &str, id: &Bson) -> Option<Value> {
        let mut state = self.state.lock();

        match state.entries.get(&CacheKey::new(schema, id)).cloned() {
            Some(value) => {
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, schema: &str, id: &Bson, value: Value) {
        self.state
            .lock()
            .entries
            .insert(CacheKey::new(schema, id), value);
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Hit and miss counters are kept.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn hits(&self) -> u64 {
        self.state.lock().hits
    }

    pub fn misses(&self) -> u64 {
        self.state.lock().misses
    }

    /// Returns `true` if both handles share the same entries.
    pub fn same_scope(&self, other: &ReferenceCache) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("ReferenceCache")
            .field("entries", &state.entries.len())
            .field("hits", &state.hits)
            .field("misses", &state.misses)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ScalarField;
    use futures::future;

    fn author() -> Arc<Schema> {
        Schema::builder("Author")
            .collection("authors")
            .field("name", ScalarField::string())
            .build()
    }

    #[test]
    fn cache_counts_hits_and_misses() {
        let cache = ReferenceCache::new();
        let id = Bson::ObjectId(ObjectId::new());

        assert!(cache.get("Author", &id).is_none());
        cache.insert("Author", &id, Value::from(1));
        assert_eq!(cache.get("Author", &id), Some(Value::from(1)));
        assert!(cache.get("Book", &id).is_none());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn handles_stand_for_their_identifier() {
        let oid = ObjectId::new();
        let handle = ReferenceHandle::new(
            Bson::ObjectId(oid),
            author(),
            future::ready(Err(DocumentStoreError::Backend("offline".into()))).boxed(),
        );

        assert_eq!(handle, Bson::ObjectId(oid));
        assert_eq!(handle.to_string(), oid.to_hex());
        assert_eq!(Value::Reference(handle.clone()), Value::from(oid));
        assert_eq!(format!("{handle:?}"), format!("Reference(authors:{} -)", oid.to_hex()));
        assert!(!handle.is_resolved());
    }

    #[tokio::test]
    async fn awaiting_twice_runs_the_lookup_once() {
        let schema = author();
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = runs.clone();
        let target = Document::new(&schema);
        let resolved = target.clone();

        let handle = ReferenceHandle::new(
            Bson::Int64(1),
            schema,
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(resolved)
            }
            .boxed(),
        );

        let first = (&handle).await.unwrap();
        let second = handle.get().await.unwrap();

        assert!(handle.is_resolved());
        assert_eq!(first, target);
        assert_eq!(second, target);
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn unbound_documents_cannot_resolve() {
        let authors = author();
        let books = Schema::builder("Book")
            .collection("books")
            .field("author", ReferenceField::new(&authors))
            .build();
        let book = Document::from_record(
            &books,
            bson::doc! { "author": ObjectId::new() },
            None,
            None,
            None,
        );

        assert!(matches!(
            book.get("author"),
            Err(DocumentStoreError::NotBound { .. })
        ));
    }

    #[test]
    fn documents_of_other_schemas_are_rejected() {
        let authors = author();
        let books = Schema::builder("Book")
            .collection("books")
            .field("author", ReferenceField::new(&authors))
            .build();
        let book = Document::new(&books);

        assert!(matches!(
            book.set("author", Document::new(&books)),
            Err(DocumentStoreError::Validation { .. })
        ));
    }

    #[test]
    fn assigning_identifiers_needs_no_database() {
        let authors = author();
        let books = Schema::builder("Book")
            .collection("books")
            .field("author", ReferenceField::new(&authors))
            .build();
        let book = Document::new(&books);

        book.set("author", ObjectId::new()).unwrap();
        book.set("author", "not-an-object-id").unwrap();

        assert_eq!(book.changed_fields(), ["author"]);
        assert_eq!(
            book.to_record().unwrap().get_str("author").unwrap(),
            "not-an-object-id"
        );
        assert!(matches!(
            book.get("author"),
            Err(DocumentStoreError::NotBound { .. })
        ));
    }

    #[test]
    fn restating_the_stored_identifier_is_not_a_change() {
        let authors = author();
        let books = Schema::builder("Book")
            .collection("books")
            .field("author", ReferenceField::new(&authors))
            .build();
        let oid = ObjectId::new();
        let writer = Document::from_record(&authors, bson::doc! { "_id": oid }, None, None, None);
        let book = Document::from_record(
            &books,
            bson::doc! { "_id": ObjectId::new(), "author": oid },
            None,
            None,
            None,
        );

        book.set("author", &writer).unwrap();
        book.set("author", oid).unwrap();
        book.set("author", oid.to_hex()).unwrap();
        assert!(!book.is_changed());

        book.set("author", ObjectId::new()).unwrap();
        assert_eq!(book.changed_fields(), ["author"]);
    }

    #[test]
    fn assigned_documents_store_their_identifier() {
        let authors = author();
        let books = Schema::builder("Book")
            .collection("books")
            .field("author", ReferenceField::new(&authors))
            .build();
        let oid = ObjectId::new();
        let writer = Document::from_record(&authors, bson::doc! { "_id": oid }, None, None, None);
        let book = Document::new(&books);

        book.set("author", &writer).unwrap();

        assert_eq!(
            book.to_record().unwrap().get("author"),
            Some(&Bson::ObjectId(oid))
        );
    }
}
