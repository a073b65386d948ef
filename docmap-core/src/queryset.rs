//! Lazy, copy-on-modify queries over one schema's collection.
//!
//! A [`QuerySet`] is a query specification: criteria, projection, sort keys,
//! skip and limit, bound to one [`Schema`] and one [`Database`]. Refining a query
//! set (`find`, `filter`, `sort`, `fields`, ...) returns a new query set and never
//! touches the store; the receiver is left as it was, so a query set can be kept
//! around and reused as a template.
//!
//! The store is only contacted by the materializing operations (`count`, `iter`,
//! `fetch`, `stream`, `slice`, `nth`, `find_one`, `with_id`, `update`), which return
//! a [`Lookup`] following the database [`Mode`](crate::lookup::Mode).
//!
//! # Example
//!
//! ```ignore
//! let active = db.queryset(&users).find(doc! { "active": true }, None);
//! let newest = active.sort([("created", SortDirection::Desc)]).fields(["name"]);
//!
//! for user in newest.iter().await? {
//!     println!("{}", user.get("name")?.as_str().unwrap_or_default());
//! }
//! ```

use bson::Bson;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::{fmt, ops::Range, sync::Arc, vec};
use tracing::debug;

use crate::{
    backend::{FindSpec, UpdateResult},
    database::Database,
    document::{Document, Record},
    error::{DocumentStoreError, DocumentStoreResult},
    lookup::Lookup,
    query::{Expr, Sort},
    reference::ReferenceCache,
    schema::{ID_FIELD, Schema},
    value::Value,
};

/// An immutable query specification bound to one schema and one database.
#[derive(Clone)]
pub struct QuerySet {
    database: Database,
    schema: Arc<Schema>,
    criteria: Record,
    projection: Option<Record>,
    sort: Vec<Sort>,
    skip: Option<u64>,
    limit: Option<u64>,
    cache: Option<ReferenceCache>,
}

impl QuerySet {
    pub(crate) fn new(database: Database, schema: Arc<Schema>) -> Self {
        let cache = database.reference_cache();

        Self {
            database,
            schema,
            criteria: Record::new(),
            projection: None,
            sort: Vec::new(),
            skip: None,
            limit: None,
            cache,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn criteria(&self) -> &Record {
        &self.criteria
    }

    pub fn projection(&self) -> Option<&Record> {
        self.projection.as_ref()
    }

    pub fn sort_keys(&self) -> &[Sort] {
        &self.sort
    }

    pub fn reference_cache(&self) -> Option<&ReferenceCache> {
        self.cache.as_ref()
    }

    /// Returns a query set with `criteria` and `projection` merged key by key
    /// into the current ones.
    pub fn find(&self, criteria: Record, projection: Option<Record>) -> QuerySet {
        let mut queryset = self.clone();
        queryset.criteria.extend(criteria);

        if let Some(projection) = projection {
            queryset
                .projection
                .get_or_insert_with(Record::new)
                .extend(projection);
        }

        queryset
    }

    /// Returns a query set narrowed by a filter expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression cannot be translated into criteria.
    pub fn filter(&self, expr: &Expr) -> DocumentStoreResult<QuerySet> {
        Ok(self.find(expr.to_criteria()?, None))
    }

    /// Returns a query set with the sort keys appended after the current ones.
    pub fn sort<S: Into<Sort>>(&self, keys: impl IntoIterator<Item = S>) -> QuerySet {
        let mut queryset = self.clone();
        queryset.sort.extend(keys.into_iter().map(Into::into));
        queryset
    }

    /// Returns a query set that also loads the named fields.
    ///
    /// Fields outside the projection are not loaded, and reading them fails with
    /// [`DocumentStoreError::NotLoaded`].
    pub fn fields<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> QuerySet {
        self.find(
            Record::new(),
            Some(
                names
                    .into_iter()
                    .map(|name| (name.into(), Bson::Boolean(true)))
                    .collect(),
            ),
        )
    }

    /// Returns a query set that loads whole documents.
    pub fn fields_all(&self) -> QuerySet {
        let mut queryset = self.clone();
        queryset.projection = None;
        queryset
    }

    /// Returns a query set skipping the first `skip` matches.
    pub fn skip(&self, skip: u64) -> QuerySet {
        let mut queryset = self.clone();
        queryset.skip = Some(skip);
        queryset
    }

    /// Returns a query set returning at most `limit` matches. `0` means no limit.
    pub fn limit(&self, limit: u64) -> QuerySet {
        let mut queryset = self.clone();
        queryset.limit = (limit > 0).then_some(limit);
        queryset
    }

    /// Returns a query set whose documents share `cache` for reference resolution.
    pub fn with_reference_cache(&self, cache: ReferenceCache) -> QuerySet {
        let mut queryset = self.clone();
        queryset.cache = Some(cache);
        queryset
    }

    /// Counts matching documents. Sort, projection, skip and limit are ignored.
    pub fn count(&self) -> Lookup<u64> {
        let collection = match self.collection() {
            Ok(collection) => collection,
            Err(err) => return Lookup::failed(err),
        };
        let backend = self.database.backend().clone();
        let criteria = self.criteria.clone();

        debug!(queryset = %self, "counting documents");

        self.database
            .run(async move { backend.count_documents(criteria, &collection).await })
    }

    /// Runs the query and returns a cursor over the matching documents.
    ///
    /// Each call runs the query again. Documents are built from their records as the
    /// cursor advances and share one reference cache.
    pub fn iter(&self) -> Lookup<Cursor> {
        let collection = match self.collection() {
            Ok(collection) => collection,
            Err(err) => return Lookup::failed(err),
        };
        let backend = self.database.backend().clone();
        let spec = self.spec();
        let loader = self.loader();

        debug!(queryset = %self, "finding documents");

        self.database.run(async move {
            let records = backend.find_documents(spec, &collection).await?;

            Ok(Cursor {
                records: records.into_iter(),
                loader,
            })
        })
    }

    /// Runs the query and collects the matching documents.
    pub fn fetch(&self) -> Lookup<Vec<Document>> {
        self.iter().map(|cursor| cursor.collect())
    }

    /// Runs the query when first polled and yields the matching documents.
    ///
    /// Streams are always asynchronous, whatever the database mode.
    pub fn stream(&self) -> BoxStream<'static, DocumentStoreResult<Document>> {
        let collection = match self.collection() {
            Ok(collection) => collection,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let backend = self.database.backend().clone();
        let spec = self.spec();
        let loader = self.loader();

        debug!(queryset = %self, "streaming documents");

        stream::once(async move { backend.find_documents(spec, &collection).await })
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, DocumentStoreError>)))
            .try_flatten()
            .map_ok(move |record| loader.load(record))
            .boxed()
    }

    /// Returns the matches at positions `range`, relative to the current skip and limit.
    pub fn slice(&self, range: Range<u64>) -> Lookup<Vec<Document>> {
        let mut length = range.end.saturating_sub(range.start);
        if let Some(limit) = self.limit {
            length = length.min(limit.saturating_sub(range.start));
        }

        if length == 0 {
            return Lookup::Ready(Ok(Vec::new()));
        }

        let mut queryset = self.clone();
        queryset.skip = Some(self.skip.unwrap_or(0).saturating_add(range.start));
        queryset.limit = Some(length);
        queryset.fetch()
    }

    /// Returns the match at position `index`.
    pub fn nth(&self, index: u64) -> Lookup<Option<Document>> {
        self.slice(index..index.saturating_add(1))
            .map(|documents| documents.into_iter().next())
    }

    /// Returns the first document matching the query refined by `criteria` and
    /// `projection`, or `None`. The query set itself is not modified.
    pub fn find_one(&self, criteria: Option<Record>, projection: Option<Record>) -> Lookup<Option<Document>> {
        let queryset = self.find(criteria.unwrap_or_default(), projection);
        let collection = match queryset.collection() {
            Ok(collection) => collection,
            Err(err) => return Lookup::failed(err),
        };
        let backend = queryset.database.backend().clone();
        let spec = queryset.spec();
        let loader = queryset.loader();

        debug!(queryset = %queryset, "finding one document");

        queryset.database.run(async move {
            let record = backend.find_one_document(spec, &collection).await?;

            Ok(record.map(|record| loader.load(record)))
        })
    }

    /// Like [`find_one`](Self::find_one), but fails with the error produced by
    /// `missing` when nothing matches.
    pub fn find_one_or_else<F>(&self, criteria: Record, projection: Option<Record>, missing: F) -> Lookup<Document>
    where
        F: FnOnce() -> DocumentStoreError + Send + 'static,
    {
        self.find_one(Some(criteria), projection)
            .and_then(|found| found.ok_or_else(missing))
    }

    /// Returns the document with the given primary identifier, ignoring the
    /// current criteria and projection.
    ///
    /// The identifier is coerced by the `_id` field first, so the hex string of an
    /// object id finds the document stored under that object id.
    pub fn with_id(&self, id: impl Into<Value>) -> Lookup<Option<Document>> {
        let keyed = Document::new(&self.schema);
        if let Err(err) = keyed.set(ID_FIELD, id) {
            return Lookup::failed(err);
        }

        let Some(id) = keyed.id() else {
            return Lookup::Ready(Ok(None));
        };

        let mut queryset = self.fields_all();
        queryset.criteria = bson::doc! { ID_FIELD: id };
        queryset.find_one(None, None)
    }

    /// Applies `update` to every matching document. Never upserts.
    pub fn update(&self, update: Record) -> Lookup<UpdateResult> {
        self.update_with(update, true)
    }

    /// Applies `update` to the first matching document. Never upserts.
    pub fn update_one(&self, update: Record) -> Lookup<UpdateResult> {
        self.update_with(update, false)
    }

    fn update_with(&self, update: Record, multi: bool) -> Lookup<UpdateResult> {
        let collection = match self.collection() {
            Ok(collection) => collection,
            Err(err) => return Lookup::failed(err),
        };
        let backend = self.database.backend().clone();
        let criteria = self.criteria.clone();

        debug!(queryset = %self, multi, "updating documents");

        self.database.run(async move {
            backend
                .update_documents(criteria, update, multi, false, &collection)
                .await
        })
    }

    fn collection(&self) -> DocumentStoreResult<String> {
        Ok(self.schema.require_collection()?.to_string())
    }

    fn spec(&self) -> FindSpec {
        FindSpec {
            criteria: self.criteria.clone(),
            projection: self.projection.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
        }
    }

    /// Documents of one materialization share a fresh reference cache unless one
    /// was set explicitly.
    fn loader(&self) -> Loader {
        Loader {
            schema: self.schema.clone(),
            projection: self.projection.clone(),
            database: self.database.clone(),
            cache: self.cache.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QuerySet({}, {}, {}, {})",
            self.schema.collection().unwrap_or(self.schema.name()),
            self.criteria,
            self.projection
                .as_ref()
                .map_or_else(|| "None".to_string(), Record::to_string),
            Sort::to_record(&self.sort),
        )
    }
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Builds documents from the records of one materialization.
struct Loader {
    schema: Arc<Schema>,
    projection: Option<Record>,
    database: Database,
    cache: ReferenceCache,
}

impl Loader {
    fn load(&self, record: Record) -> Document {
        Document::from_record(
            &self.schema,
            record,
            self.projection.as_ref(),
            Some(self.database.clone()),
            Some(self.cache.clone()),
        )
    }
}

/// The documents returned by [`QuerySet::iter`].
pub struct Cursor {
    records: vec::IntoIter<Record>,
    loader: Loader,
}

impl Cursor {
    /// The reference cache shared by the documents of this cursor.
    pub fn reference_cache(&self) -> &ReferenceCache {
        &self.loader.cache
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(|record| self.loader.load(record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("schema", &self.loader.schema.name())
            .field("remaining", &self.records.len())
            .finish()
    }
}
