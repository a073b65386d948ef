//! Document instances and their storage layers.
//!
//! A [`Document`] is an instance of a [`Schema`]. It keeps the values of its
//! attributes in three layers:
//!
//! - **raw**: wire values as read from the store, keyed by attribute name, or a
//!   [`Marker`] for attributes that were deleted or excluded by a projection
//! - **cache**: values already converted from the raw layer
//! - **changed**: assignments, defaults and deletions not yet persisted
//!
//! All attribute access goes through the schema's
//! [`FieldAccessor`](crate::field::FieldAccessor)s; the layers themselves are only
//! visible inside the crate.
//!
//! # Example
//!
//! ```ignore
//! let user = Document::new(&users);
//! user.set("name", "ada")?;
//! assert!(user.is_changed());
//!
//! db.insert(&user).await?;
//! assert!(!user.is_changed());
//! ```

use bson::Bson;
use parking_lot::{Mutex, MutexGuard};
use rand::RngCore;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    database::Database,
    error::DocumentStoreResult,
    marker::Marker,
    reference::ReferenceCache,
    schema::{ID_FIELD, Schema},
    value::Value,
};

/// A record in wire form.
pub type Record = bson::Document;

#[derive(Default)]
pub(crate) struct Layers {
    pub(crate) raw: HashMap<String, Marker<Bson>>,
    pub(crate) cache: HashMap<String, Value>,
    pub(crate) changed: HashMap<String, Marker<Value>>,
}

struct Parent {
    document: Weak<DocumentInner>,
    name: String,
}

struct DocumentInner {
    schema: Arc<Schema>,
    layers: Mutex<Layers>,
    database: Mutex<Option<Database>>,
    cache: Mutex<Option<ReferenceCache>>,
    parent: Mutex<Option<Parent>>,
}

/// A shared handle to one document instance.
///
/// Cloning the handle does not copy the document. Instances are not meant to be
/// mutated from several threads at once; every layer access takes a short lock,
/// but a read-modify-write sequence is not atomic.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Creates an empty, unbound instance of `schema`.
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self::with_layers(schema, Layers::default(), None, None)
    }

    /// Builds an instance from a stored record.
    ///
    /// Every key of the record lands in the raw layer untouched. Schema fields
    /// missing from the record are marked not loaded if `projection` excludes
    /// them, otherwise they are left to their default.
    pub fn from_record(
        schema: &Arc<Schema>,
        record: Record,
        projection: Option<&Record>,
        database: Option<Database>,
        cache: Option<ReferenceCache>,
    ) -> Self {
        let mut layers = Layers::default();

        if let Some(projection) = projection {
            for accessor in schema.fields() {
                if !record.contains_key(accessor.name()) && !projects(projection, accessor.name()) {
                    layers
                        .raw
                        .insert(accessor.name().to_string(), Marker::NotLoaded);
                }
            }
        }

        for (name, value) in record {
            layers.raw.insert(name, Marker::Present(value));
        }

        Self::with_layers(schema, layers, database, cache)
    }

    fn with_layers(
        schema: &Arc<Schema>,
        layers: Layers,
        database: Option<Database>,
        cache: Option<ReferenceCache>,
    ) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                schema: schema.clone(),
                layers: Mutex::new(layers),
                database: Mutex::new(database),
                cache: Mutex::new(cache),
                parent: Mutex::new(None),
            }),
        }
    }

    /// Builds an instance with fake values for every field that can produce one.
    ///
    /// `depth` is the current nesting level; embedded and referenced documents
    /// stop recursing at [`MAX_FAKE_DEPTH`](crate::field::MAX_FAKE_DEPTH).
    pub fn fake(schema: &Arc<Schema>, rng: &mut dyn RngCore, depth: usize) -> DocumentStoreResult<Self> {
        let document = Self::new(schema);

        for accessor in schema.fields() {
            let fake = accessor
                .field()
                .get_fake(&accessor.context(&document), rng, depth)?;

            if let Marker::Present(value) = fake {
                accessor.set(&document, value)?;
            }
        }

        Ok(document)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// The database this document is bound to, inherited from the parent for
    /// embedded documents.
    pub fn database(&self) -> Option<Database> {
        if let Some(database) = self.inner.database.lock().clone() {
            return Some(database);
        }

        self.parent().and_then(|(parent, _)| parent.database())
    }

    /// Binds the document to a database so that references can be resolved.
    pub fn bind(&self, database: &Database) {
        *self.inner.database.lock() = Some(database.clone());
    }

    /// The reference cache of the query this document was loaded through.
    pub fn reference_cache(&self) -> Option<ReferenceCache> {
        if let Some(cache) = self.inner.cache.lock().clone() {
            return Some(cache);
        }

        self.parent().and_then(|(parent, _)| parent.reference_cache())
    }

    pub fn set_reference_cache(&self, cache: Option<ReferenceCache>) {
        *self.inner.cache.lock() = cache;
    }

    pub(crate) fn layers(&self) -> MutexGuard<'_, Layers> {
        self.inner.layers.lock()
    }

    /// Reads an attribute.
    pub fn get(&self, name: &str) -> DocumentStoreResult<Value> {
        self.schema().accessor(name)?.get(self)
    }

    /// Assigns an attribute.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> DocumentStoreResult<()> {
        self.schema().accessor(name)?.set(self, value)
    }

    /// Removes an attribute.
    pub fn delete(&self, name: &str) -> DocumentStoreResult<()> {
        self.schema().accessor(name)?.delete(self)
    }

    /// The primary identifier, if one is assigned or stored.
    ///
    /// Read straight from the layers without conversion or defaults.
    pub fn id(&self) -> Option<Bson> {
        let layers = self.layers();

        match layers.changed.get(ID_FIELD) {
            Some(Marker::Present(value)) => value.identifier(),
            Some(_) => None,
            None => match layers.cache.get(ID_FIELD) {
                Some(value) => value.identifier(),
                None => match layers.raw.get(ID_FIELD) {
                    Some(Marker::Present(Bson::Null)) | Some(Marker::NotSet | Marker::NotLoaded) | None => None,
                    Some(Marker::Present(id)) => Some(id.clone()),
                },
            },
        }
    }

    /// Returns `true` if there are changes not yet persisted.
    pub fn is_changed(&self) -> bool {
        !self.layers().changed.is_empty()
    }

    /// Names of the attributes with pending changes, sorted.
    pub fn changed_fields(&self) -> Vec<String> {
        let mut names = self.layers().changed.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Serializes the document into a full record.
    ///
    /// Stored values that were never read are copied without conversion. Keys
    /// of the stored record unknown to the schema are preserved.
    pub fn to_record(&self) -> DocumentStoreResult<Record> {
        let mut record = Record::new();

        for accessor in self.schema().fields() {
            if let Some(value) = accessor.dump(self)? {
                record.insert(accessor.name(), value);
            }
        }

        let layers = self.layers();
        let mut extra = layers
            .raw
            .iter()
            .filter(|(name, _)| self.schema().field(name).is_none())
            .filter_map(|(name, value)| value.as_ref().present().map(|value| (name, value)))
            .collect::<Vec<_>>();
        extra.sort_by(|(left, _), (right, _)| left.cmp(right));

        for (name, value) in extra {
            record.insert(name.clone(), value.clone());
        }

        Ok(record)
    }

    /// The record as relaxed JSON.
    pub fn to_json(&self) -> DocumentStoreResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_record()?)?)
    }

    /// Returns `true` if both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn bind_parent(&self, parent: &Document, name: &str) {
        *self.inner.parent.lock() = Some(Parent {
            document: Arc::downgrade(&parent.inner),
            name: name.to_string(),
        });
    }

    /// The document holding this embedded document, with the attribute name.
    pub fn parent(&self) -> Option<(Document, String)> {
        let parent = self.inner.parent.lock();
        let parent = parent.as_ref()?;

        parent
            .document
            .upgrade()
            .map(|inner| (Document { inner }, parent.name.clone()))
    }

    /// The outermost document holding this one.
    pub fn root(&self) -> Document {
        let mut current = self.clone();

        while let Some((parent, _)) = current.parent() {
            current = parent;
        }

        current
    }

    /// Marks every document up the parent chain as changed in the attribute
    /// that leads to this one.
    pub(crate) fn propagate_change(&self) {
        let mut child = self.clone();

        while let Some((parent, name)) = child.parent() {
            {
                let mut layers = parent.layers();
                let holds_child = match layers.changed.get(&name) {
                    Some(Marker::Present(Value::Document(held))) => held.ptr_eq(&child),
                    Some(_) => false,
                    None => matches!(layers.cache.get(&name), Some(Value::Document(held)) if held.ptr_eq(&child)),
                };

                // detached from its old parent
                if !holds_child {
                    return;
                }

                layers
                    .changed
                    .insert(name, Marker::Present(Value::Document(child.clone())));
            }

            child = parent;
        }
    }

    /// Replaces every layer with a freshly stored record.
    pub(crate) fn reset(&self, record: Record) {
        let mut layers = self.layers();
        *layers = Layers::default();

        for (name, value) in record {
            layers.raw.insert(name, Marker::Present(value));
        }
    }

    /// Folds pending changes into the stored layers after a successful write.
    ///
    /// `record` holds the wire values that were written.
    pub(crate) fn mark_persisted(&self, record: &Record) {
        let mut nested = Vec::new();

        {
            let mut layers = self.layers();
            let changed = std::mem::take(&mut layers.changed);

            for (name, slot) in changed {
                match slot {
                    Marker::Present(value) => {
                        if let Value::Document(document) = &value {
                            if document.schema().is_embedded() {
                                nested.push((name.clone(), document.clone()));
                            }
                        }
                        layers.cache.insert(name, value);
                    }
                    Marker::NotSet | Marker::NotLoaded => {
                        layers.cache.remove(&name);
                        layers.raw.insert(name, Marker::NotSet);
                    }
                }
            }

            for (name, value) in record {
                layers.raw.insert(name.clone(), Marker::Present(value.clone()));
            }
        }

        for (name, document) in nested {
            let written = record.get_document(&name).cloned().unwrap_or_default();
            document.mark_persisted(&written);
        }
    }
}

/// Returns `true` if `field` is part of the records returned under `projection`.
///
/// A projection is inclusive when any field other than `_id` is switched on;
/// `_id` is then included unless it is switched off explicitly.
pub fn projects(projection: &Record, field: &str) -> bool {
    let inclusive = projection
        .iter()
        .any(|(name, value)| name != ID_FIELD && truthy(value));

    match projection.get(field) {
        Some(value) => truthy(value),
        None if field == ID_FIELD => true,
        None => !inclusive,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

impl PartialEq for Document {
    /// Instances are equal if they are the same instance or if they are stored
    /// documents of the same schema with the same identifier.
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }

        if self.schema().name() != other.schema().name() {
            return false;
        }

        match (self.id(), other.id()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}({id})", self.schema().name()),
            None => write!(f, "{}(new)", self.schema().name()),
        }
    }
}
