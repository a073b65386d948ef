//! Document types and the registry used to resolve them by name.
//!
//! A [`Schema`] is the runtime description of a document type: its name, the
//! collection it is stored in (embedded types have none) and one
//! [`FieldAccessor`] per attribute. Schemas are immutable once built and shared
//! as `Arc<Schema>`.
//!
//! # Example
//!
//! ```ignore
//! use docmap::prelude::*;
//!
//! let authors = Schema::builder("Author")
//!     .collection("authors")
//!     .field("name", ScalarField::string())
//!     .build();
//!
//! let books = Schema::builder("Book")
//!     .collection("books")
//!     .field("title", ScalarField::string())
//!     .field("author", ReferenceField::new(&authors))
//!     .build();
//! ```

use parking_lot::RwLock;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldAccessor, ScalarField},
};

/// Name of the primary identifier attribute.
pub const ID_FIELD: &str = "_id";

/// The description of one document type.
pub struct Schema {
    name: String,
    collection: Option<String>,
    fields: Vec<FieldAccessor>,
}

impl Schema {
    /// Starts building a schema with the given type name.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// The type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection documents of this type are stored in.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Returns the collection or fails for embedded types.
    pub fn require_collection(&self) -> DocumentStoreResult<&str> {
        self.collection().ok_or_else(|| {
            DocumentStoreError::Usage(format!(
                "{} is an embedded document type and has no collection",
                self.name
            ))
        })
    }

    /// Returns `true` for types that only live inside another document.
    pub fn is_embedded(&self) -> bool {
        self.collection.is_none()
    }

    /// All field accessors in declaration order.
    pub fn fields(&self) -> &[FieldAccessor] {
        &self.fields
    }

    /// Looks up a field accessor by attribute name.
    pub fn field(&self, name: &str) -> Option<&FieldAccessor> {
        self.fields
            .iter()
            .find(|accessor| accessor.name() == name)
    }

    /// Looks up a field accessor, failing for unknown attributes.
    pub fn accessor(&self, name: &str) -> DocumentStoreResult<&FieldAccessor> {
        self.field(name)
            .ok_or_else(|| DocumentStoreError::UnknownField {
                field: name.to_string(),
                document: self.name.clone(),
            })
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field(
                "fields",
                &self.fields.iter().map(FieldAccessor::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Schema`].
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, Arc<dyn Field>)>,
}

impl SchemaBuilder {
    /// Creates a builder for an embedded type with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            fields: Vec::new(),
        }
    }

    /// Stores documents of this type in the given collection.
    ///
    /// Types with a collection receive an implicit `_id` field unless one is
    /// declared explicitly.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Adds an attribute. A later field with the same name replaces the earlier one.
    pub fn field(mut self, name: impl Into<String>, field: impl Field + 'static) -> Self {
        let name = name.into();
        let field: Arc<dyn Field> = Arc::new(field);

        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }

        self
    }

    /// Builds the schema.
    pub fn build(self) -> Arc<Schema> {
        let mut fields = self.fields;

        if self.collection.is_some() && !fields.iter().any(|(name, _)| name == ID_FIELD) {
            fields.insert(0, (ID_FIELD.to_string(), Arc::new(ScalarField::object_id())));
        }

        Arc::new(Schema {
            fields: fields
                .into_iter()
                .map(|(name, field)| FieldAccessor::new(name, self.name.clone(), field))
                .collect(),
            name: self.name,
            collection: self.collection,
        })
    }
}

/// Shared map from type names to schemas.
///
/// Reference fields that name their target lazily are resolved through the
/// registry of the database they are read from.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: Arc<RwLock<HashMap<String, Arc<Schema>>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema under its type name, replacing any previous entry.
    pub fn register(&self, schema: &Arc<Schema>) {
        self.schemas
            .write()
            .insert(schema.name().to_string(), schema.clone());
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(name).cloned()
    }

    /// Looks up a schema, failing for unregistered names.
    pub fn resolve(&self, name: &str) -> DocumentStoreResult<Arc<Schema>> {
        self.get(name)
            .ok_or_else(|| DocumentStoreError::UnknownSchema(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.schemas.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.names())
            .finish()
    }
}
