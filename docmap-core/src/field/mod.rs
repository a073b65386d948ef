//! The field contract and the per-attribute access protocol.
//!
//! A [`Field`] describes how one attribute converts between its wire form and its
//! materialized [`Value`]. A [`FieldAccessor`] binds a field to an attribute name
//! on one schema and mediates every read, write and delete against the three
//! storage layers of a [`Document`]:
//!
//! - **changed** - pending writes, including deletions
//! - **cache** - values already converted from the raw layer
//! - **raw** - wire values as loaded, plus the not-set/not-loaded markers
//!
//! Reads consult the layers in that order and fall back to the field default.
//! Raw values are converted once and memoized in the cache; defaults are written
//! to the changed layer so they are persisted with the document.

use bson::Bson;
use rand::RngCore;
use std::{fmt::Debug, sync::Arc};

use crate::{
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    marker::Marker,
    value::Value,
};

mod embedded;
mod scalar;

pub use embedded::EmbeddedField;
pub use scalar::{ScalarField, ScalarKind};

/// Recursion limit for fake values of embedded and referenced documents.
pub const MAX_FAKE_DEPTH: usize = 3;

/// The document and attribute name a field hook is invoked for.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    document: &'a Document,
    name: &'a str,
}

impl<'a> FieldContext<'a> {
    pub(crate) fn new(document: &'a Document, name: &'a str) -> Self {
        Self { document, name }
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The error for an attribute excluded by a projection.
    pub fn not_loaded(&self) -> DocumentStoreError {
        DocumentStoreError::NotLoaded {
            field: self.name.to_string(),
            document: self.document.schema().name().to_string(),
        }
    }

    /// The error for an attribute that was never stored and has no default.
    pub fn not_set(&self) -> DocumentStoreError {
        DocumentStoreError::AttributeNotSet {
            field: self.name.to_string(),
            document: self.document.schema().name().to_string(),
        }
    }

    /// A validation error for this attribute.
    pub fn invalid(&self, message: impl Into<String>) -> DocumentStoreError {
        DocumentStoreError::Validation {
            field: self.name.to_string(),
            message: message.into(),
        }
    }
}

/// The type contract of one attribute.
///
/// `to_store` and `from_store` must be inverses for every value `prepare_value`
/// accepts. Under smart null a stored null bypasses both converters (see
/// [`FieldExt`]).
pub trait Field: Send + Sync + Debug {
    /// Whether a stored null is a legitimate value of this field.
    fn smart_null(&self) -> bool {
        false
    }

    /// The value of an attribute that is neither stored nor assigned.
    fn get_default(&self, _ctx: &FieldContext<'_>) -> Marker<Value> {
        Marker::NotSet
    }

    /// Coerces or rejects a value on assignment.
    fn prepare_value(&self, _ctx: &FieldContext<'_>, value: Value) -> DocumentStoreResult<Value> {
        Ok(value)
    }

    /// Converts a materialized value into its wire form.
    fn to_store(&self, ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Bson>;

    /// Converts a wire value into its materialized form.
    fn from_store(&self, ctx: &FieldContext<'_>, raw: Bson) -> DocumentStoreResult<Value>;

    /// Synthesizes a plausible value for test fixtures.
    fn get_fake(
        &self,
        ctx: &FieldContext<'_>,
        _rng: &mut dyn RngCore,
        _depth: usize,
    ) -> DocumentStoreResult<Marker<Value>> {
        Ok(self.get_default(ctx))
    }

    /// Called when the attribute was excluded by a projection.
    fn get_if_not_loaded(&self, ctx: &FieldContext<'_>) -> DocumentStoreResult<Value> {
        Err(ctx.not_loaded())
    }

    /// Called when the attribute is absent and has no default.
    fn get_if_attribute_not_set(&self, ctx: &FieldContext<'_>) -> DocumentStoreResult<Value> {
        Err(ctx.not_set())
    }

    /// Finishes an assigned value when it is first read.
    ///
    /// Returns `None` if the value reads back as assigned.
    fn materialize(&self, _ctx: &FieldContext<'_>, _value: &Value) -> DocumentStoreResult<Option<Value>> {
        Ok(None)
    }

    /// Whether `value` equals the stored wire value `raw`, when that is known
    /// without converting `raw`. `None` compares against a full read instead.
    fn matches_raw(&self, _ctx: &FieldContext<'_>, _value: &Value, _raw: &Bson) -> Option<bool> {
        None
    }
}

/// Smart-null aware wrappers around the [`Field`] converters.
///
/// Automatically implemented for every field; the accessor and record
/// serialization only ever go through these.
pub trait FieldExt: Field {
    /// `from_store`, passing a stored null through untouched under smart null.
    fn load(&self, ctx: &FieldContext<'_>, raw: Bson) -> DocumentStoreResult<Value> {
        if self.smart_null() && raw == Bson::Null {
            return Ok(Value::null());
        }

        self.from_store(ctx, raw)
    }

    /// `to_store`, passing null through untouched under smart null.
    fn dump(&self, ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Bson> {
        if self.smart_null() && value.is_null() {
            return Ok(Bson::Null);
        }

        self.to_store(ctx, value)
    }

    /// `prepare_value`, accepting null untouched under smart null.
    fn prepare(&self, ctx: &FieldContext<'_>, value: Value) -> DocumentStoreResult<Value> {
        if self.smart_null() && value.is_null() {
            return Ok(value);
        }

        self.prepare_value(ctx, value)
    }
}

impl<F: Field + ?Sized> FieldExt for F {}

/// One field bound to one attribute of one schema.
#[derive(Debug, Clone)]
pub struct FieldAccessor {
    name: String,
    schema: String,
    field: Arc<dyn Field>,
}

impl FieldAccessor {
    pub(crate) fn new(name: String, schema: String, field: Arc<dyn Field>) -> Self {
        Self { name, schema, field }
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the schema the accessor belongs to.
    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    pub fn field(&self) -> &dyn Field {
        &*self.field
    }

    /// The hook context for this attribute on `document`.
    pub fn context<'a>(&'a self, document: &'a Document) -> FieldContext<'a> {
        FieldContext::new(document, &self.name)
    }

    /// Reads the effective value: changed, then cache, then raw, then default.
    pub fn get(&self, document: &Document) -> DocumentStoreResult<Value> {
        self.check_owner(document)?;
        let ctx = self.context(document);

        let raw = {
            let layers = document.layers();

            match layers.changed.get(&self.name) {
                Some(Marker::Present(value)) => Err(value.clone()),
                // deleted
                Some(Marker::NotSet | Marker::NotLoaded) => Ok(Some(Marker::NotSet)),
                None => match layers.cache.get(&self.name) {
                    Some(value) => return Ok(value.clone()),
                    None => Ok(layers.raw.get(&self.name).cloned()),
                },
            }
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(assigned) => return self.materialize(document, assigned),
        };

        match raw {
            Some(Marker::NotLoaded) => self.field.get_if_not_loaded(&ctx),
            Some(Marker::NotSet) => self.field.get_if_attribute_not_set(&ctx),
            Some(Marker::Present(raw)) => {
                let value = self.field.load(&ctx, raw)?;
                self.adopt(document, &value);

                document
                    .layers()
                    .cache
                    .insert(self.name.clone(), value.clone());

                Ok(value)
            }
            None => match self.field.get_default(&ctx) {
                Marker::Present(value) => {
                    self.adopt(document, &value);
                    document
                        .layers()
                        .changed
                        .insert(self.name.clone(), Marker::Present(value.clone()));

                    Ok(value)
                }
                Marker::NotSet | Marker::NotLoaded => self.field.get_if_attribute_not_set(&ctx),
            },
        }
    }

    /// Assigns a value.
    ///
    /// The value is prepared by the field and recorded only if it differs from the
    /// current effective value, in which case the change is propagated to the root
    /// document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Usage`] if `document` is not an instance of
    /// the accessor's schema, the field's validation error, or the error raised
    /// while reading the current value for comparison.
    pub fn set(&self, document: &Document, value: impl Into<Value>) -> DocumentStoreResult<()> {
        self.check_owner(document)?;
        let prepared = self.field.prepare(&self.context(document), value.into())?;

        self.write(document, Marker::Present(prepared))
    }

    /// Removes the attribute. The removal is recorded as a pending change.
    pub fn delete(&self, document: &Document) -> DocumentStoreResult<()> {
        self.check_owner(document)?;

        self.write(document, Marker::NotSet)
    }

    /// Returns `true` if the attribute holds a readable value without falling
    /// back to the default.
    pub fn is_set(&self, document: &Document) -> bool {
        let layers = document.layers();

        match layers.changed.get(&self.name) {
            Some(slot) => slot.is_present(),
            None => {
                layers.cache.contains_key(&self.name)
                    || matches!(layers.raw.get(&self.name), Some(Marker::Present(_)))
            }
        }
    }

    /// The wire form of the attribute for a full record, or `None` if the
    /// attribute is absent or was not loaded.
    pub(crate) fn dump(&self, document: &Document) -> DocumentStoreResult<Option<Bson>> {
        let ctx = self.context(document);

        let slot = {
            let layers = document.layers();

            match layers.changed.get(&self.name) {
                Some(slot) => Some(slot.clone()),
                None => match layers.cache.get(&self.name) {
                    Some(value) => Some(Marker::Present(value.clone())),
                    None => match layers.raw.get(&self.name) {
                        Some(Marker::Present(raw)) => return Ok(Some(raw.clone())),
                        Some(Marker::NotSet | Marker::NotLoaded) => return Ok(None),
                        None => None,
                    },
                },
            }
        };

        let value = match slot {
            Some(Marker::Present(value)) => value,
            Some(Marker::NotSet | Marker::NotLoaded) => return Ok(None),
            None => match self.field.get_default(&ctx) {
                Marker::Present(value) => value,
                Marker::NotSet | Marker::NotLoaded => return Ok(None),
            },
        };

        Ok(Some(self.field.dump(&ctx, &value)?))
    }

    /// The wire form of a materialized value.
    pub(crate) fn dump_value(&self, document: &Document, value: &Value) -> DocumentStoreResult<Bson> {
        self.field.dump(&self.context(document), value)
    }

    fn write(&self, document: &Document, value: Marker<Value>) -> DocumentStoreResult<()> {
        if self.is_current(document, &value)? {
            return Ok(());
        }

        if let Marker::Present(value) = &value {
            self.adopt(document, value);
        }
        document.layers().changed.insert(self.name.clone(), value);
        document.propagate_change();

        Ok(())
    }

    /// Whether `value` equals the effective value under read priority, without
    /// defaults.
    fn is_current(&self, document: &Document, value: &Marker<Value>) -> DocumentStoreResult<bool> {
        let current = {
            let layers = document.layers();

            match layers.changed.get(&self.name) {
                Some(Marker::Present(current)) => Ok(current.clone()),
                Some(slot) => return Ok(slot == value),
                None => match layers.cache.get(&self.name) {
                    Some(current) => Ok(current.clone()),
                    None => match layers.raw.get(&self.name) {
                        None | Some(Marker::NotSet) => return Ok(*value == Marker::NotSet),
                        Some(Marker::NotLoaded) => return Ok(*value == Marker::NotLoaded),
                        Some(Marker::Present(raw)) => Err(raw.clone()),
                    },
                },
            }
        };

        let Marker::Present(value) = value else {
            return Ok(false);
        };
        let ctx = self.context(document);

        match current {
            Ok(current) if *value == current => Ok(true),
            // a resolved reference and its bare identifier store the same value
            Ok(current) => Ok(self
                .field
                .dump(&ctx, &current)
                .ok()
                .and_then(|raw| self.field.matches_raw(&ctx, value, &raw))
                .unwrap_or(false)),
            Err(raw) => match self.field.matches_raw(&ctx, value, &raw) {
                Some(same) => Ok(same),
                None => Ok(*value == self.get(document)?),
            },
        }
    }

    /// Runs the field's first-read hook on an assigned value and keeps the
    /// result as the pending change.
    fn materialize(&self, document: &Document, assigned: Value) -> DocumentStoreResult<Value> {
        let Some(value) = self.field.materialize(&self.context(document), &assigned)? else {
            return Ok(assigned);
        };

        if let Some(slot) = document.layers().changed.get_mut(&self.name) {
            if slot.is_present() {
                *slot = Marker::Present(value.clone());
            }
        }

        Ok(value)
    }

    /// Links an embedded document value back to the attribute holding it.
    fn adopt(&self, document: &Document, value: &Value) {
        if let Value::Document(nested) = value {
            if nested.schema().is_embedded() {
                nested.bind_parent(document, &self.name);
            }
        }
    }

    fn check_owner(&self, document: &Document) -> DocumentStoreResult<()> {
        if document.schema().name() != self.schema {
            return Err(DocumentStoreError::Usage(format!(
                "field {}.{} cannot be accessed on a {} document",
                self.schema,
                self.name,
                document.schema().name()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use bson::doc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingField {
        loads: Arc<AtomicUsize>,
    }

    impl Field for CountingField {
        fn to_store(&self, _ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Bson> {
            Ok(value.as_bson().cloned().unwrap_or(Bson::Null))
        }

        fn from_store(&self, _ctx: &FieldContext<'_>, raw: Bson) -> DocumentStoreResult<Value> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Bson(raw))
        }
    }

    #[test]
    fn raw_values_are_converted_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let schema = Schema::builder("Counted")
            .field("n", CountingField { loads: loads.clone() })
            .build();
        let document = Document::from_record(&schema, doc! { "n": 3 }, None, None, None);

        assert_eq!(document.get("n").unwrap().as_i64(), Some(3));
        assert_eq!(document.get("n").unwrap().as_i64(), Some(3));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!document.is_changed());
    }

    #[test]
    fn projected_out_fields_are_not_loaded() {
        let schema = Schema::builder("R")
            .collection("rdocs")
            .field("i", ScalarField::integer())
            .field("s", ScalarField::string())
            .build();
        let document = Document::from_record(
            &schema,
            doc! { "i": 1 },
            Some(&doc! { "i": true }),
            None,
            None,
        );

        assert_eq!(document.get("i").unwrap().as_i64(), Some(1));
        assert!(matches!(
            document.get("s"),
            Err(DocumentStoreError::NotLoaded { .. })
        ));
    }

    #[test]
    fn missing_fields_without_default_are_not_set() {
        let schema = Schema::builder("R")
            .collection("rdocs")
            .field("i", ScalarField::integer())
            .build();
        let document = Document::from_record(&schema, doc! {}, None, None, None);

        assert!(matches!(
            document.get("i"),
            Err(DocumentStoreError::AttributeNotSet { .. })
        ));
        assert!(!document.is_changed());
    }

    #[test]
    fn defaults_are_materialized_into_changed() {
        let schema = Schema::builder("R")
            .collection("rdocs")
            .field("i", ScalarField::integer().with_default(42))
            .build();
        let document = Document::new(&schema);

        assert_eq!(document.get("i").unwrap().as_i64(), Some(42));
        assert_eq!(document.changed_fields(), vec!["i".to_string()]);
    }

    #[test]
    fn equal_writes_do_not_mark_changes() {
        let schema = Schema::builder("R")
            .collection("rdocs")
            .field("i", ScalarField::integer())
            .build();
        let document = Document::from_record(&schema, doc! { "i": 5i64 }, None, None, None);

        document.set("i", 5).unwrap();
        assert!(!document.is_changed());

        document.set("i", 6).unwrap();
        assert_eq!(document.changed_fields(), vec!["i".to_string()]);
        assert_eq!(document.get("i").unwrap().as_i64(), Some(6));
    }

    #[test]
    fn unreadable_stored_values_fail_writes() {
        let schema = Schema::builder("R").field("i", ScalarField::integer()).build();
        let document = Document::from_record(&schema, doc! { "i": "many" }, None, None, None);

        assert!(matches!(
            document.set("i", 5),
            Err(DocumentStoreError::Serialization(_))
        ));
        assert!(!document.is_changed());

        document.delete("i").unwrap();
        document.set("i", 5).unwrap();
        assert_eq!(document.get("i").unwrap().as_i64(), Some(5));
    }

    #[test]
    fn delete_is_an_explicit_change() {
        let schema = Schema::builder("R")
            .collection("rdocs")
            .field("i", ScalarField::integer())
            .build();
        let document = Document::from_record(&schema, doc! { "i": 5 }, None, None, None);

        document.delete("i").unwrap();

        assert!(document.is_changed());
        assert!(matches!(
            document.get("i"),
            Err(DocumentStoreError::AttributeNotSet { .. })
        ));
        assert_eq!(document.to_record().unwrap().get("i"), None);
    }

    #[test]
    fn accessor_rejects_foreign_documents() {
        let left = Schema::builder("Left").field("i", ScalarField::integer()).build();
        let right = Schema::builder("Right").field("i", ScalarField::integer()).build();
        let document = Document::new(&right);

        let accessor = left.accessor("i").unwrap();
        assert!(matches!(
            accessor.set(&document, 1),
            Err(DocumentStoreError::Usage(_))
        ));
    }

    #[test]
    fn validation_errors_leave_layers_untouched() {
        let schema = Schema::builder("R").field("i", ScalarField::integer()).build();
        let document = Document::new(&schema);

        assert!(matches!(
            document.set("i", "not a number"),
            Err(DocumentStoreError::Validation { .. })
        ));
        assert!(!document.is_changed());
    }
}
