use bson::Bson;
use rand::RngCore;
use std::sync::Arc;

use crate::{
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldContext, MAX_FAKE_DEPTH},
    marker::Marker,
    schema::Schema,
    value::Value,
};

/// A field holding a nested document of an embedded schema.
///
/// The nested document is stored inline as a sub-record. Changes made through
/// the nested document are propagated to the document that holds it.
#[derive(Debug, Clone)]
pub struct EmbeddedField {
    schema: Arc<Schema>,
    smart_null: bool,
    auto_create: bool,
}

impl EmbeddedField {
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: schema.clone(),
            smart_null: false,
            auto_create: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.smart_null = true;
        self
    }

    /// Creates an empty nested document when the attribute is absent.
    pub fn auto_create(mut self) -> Self {
        self.auto_create = true;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn nested(&self, ctx: &FieldContext<'_>, record: bson::Document) -> Document {
        let owner = ctx.document();

        Document::from_record(
            &self.schema,
            record,
            None,
            owner.database(),
            owner.reference_cache(),
        )
    }
}

impl Field for EmbeddedField {
    fn smart_null(&self) -> bool {
        self.smart_null
    }

    fn get_default(&self, ctx: &FieldContext<'_>) -> Marker<Value> {
        if self.auto_create {
            Marker::Present(Value::Document(self.nested(ctx, bson::Document::new())))
        } else if self.smart_null {
            Marker::Present(Value::null())
        } else {
            Marker::NotSet
        }
    }

    fn prepare_value(&self, ctx: &FieldContext<'_>, value: Value) -> DocumentStoreResult<Value> {
        match value {
            Value::Document(document) if document.schema().name() == self.schema.name() => {
                Ok(Value::Document(document))
            }
            Value::Document(document) => Err(ctx.invalid(format!(
                "expected a {} document, got {}",
                self.schema.name(),
                document.schema().name()
            ))),
            Value::Bson(Bson::Document(record)) => Ok(Value::Document(self.nested(ctx, record))),
            _ => Err(ctx.invalid(format!("expected a {} document", self.schema.name()))),
        }
    }

    fn to_store(&self, ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Bson> {
        match value {
            Value::Document(document) => Ok(Bson::Document(document.to_record()?)),
            _ => Err(ctx.invalid(format!("expected a {} document", self.schema.name()))),
        }
    }

    fn from_store(&self, ctx: &FieldContext<'_>, raw: Bson) -> DocumentStoreResult<Value> {
        match raw {
            Bson::Document(record) => Ok(Value::Document(self.nested(ctx, record))),
            other => Err(DocumentStoreError::Serialization(format!(
                "{}.{}: expected a sub-document, got {other}",
                ctx.document().schema().name(),
                ctx.name()
            ))),
        }
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

        let nested = Document::fake(&self.schema, rng, depth + 1)?;

        Ok(Marker::Present(Value::Document(nested)))
    }
}
