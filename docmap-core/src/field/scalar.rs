use bson::{Bson, DateTime, oid::ObjectId};
use chrono::{TimeDelta, Utc};
use rand::{Rng, RngCore, distributions::Alphanumeric};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldContext},
    marker::Marker,
    value::Value,
};

/// The wire type of a [`ScalarField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    /// Stored as a 64-bit integer.
    Integer,
    Float,
    String,
    ObjectId,
    Datetime,
}

/// A field holding a single BSON scalar.
///
/// Values are coerced to the field's [`ScalarKind`] on assignment and on load,
/// so `13`, `13i64` and `"13"` all end up as the same stored integer.
///
/// # Example
///
/// ```ignore
/// let schema = Schema::builder("Counter")
///     .field("hits", ScalarField::integer().with_default(0))
///     .field("label", ScalarField::string().nullable())
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ScalarField {
    kind: ScalarKind,
    smart_null: bool,
    default: Option<Bson>,
}

impl ScalarField {
    pub fn new(kind: ScalarKind) -> Self {
        Self {
            kind,
            smart_null: false,
            default: None,
        }
    }

    pub fn boolean() -> Self {
        Self::new(ScalarKind::Bool)
    }

    pub fn integer() -> Self {
        Self::new(ScalarKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(ScalarKind::Float)
    }

    pub fn string() -> Self {
        Self::new(ScalarKind::String)
    }

    pub fn object_id() -> Self {
        Self::new(ScalarKind::ObjectId)
    }

    pub fn datetime() -> Self {
        Self::new(ScalarKind::Datetime)
    }

    /// Treats a stored null as a legitimate value; null becomes the default
    /// unless one is configured.
    pub fn nullable(mut self) -> Self {
        self.smart_null = true;
        self
    }

    /// Sets the static default value.
    pub fn with_default(mut self, default: impl Into<Bson>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    fn coerce(&self, value: Bson) -> Result<Bson, String> {
        let coerced = match (self.kind, value) {
            (ScalarKind::Bool, Bson::Boolean(value)) => Bson::Boolean(value),
            (ScalarKind::Bool, Bson::Int32(value)) => Bson::Boolean(value != 0),
            (ScalarKind::Bool, Bson::Int64(value)) => Bson::Boolean(value != 0),

            (ScalarKind::Integer, Bson::Int64(value)) => Bson::Int64(value),
            (ScalarKind::Integer, Bson::Int32(value)) => Bson::Int64(value as i64),
            // i64::MAX as f64 is 2^63, which is already out of range
            (ScalarKind::Integer, Bson::Double(value))
                if value.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&value) =>
            {
                Bson::Int64(value as i64)
            }
            (ScalarKind::Integer, Bson::String(value)) => Bson::Int64(
                value
                    .trim()
                    .parse()
                    .map_err(|_| format!("{value:?} is not an integer"))?,
            ),

            (ScalarKind::Float, Bson::Double(value)) => Bson::Double(value),
            (ScalarKind::Float, Bson::Int32(value)) => Bson::Double(value as f64),
            (ScalarKind::Float, Bson::Int64(value)) => Bson::Double(value as f64),
            (ScalarKind::Float, Bson::String(value)) => Bson::Double(
                value
                    .trim()
                    .parse()
                    .map_err(|_| format!("{value:?} is not a number"))?,
            ),

            (ScalarKind::String, Bson::String(value)) => Bson::String(value),

            (ScalarKind::ObjectId, Bson::ObjectId(value)) => Bson::ObjectId(value),
            (ScalarKind::ObjectId, Bson::String(value)) => Bson::ObjectId(
                ObjectId::parse_str(&value).map_err(|_| format!("{value:?} is not an object id"))?,
            ),

            (ScalarKind::Datetime, Bson::DateTime(value)) => Bson::DateTime(value),
            (ScalarKind::Datetime, Bson::Int64(millis)) => Bson::DateTime(DateTime::from_millis(millis)),
            (ScalarKind::Datetime, Bson::String(value)) => Bson::DateTime(DateTime::from_chrono(
                chrono::DateTime::parse_from_rfc3339(&value)
                    .map_err(|err| format!("{value:?} is not an RFC 3339 timestamp: {err}"))?,
            )),

            (kind, Bson::Null) => return Err(format!("null is not a valid {kind:?}")),
            (kind, other) => return Err(format!("{other} is not a valid {kind:?}")),
        };

        Ok(coerced)
    }
}

impl Field for ScalarField {
    fn smart_null(&self) -> bool {
        self.smart_null
    }

    fn get_default(&self, _ctx: &FieldContext<'_>) -> Marker<Value> {
        match &self.default {
            Some(default) => Marker::Present(Value::Bson(default.clone())),
            None if self.smart_null => Marker::Present(Value::null()),
            None => Marker::NotSet,
        }
    }

    fn prepare_value(&self, ctx: &FieldContext<'_>, value: Value) -> DocumentStoreResult<Value> {
        match value {
            Value::Bson(bson) => self
                .coerce(bson)
                .map(Value::Bson)
                .map_err(|message| ctx.invalid(message)),
            _ => Err(ctx.invalid(format!("expected a {:?} scalar", self.kind))),
        }
    }

    fn to_store(&self, ctx: &FieldContext<'_>, value: &Value) -> DocumentStoreResult<Bson> {
        match value {
            Value::Bson(bson) => Ok(bson.clone()),
            _ => Err(ctx.invalid(format!("expected a {:?} scalar", self.kind))),
        }
    }

    fn from_store(&self, ctx: &FieldContext<'_>, raw: Bson) -> DocumentStoreResult<Value> {
        self.coerce(raw).map(Value::Bson).map_err(|message| {
            DocumentStoreError::Serialization(format!(
                "{}.{}: {message}",
                ctx.document().schema().name(),
                ctx.name()
            ))
        })
    }

    fn get_fake(
        &self,
        _ctx: &FieldContext<'_>,
        rng: &mut dyn RngCore,
        _depth: usize,
    ) -> DocumentStoreResult<Marker<Value>> {
        let fake = match self.kind {
            ScalarKind::Bool => Bson::Boolean(rng.gen_bool(0.5)),
            ScalarKind::Integer => Bson::Int64(rng.gen_range(0..10_000)),
            ScalarKind::Float => Bson::Double(rng.gen_range(0.0..10_000.0)),
            ScalarKind::String => Bson::String(
                (0..rng.gen_range(4..16))
                    .map(|_| char::from(rng.sample(Alphanumeric)))
                    .collect(),
            ),
            ScalarKind::ObjectId => Bson::ObjectId(ObjectId::new()),
            ScalarKind::Datetime => Bson::DateTime(DateTime::from_chrono(
                Utc::now() - TimeDelta::seconds(rng.gen_range(0..31_536_000)),
            )),
        };

        Ok(Marker::Present(Value::Bson(fake)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{document::Document, field::FieldExt, schema::Schema};
    use rand::{SeedableRng, rngs::StdRng};

    fn with_ctx<T>(field: ScalarField, f: impl FnOnce(&ScalarField, &FieldContext<'_>) -> T) -> T {
        let schema = Schema::builder("Scalar").field("value", field.clone()).build();
        let document = Document::new(&schema);
        let ctx = FieldContext::new(&document, "value");

        f(&field, &ctx)
    }

    #[test]
    fn integers_are_normalized() {
        with_ctx(ScalarField::integer(), |field, ctx| {
            for input in [Value::from(13), Value::from(13i64), Value::from(13.0), Value::from("13")] {
                assert_eq!(field.prepare(ctx, input).unwrap(), Value::from(13i64));
            }
            assert!(field.prepare(ctx, Value::from(1.5)).is_err());
        });
    }

    #[test]
    fn integers_out_of_range_are_rejected() {
        with_ctx(ScalarField::integer(), |field, ctx| {
            for input in [1e300, -1e300, 9_223_372_036_854_775_808.0, f64::INFINITY, f64::NAN] {
                assert!(matches!(
                    field.prepare(ctx, Value::from(input)),
                    Err(DocumentStoreError::Validation { .. })
                ));
            }
            assert_eq!(
                field.prepare(ctx, Value::from(-9_223_372_036_854_775_808.0)).unwrap(),
                Value::from(i64::MIN)
            );
        });
    }

    #[test]
    fn round_trip_is_stable() {
        let oid = ObjectId::new();
        let cases = [
            (ScalarField::boolean(), Value::from(true)),
            (ScalarField::integer(), Value::from(7i64)),
            (ScalarField::float(), Value::from(2.5)),
            (ScalarField::string(), Value::from("seven")),
            (ScalarField::object_id(), Value::from(oid)),
            (ScalarField::datetime(), Value::from(DateTime::from_millis(1_700_000_000_000))),
        ];

        for (field, value) in cases {
            with_ctx(field, |field, ctx| {
                let stored = field.dump(ctx, &value).unwrap();
                assert_eq!(field.load(ctx, stored).unwrap(), value);
            });
        }
    }

    #[test]
    fn smart_null_bypasses_conversion() {
        with_ctx(ScalarField::integer().nullable(), |field, ctx| {
            assert_eq!(field.load(ctx, Bson::Null).unwrap(), Value::null());
            assert_eq!(field.dump(ctx, &Value::null()).unwrap(), Bson::Null);
            assert_eq!(field.prepare(ctx, Value::null()).unwrap(), Value::null());
            assert_eq!(field.get_default(ctx), Marker::Present(Value::null()));
        });
    }

    #[test]
    fn null_is_rejected_without_smart_null() {
        with_ctx(ScalarField::integer(), |field, ctx| {
            assert!(matches!(
                field.prepare(ctx, Value::null()),
                Err(DocumentStoreError::Validation { .. })
            ));
            assert_eq!(field.get_default(ctx), Marker::NotSet);
        });
    }

    #[test]
    fn fakes_match_the_kind() {
        let mut rng = StdRng::seed_from_u64(7);

        with_ctx(ScalarField::string(), |field, ctx| {
            let fake = field.get_fake(ctx, &mut rng, 0).unwrap().present().unwrap();
            assert!(field.prepare(ctx, fake).is_ok());
        });
    }
}
