//! Materialized attribute values.

use bson::{Bson, DateTime, oid::ObjectId};

use crate::{document::Document, reference::ReferenceHandle};

/// The value of an attribute after conversion from its wire form.
///
/// Scalars and bare identifiers stay BSON. Embedded documents and resolved
/// references are [`Document`] handles. A reference resolved under deferred mode
/// is a [`ReferenceHandle`] until it is awaited.
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar, a bare identifier or a stored null.
    Bson(Bson),
    /// An embedded document or a resolved reference.
    Document(Document),
    /// A reference that has not been awaited yet.
    Reference(ReferenceHandle),
}

impl Value {
    /// The null value.
    pub fn null() -> Self {
        Value::Bson(Bson::Null)
    }

    /// Returns `true` for a stored null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Bson(Bson::Null))
    }

    pub fn as_bson(&self) -> Option<&Bson> {
        match self {
            Value::Bson(bson) => Some(bson),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceHandle> {
        match self {
            Value::Reference(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bson(Bson::Int64(value)) => Some(*value),
            Value::Bson(Bson::Int32(value)) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bson(Bson::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bson(Bson::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bson(Bson::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    /// The identifier this value stands for when used as a reference.
    pub fn identifier(&self) -> Option<Bson> {
        match self {
            Value::Bson(Bson::Null) => None,
            Value::Bson(bson) => Some(bson.clone()),
            Value::Document(document) => document.id(),
            Value::Reference(handle) => Some(handle.id().clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bson(left), Value::Bson(right)) => left == right,
            (Value::Document(left), Value::Document(right)) => left == right,
            (Value::Reference(handle), other) | (other, Value::Reference(handle)) => {
                other.identifier().as_ref() == Some(handle.id())
            }
            _ => false,
        }
    }
}

impl From<Bson> for Value {
    fn from(value: Bson) -> Self {
        Value::Bson(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

impl From<&Document> for Value {
    fn from(value: &Document) -> Self {
        Value::Document(value.clone())
    }
}

impl From<ReferenceHandle> for Value {
    fn from(value: ReferenceHandle) -> Self {
        Value::Reference(value)
    }
}

macro_rules! impl_from_bson {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Bson(Bson::from(value))
                }
            }
        )*
    };
}

impl_from_bson!(i32, i64, f64, bool, &str, String, ObjectId, DateTime);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_convert_to_bson() {
        assert_eq!(Value::from(5i64).as_i64(), Some(5));
        assert_eq!(Value::from(5i32).as_i64(), Some(5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
    }

    #[test]
    fn null_has_no_identifier() {
        let id = ObjectId::new();

        assert_eq!(Value::null().identifier(), None);
        assert_eq!(Value::from(id).identifier(), Some(Bson::ObjectId(id)));
    }
}
