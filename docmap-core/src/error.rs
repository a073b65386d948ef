//! Error types and result types for document mapping operations.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`].
//! The error type is `Clone` because a single pending reference lookup may be
//! awaited by several handles, each of which receives the same outcome.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while mapping documents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// The document violates structural constraints.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// No stored document matched a lookup that was required to succeed.
    /// The first argument is the criteria, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The attribute was excluded by a projection and therefore never loaded.
    #[error("Field {field} of {document} was not loaded")]
    NotLoaded {
        /// Name of the field.
        field: String,
        /// Schema name of the owning document.
        document: String,
    },
    /// The attribute was never stored and has no default.
    #[error("Field {field} of {document} is not set")]
    AttributeNotSet {
        /// Name of the field.
        field: String,
        /// Schema name of the owning document.
        document: String,
    },
    /// The API was used in a way that can never succeed.
    #[error("Usage error: {0}")]
    Usage(String),
    /// A reference was resolved on a document that has no database.
    #[error("Cannot resolve reference {field} of {document}: document is not bound to a database")]
    NotBound {
        /// Name of the reference field.
        field: String,
        /// Schema name of the owning document.
        document: String,
    },
    /// A reference points to a document that does not exist.
    #[error("Broken reference to {id} in collection {collection}")]
    BrokenReference {
        /// Collection of the referenced schema.
        collection: String,
        /// The dangling identifier.
        id: String,
    },
    /// A value was rejected while being assigned to a field.
    #[error("Invalid value for field {field}: {message}")]
    Validation {
        /// Name of the field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// The schema has no field with the given name.
    #[error("Unknown field {field} on {document}")]
    UnknownField {
        /// Requested field name.
        field: String,
        /// Schema name.
        document: String,
    },
    /// No schema is registered under the given name.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),
}

/// A specialized `Result` type for document mapping operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
