//! Convenient re-exports of commonly used types from docmap.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmap::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schemas, fields and documents
//! - References and their cache
//! - Query sets, lookups and the database handle
//! - Criteria builders
//! - Store backends and error types

pub use docmap_core::{
    backend::{FindSpec, StoreBackend, StoreBackendBuilder, UpdateResult},
    database::{Database, DatabaseBuilder, DatabaseOptions},
    document::{Document, Record},
    error::{DocumentStoreError, DocumentStoreResult},
    field::{EmbeddedField, Field, FieldAccessor, FieldContext, FieldExt, ScalarField, ScalarKind},
    lookup::{Lookup, Mode},
    marker::Marker,
    query::{Expr, FieldOp, Filter, QueryVisitor, Sort, SortDirection},
    queryset::{Cursor, QuerySet},
    reference::{ReferenceCache, ReferenceField, ReferenceHandle, ReferenceTarget},
    schema::{ID_FIELD, Schema, SchemaBuilder, SchemaRegistry},
    value::Value,
};
