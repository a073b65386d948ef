//! Typed, lazily-resolved attribute access over schemaless document stores.
//!
//! This crate is the core of the docmap project and provides:
//!
//! - **Schemas** ([`schema`]) - Runtime document types and the registry resolving them by name
//! - **Fields** ([`field`]) - The field contract and the per-attribute access protocol
//! - **Documents** ([`document`]) - Instances with raw, cache and changed storage layers
//! - **References** ([`reference`]) - Cross-document references, resolved on demand and cached per query
//! - **Query sets** ([`queryset`]) - Lazy, copy-on-modify queries over one collection
//! - **Criteria builders** ([`query`]) - Typed filter expressions and their translation
//! - **Lookups** ([`lookup`]) - Immediate and deferred execution of store operations
//! - **Database handle** ([`database`]) - Binds a backend, an execution mode and a schema registry
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Error handling** ([`error`]) - Comprehensive error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmap::{memory::InMemoryStore, prelude::*};
//!
//! let rdocs = Schema::builder("R")
//!     .collection("rdocs")
//!     .field("i", ScalarField::integer())
//!     .build();
//! let docs = Schema::builder("D")
//!     .collection("docs")
//!     .field("r", ReferenceField::new(&rdocs))
//!     .build();
//!
//! let db = Database::builder(InMemoryStore::new()).immediate().build();
//!
//! let r = Document::new(&rdocs);
//! r.set("i", 13)?;
//! db.insert(&r).wait()?;
//!
//! let d = Document::new(&docs);
//! d.set("r", &r)?;
//! db.insert(&d).wait()?;
//!
//! let d = db.queryset(&docs).with_id(d.id().unwrap()).wait()?.unwrap();
//! let r = d.get("r")?;
//! assert_eq!(r.as_document().unwrap().get("i")?.as_i64(), Some(13));
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_core;

pub mod backend;
pub mod database;
pub mod document;
pub mod error;
pub mod field;
pub mod lookup;
pub mod marker;
pub mod query;
pub mod queryset;
pub mod reference;
pub mod schema;
pub mod value;
