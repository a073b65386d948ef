//! In-memory document storage backend for docmap.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Schemaless storage** - Stores records as BSON documents in insertion order
//! - **Query support** - Evaluates the common subset of MongoDB criteria, with
//!   projection, multi-key sorting, skip and limit
//! - **Update operators** - `$set`, `$unset`, `$inc`, whole-record replacement and upserts
//! - **Runtime agnostic** - Works under any executor, including the blocking executor
//!   used by immediate-mode databases
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::prelude::*;
//! use docmap::memory::InMemoryStore;
//!
//! let users = Schema::builder("User")
//!     .collection("users")
//!     .field("name", ScalarField::string())
//!     .build();
//!
//! let db = Database::builder(InMemoryStore::new()).immediate().build();
//!
//! let user = Document::new(&users);
//! user.set("name", "Alice")?;
//! db.insert(&user).wait()?;
//!
//! assert_eq!(db.queryset(&users).count().wait()?, 1);
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
