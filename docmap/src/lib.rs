//! Main docmap crate providing typed attribute access over schemaless document stores.
//!
//! This crate is the primary entry point for users of the docmap framework.
//! It re-exports the core types and functionality from various sub-crates and provides
//! convenient access to different storage backends.
//!
//! # Features
//!
//! - **Runtime schemas** - Declare document types as named fields with conversion rules
//! - **Lazy references** - Reference fields resolve on first access and are cached per query
//! - **Lazy query sets** - Refine queries freely; nothing touches the store until materialized
//! - **Immediate or deferred** - Block on every lookup, or get futures back and await them
//! - **Multiple backends** - In-memory and MongoDB storage behind one backend trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let authors = Schema::builder("Author")
//!         .collection("authors")
//!         .field("name", ScalarField::string())
//!         .build();
//!     let books = Schema::builder("Book")
//!         .collection("books")
//!         .field("title", ScalarField::string())
//!         .field("author", ReferenceField::new(&authors))
//!         .build();
//!
//!     let db = Database::builder(InMemoryStore::new())
//!         .deferred()
//!         .schema(&authors)
//!         .schema(&books)
//!         .build();
//!
//!     let author = Document::new(&authors);
//!     author.set("name", "Ursula")?;
//!     db.insert(&author).await?;
//!
//!     let book = Document::new(&books);
//!     book.set("title", "The Dispossessed")?;
//!     book.set("author", &author)?;
//!     db.insert(&book).await?;
//!
//!     for book in db.queryset(&books).fetch().await? {
//!         // Deferred databases hand back a handle that resolves the reference once.
//!         let handle = book.get("author")?;
//!         let author = handle.as_reference().unwrap().get().await?;
//!         println!("{} by {}", book.get("title")?.as_str().unwrap(), author.get("name")?.as_str().unwrap());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmap_core::{
    backend, database, document, error, field, lookup, marker, query, queryset, reference, schema, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmap_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmap_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
