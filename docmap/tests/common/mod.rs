#![allow(dead_code)]

use async_trait::async_trait;
use futures::{future, task::AtomicWaker};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::Poll,
};

use docmap::{
    backend::{FindSpec, StoreBackend, UpdateResult},
    memory::InMemoryStore,
    prelude::*,
};

/// Wraps a store and counts the finds that reach it.
#[derive(Debug, Clone, Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    finds: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.finds.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for CountingStore {
    async fn insert_documents(&self, documents: Vec<Record>, collection: &str) -> DocumentStoreResult<()> {
        self.inner.insert_documents(documents, collection).await
    }

    async fn find_documents(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Vec<Record>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_documents(spec, collection).await
    }

    async fn find_one_document(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Option<Record>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_one_document(spec, collection).await
    }

    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult> {
        self.inner
            .update_documents(criteria, update, multi, upsert, collection)
            .await
    }

    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.count_documents(criteria, collection).await
    }

    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.remove_documents(criteria, collection).await
    }
}

#[derive(Debug, Default)]
struct Gate {
    closed: AtomicBool,
    waker: AtomicWaker,
}

/// Counts finds like [`CountingStore`], and holds them back while closed.
#[derive(Debug, Clone, Default)]
pub struct GatedStore {
    inner: CountingStore,
    gate: Arc<Gate>,
}

impl GatedStore {
    pub fn finds(&self) -> usize {
        self.inner.finds()
    }

    pub fn reset(&self) {
        self.inner.reset();
    }

    pub fn close(&self) {
        self.gate.closed.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.gate.closed.store(false, Ordering::SeqCst);
        self.gate.waker.wake();
    }

    async fn pass(&self) {
        future::poll_fn(|cx| {
            self.gate.waker.register(cx.waker());

            if self.gate.closed.load(Ordering::SeqCst) {
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await
    }
}

#[async_trait]
impl StoreBackend for GatedStore {
    async fn insert_documents(&self, documents: Vec<Record>, collection: &str) -> DocumentStoreResult<()> {
        self.inner.insert_documents(documents, collection).await
    }

    async fn find_documents(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Vec<Record>> {
        self.inner.finds.fetch_add(1, Ordering::SeqCst);
        self.pass().await;
        self.inner.inner.find_documents(spec, collection).await
    }

    async fn find_one_document(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Option<Record>> {
        self.inner.finds.fetch_add(1, Ordering::SeqCst);
        self.pass().await;
        self.inner.inner.find_one_document(spec, collection).await
    }

    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult> {
        self.inner
            .update_documents(criteria, update, multi, upsert, collection)
            .await
    }

    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.count_documents(criteria, collection).await
    }

    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.remove_documents(criteria, collection).await
    }
}

/// `R` documents hold one integer; `D` documents reference one `R`.
pub struct Schemas {
    pub r: Arc<Schema>,
    pub d: Arc<Schema>,
}

pub fn schemas() -> Schemas {
    let r = Schema::builder("R")
        .collection("rdocs")
        .field("i", ScalarField::integer())
        .build();
    let d = Schema::builder("D")
        .collection("ddocs")
        .field("r", ReferenceField::new(&r))
        .build();

    Schemas { r, d }
}

pub fn database(store: impl StoreBackend + 'static, mode: Mode, schemas: &Schemas) -> Database {
    Database::builder(store)
        .mode(mode)
        .schema(&schemas.r)
        .schema(&schemas.d)
        .build()
}
