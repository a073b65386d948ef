//! In-memory storage implementation for document stores.
//!
//! This module provides a simple backend that keeps each collection as a vector of
//! BSON records behind an async-aware read-write lock.

use async_trait::async_trait;
use bson::{Bson, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::trace;

use docmap_core::{
    backend::{FindSpec, StoreBackend, StoreBackendBuilder, UpdateResult},
    document::{Record, projects},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Sort, SortDirection},
    schema::ID_FIELD,
};

use crate::evaluator::{Comparable, RecordEvaluator, is_operator_document, lookup_path};

type StoreMap = HashMap<String, Vec<Record>>;

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait on top of plain vectors of
/// records. Insertion order is preserved, so finds without sort keys return records
/// in the order they were inserted.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all records in a collection (no indexing). For small to medium
/// datasets this is typically acceptable. For larger datasets, consider using a
/// persistent backend like MongoDB.
///
/// # Example
///
/// ```ignore
/// use docmap_memory::InMemoryStore;
/// use docmap::backend::{FindSpec, StoreBackend};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store.insert_documents(vec![doc! { "_id": 1, "name": "Alice" }], "users").await?;
///
///     let found = store.find_documents(FindSpec::new(doc! { "name": "Alice" }), "users").await?;
///     assert_eq!(found.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> records in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns the names of the collections holding at least one record.
    pub async fn collections(&self) -> Vec<String> {
        let store = self.store.read().await;
        let mut names = store
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();

        names.sort();
        names
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(&self, documents: Vec<Record>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let records = store
            .entry(collection.to_string())
            .or_default();

        for (index, document) in documents.iter().enumerate() {
            let id = document.get(ID_FIELD).ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!("Record without {ID_FIELD} in collection {collection}"))
            })?;

            if position_of(records, id).is_some() || position_of(&documents[..index], id).is_some() {
                return Err(DocumentStoreError::Backend(format!(
                    "Duplicate key {id} in collection {collection}"
                )));
            }
        }

        trace!(collection, count = documents.len(), "inserting records");
        records.extend(documents);

        Ok(())
    }

    async fn find_documents(&self, spec: FindSpec, collection: &str) -> DocumentStoreResult<Vec<Record>> {
        let store = self.store.read().await;
        let Some(records) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = RecordEvaluator::filter_records(records, &spec.criteria)?;

        if !spec.sort.is_empty() {
            sort_records(&mut matched, &spec.sort);
        }

        let skip = usize::try_from(spec.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match spec.limit {
            Some(0) | None => usize::MAX,
            Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
        };

        let found = matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|record| match &spec.projection {
                Some(projection) => project(record, projection),
                None => record.clone(),
            })
            .collect::<Vec<_>>();

        trace!(collection, criteria = %spec.criteria, count = found.len(), "found records");

        Ok(found)
    }

    async fn update_documents(
        &self,
        criteria: Record,
        update: Record,
        multi: bool,
        upsert: bool,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult> {
        let update = Update::parse(update)?;
        let mut store = self.store.write().await;
        let records = store
            .entry(collection.to_string())
            .or_default();

        let mut result = UpdateResult::default();

        for record in records.iter_mut() {
            if !RecordEvaluator::new(record).matches(&criteria)? {
                continue;
            }

            result.matched += 1;

            let updated = update.apply(record)?;

            if updated != *record {
                *record = updated;
                result.modified += 1;
            }

            if !multi {
                break;
            }
        }

        if result.matched == 0 && upsert {
            let mut seed = criteria
                .iter()
                .filter(|(key, value)| !key.starts_with('$') && !is_operator_document(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Record>();

            seed = update.apply(&seed)?;

            let id = match seed.get(ID_FIELD) {
                Some(id) => id.clone(),
                None => {
                    let id = Bson::ObjectId(ObjectId::new());
                    seed.insert(ID_FIELD, id.clone());
                    id
                }
            };

            records.push(seed);
            result.upserted_id = Some(id);
        }

        trace!(collection, criteria = %criteria, matched = result.matched, modified = result.modified, "updated records");

        Ok(result)
    }

    async fn count_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        match store.get(collection) {
            Some(records) => Ok(RecordEvaluator::filter_records(records, &criteria)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn remove_documents(&self, criteria: Record, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(records) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut kept = Vec::with_capacity(records.len());
        let mut removed = 0;

        for record in records.drain(..) {
            if RecordEvaluator::new(&record).matches(&criteria)? {
                removed += 1;
            } else {
                kept.push(record);
            }
        }

        *records = kept;
        trace!(collection, criteria = %criteria, removed, "removed records");

        Ok(removed)
    }
}

fn position_of(records: &[Record], id: &Bson) -> Option<usize> {
    let id = Comparable::from(id);

    records
        .iter()
        .position(|record| Comparable::from(record.get(ID_FIELD)) == id)
}

fn sort_records(records: &mut [&Record], keys: &[Sort]) {
    records.sort_by(|left, right| {
        for key in keys {
            let ordering = Comparable::from(lookup_path(left, &key.field))
                .sort_cmp(&Comparable::from(lookup_path(right, &key.field)));

            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };

            if ordering.is_ne() {
                return ordering;
            }
        }

        std::cmp::Ordering::Equal
    });
}

fn project(record: &Record, projection: &Record) -> Record {
    record
        .iter()
        .filter(|(key, _)| projects(projection, key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// A parsed update document.
enum Update {
    /// Operator updates in the order they were given.
    Operators(Vec<(String, Record)>),
    /// A whole-record replacement.
    Replace(Record),
}

impl Update {
    fn parse(update: Record) -> DocumentStoreResult<Self> {
        let operators = update.keys().filter(|key| key.starts_with('$')).count();

        if operators == 0 {
            return Ok(Update::Replace(update));
        }

        if operators != update.len() {
            return Err(DocumentStoreError::Backend(
                "Update mixes operators and replacement fields".to_string(),
            ));
        }

        update
            .into_iter()
            .map(|(operator, arguments)| {
                if !matches!(operator.as_str(), "$set" | "$unset" | "$inc") {
                    return Err(DocumentStoreError::Backend(format!(
                        "Unsupported update operator: {operator}"
                    )));
                }

                match arguments {
                    Bson::Document(arguments) => Ok((operator, arguments)),
                    _ => Err(DocumentStoreError::Backend(format!("{operator} expects a document"))),
                }
            })
            .collect::<DocumentStoreResult<Vec<_>>>()
            .map(Update::Operators)
    }

    fn apply(&self, record: &Record) -> DocumentStoreResult<Record> {
        match self {
            Update::Replace(replacement) => {
                let mut updated = Record::new();

                if let Some(id) = record.get(ID_FIELD) {
                    updated.insert(ID_FIELD, id.clone());
                }

                for (key, value) in replacement {
                    if key != ID_FIELD {
                        updated.insert(key.clone(), value.clone());
                    }
                }

                Ok(updated)
            }
            Update::Operators(operators) => {
                let mut updated = record.clone();

                for (operator, arguments) in operators {
                    for (path, value) in arguments {
                        match operator.as_str() {
                            "$set" => set_path(&mut updated, path, value.clone())?,
                            "$unset" => unset_path(&mut updated, path),
                            _ => {
                                let current = lookup_path(&updated, path).cloned();
                                set_path(&mut updated, path, increment(path, current, value)?)?;
                            }
                        }
                    }
                }

                Ok(updated)
            }
        }
    }
}

fn set_path(record: &mut Record, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            record.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = record
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Record::new()));

            match child {
                Bson::Document(child) => set_path(child, rest, value),
                _ => Err(DocumentStoreError::Backend(format!(
                    "Cannot set {path}: {head} is not a document"
                ))),
            }
        }
    }
}

fn unset_path(record: &mut Record, path: &str) {
    match path.split_once('.') {
        None => {
            record.remove(path);
        }
        Some((head, rest)) => {
            if let Ok(child) = record.get_document_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

fn increment(path: &str, current: Option<Bson>, by: &Bson) -> DocumentStoreResult<Bson> {
    match (current.unwrap_or(Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(Bson::Int32(a + b)),
        (Bson::Int32(a), Bson::Int64(b)) => Ok(Bson::Int64(a as i64 + b)),
        (Bson::Int64(a), Bson::Int32(b)) => Ok(Bson::Int64(a + *b as i64)),
        (Bson::Int64(a), Bson::Int64(b)) => Ok(Bson::Int64(a + b)),
        (Bson::Double(a), Bson::Double(b)) => Ok(Bson::Double(a + b)),
        (Bson::Double(a), Bson::Int32(b)) => Ok(Bson::Double(a + *b as f64)),
        (Bson::Double(a), Bson::Int64(b)) => Ok(Bson::Double(a + *b as f64)),
        (Bson::Int32(a), Bson::Double(b)) => Ok(Bson::Double(a as f64 + b)),
        (Bson::Int64(a), Bson::Double(b)) => Ok(Bson::Double(a as f64 + b)),
        _ => Err(DocumentStoreError::Backend(format!("Cannot increment non-numeric field {path}"))),
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmap_memory::InMemoryStore;
/// use docmap::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();

        store
            .insert_documents(
                vec![
                    doc! { "_id": 1, "name": "c", "age": 30 },
                    doc! { "_id": 2, "name": "a", "age": 20 },
                    doc! { "_id": 3, "name": "b" },
                ],
                "people",
            )
            .await
            .unwrap();

        store
    }

    fn ids(records: &[Record]) -> Vec<i32> {
        records
            .iter()
            .map(|record| record.get_i32("_id").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn duplicate_identifiers_are_rejected() {
        let store = seeded().await;

        let result = store
            .insert_documents(vec![doc! { "_id": 1_i64 }], "people")
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Backend(_))));
        assert_eq!(store.count_documents(doc! {}, "people").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn finds_sort_skip_and_limit() {
        let store = seeded().await;

        let by_age = store
            .find_documents(FindSpec::new(doc! {}).sort(vec![Sort::asc("age")]), "people")
            .await
            .unwrap();
        assert_eq!(ids(&by_age), vec![3, 2, 1]);

        let page = store
            .find_documents(
                FindSpec::new(doc! {}).sort(vec![Sort::desc("name")]).skip(1).limit(1),
                "people",
            )
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![3]);

        let unlimited = store
            .find_documents(FindSpec::new(doc! {}).limit(0), "people")
            .await
            .unwrap();
        assert_eq!(unlimited.len(), 3);
    }

    #[tokio::test]
    async fn projections_trim_records() {
        let store = seeded().await;

        let included = store
            .find_documents(
                FindSpec::new(doc! { "_id": 1 }).projection(Some(doc! { "name": 1 })),
                "people",
            )
            .await
            .unwrap();
        assert_eq!(included, vec![doc! { "_id": 1, "name": "c" }]);

        let excluded = store
            .find_documents(
                FindSpec::new(doc! { "_id": 1 }).projection(Some(doc! { "_id": 0, "age": 0 })),
                "people",
            )
            .await
            .unwrap();
        assert_eq!(excluded, vec![doc! { "name": "c" }]);
    }

    #[tokio::test]
    async fn operator_updates_modify_matches() {
        let store = seeded().await;

        let result = store
            .update_documents(
                doc! { "age": { "$exists": true } },
                doc! { "$inc": { "age": 1 }, "$unset": { "name": "" } },
                true,
                false,
                "people",
            )
            .await
            .unwrap();

        assert_eq!(result.matched, 2);
        assert_eq!(result.modified, 2);

        let record = store
            .find_one_document(FindSpec::new(doc! { "_id": 2 }), "people")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record, doc! { "_id": 2, "age": 21 });
    }

    #[tokio::test]
    async fn single_updates_stop_at_the_first_match() {
        let store = seeded().await;

        let result = store
            .update_documents(doc! {}, doc! { "$set": { "flag": true } }, false, false, "people")
            .await
            .unwrap();

        assert_eq!(result.matched, 1);
        assert_eq!(store.count_documents(doc! { "flag": true }, "people").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upserts_seed_from_equality_criteria() {
        let store = seeded().await;

        let result = store
            .update_documents(
                doc! { "_id": 9, "age": { "$gt": 5 } },
                doc! { "$set": { "e.f": "x" } },
                false,
                true,
                "people",
            )
            .await
            .unwrap();

        assert_eq!(result.matched, 0);
        assert_eq!(result.upserted_id, Some(Bson::Int32(9)));

        let record = store
            .find_one_document(FindSpec::new(doc! { "_id": 9 }), "people")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record, doc! { "_id": 9, "e": { "f": "x" } });
    }

    #[tokio::test]
    async fn replacements_keep_the_identifier() {
        let store = seeded().await;

        store
            .update_documents(doc! { "_id": 1 }, doc! { "other": 5 }, false, false, "people")
            .await
            .unwrap();

        let record = store
            .find_one_document(FindSpec::new(doc! { "_id": 1 }), "people")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record, doc! { "_id": 1, "other": 5 });
    }

    #[tokio::test]
    async fn mixed_updates_are_rejected() {
        let store = seeded().await;

        let result = store
            .update_documents(doc! {}, doc! { "$set": { "a": 1 }, "b": 2 }, false, false, "people")
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn removal_reports_the_count() {
        let store = seeded().await;

        let removed = store
            .remove_documents(doc! { "age": { "$lt": 25 } }, "people")
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.count_documents(doc! {}, "people").await.unwrap(), 2);
        assert_eq!(store.remove_documents(doc! {}, "nothing").await.unwrap(), 0);
        assert_eq!(store.collections().await, vec!["people".to_string()]);
    }
}
