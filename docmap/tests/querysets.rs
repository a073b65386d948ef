mod common;

use bson::doc;
use common::CountingStore;
use docmap::{memory::InMemoryStore, prelude::*};
use futures::TryStreamExt;
use std::sync::Arc;

fn people() -> Arc<Schema> {
    Schema::builder("Person")
        .collection("people")
        .field("name", ScalarField::string())
        .field("age", ScalarField::integer())
        .field("team", ScalarField::string().nullable())
        .build()
}

fn seeded(store: impl StoreBackend + 'static, mode: Mode) -> (Database, Arc<Schema>) {
    let schema = people();
    let db = Database::builder(store).mode(mode).schema(&schema).build();

    for (name, age, team) in [("ada", 36, "core"), ("bob", 25, "web"), ("cy", 41, "core"), ("di", 30, "web")] {
        let person = Document::new(&schema);
        person.set("name", name).unwrap();
        person.set("age", age).unwrap();
        person.set("team", team).unwrap();

        match mode {
            Mode::Immediate => db.insert(&person).wait().unwrap(),
            Mode::Deferred => futures::executor::block_on(db.insert(&person).into_future()).unwrap(),
        }
    }

    (db, schema)
}

fn names(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(|person| person.get("name").unwrap().as_str().unwrap().to_string())
        .collect()
}

#[test]
fn refinements_never_touch_the_store() {
    let store = CountingStore::default();
    let (db, schema) = seeded(store.clone(), Mode::Immediate);
    store.reset();

    let base = db.queryset(&schema);
    let refined = base
        .find(doc! { "team": "core" }, None)
        .sort([Sort::desc("age")])
        .fields(["name"])
        .skip(1)
        .limit(5);

    assert_eq!(store.finds(), 0);
    assert!(base.criteria().is_empty());
    assert!(base.projection().is_none());
    assert!(base.sort_keys().is_empty());
    assert_eq!(refined.criteria(), &doc! { "team": "core" });
}

#[test]
fn criteria_and_projections_merge() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let base = db.queryset(&schema);

    let merged = base.find(doc! { "a": 1 }, None).find(doc! { "b": 2 }, None);
    assert_eq!(merged.criteria(), &doc! { "a": 1, "b": 2 });

    let fields = base.fields(["x"]).fields(["y"]);
    assert_eq!(fields.projection(), Some(&doc! { "x": true, "y": true }));
    assert!(fields.fields_all().projection().is_none());
}

#[test]
fn sort_skip_and_limit_shape_results() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let by_age = db.queryset(&schema).sort([Sort::asc("age")]);

    assert_eq!(names(&by_age.fetch().wait().unwrap()), ["bob", "di", "ada", "cy"]);
    assert_eq!(names(&by_age.skip(1).limit(2).fetch().wait().unwrap()), ["di", "ada"]);
    assert_eq!(names(&by_age.slice(1..3).wait().unwrap()), ["di", "ada"]);
    assert_eq!(by_age.nth(3).wait().unwrap().map(|p| names(&[p])), Some(vec!["cy".to_string()]));
    assert!(by_age.nth(10).wait().unwrap().is_none());

    let by_team = db
        .queryset(&schema)
        .sort([("team", SortDirection::Asc), ("age", SortDirection::Desc)]);
    assert_eq!(names(&by_team.fetch().wait().unwrap()), ["cy", "ada", "di", "bob"]);
}

#[test]
fn far_positions_are_empty() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let skipped = db.queryset(&schema).skip(2);

    assert!(skipped.nth(u64::MAX).wait().unwrap().is_none());
    assert!(skipped.nth(u64::MAX - 1).wait().unwrap().is_none());
    assert!(skipped.slice(u64::MAX - 1..u64::MAX).wait().unwrap().is_empty());
}

#[test]
fn counting_ignores_paging() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let web = db.queryset(&schema).find(doc! { "team": "web" }, None);

    assert_eq!(web.count().wait().unwrap(), 2);
    assert_eq!(web.limit(1).skip(1).count().wait().unwrap(), 2);
    assert_eq!(db.queryset(&schema).count().wait().unwrap(), 4);
}

#[test]
fn filter_expressions_narrow_queries() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);

    let older = db
        .queryset(&schema)
        .filter(&Filter::and([Filter::gte("age", 30), Filter::ne("team", "core")]))
        .unwrap();
    assert_eq!(names(&older.fetch().wait().unwrap()), ["di"]);

    let either = db
        .queryset(&schema)
        .filter(&Filter::any_of("name", ["ada", "bob"]).not())
        .unwrap()
        .sort([Sort::asc("name")]);
    assert_eq!(names(&either.fetch().wait().unwrap()), ["cy", "di"]);
}

#[test]
fn projected_out_fields_are_not_loaded() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);

    let person = db
        .queryset(&schema)
        .fields(["name"])
        .find_one(Some(doc! { "name": "ada" }), None)
        .wait()
        .unwrap()
        .unwrap();

    assert_eq!(person.get("name").unwrap().as_str(), Some("ada"));
    assert!(person.id().is_some());
    assert!(matches!(person.get("age"), Err(DocumentStoreError::NotLoaded { .. })));
    // smart null does not paper over a missing projection
    assert!(matches!(person.get("team"), Err(DocumentStoreError::NotLoaded { .. })));
}

#[test]
fn find_one_leaves_the_query_set_alone() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let base = db.queryset(&schema).sort([Sort::desc("age")]);

    let web = base
        .find_one(Some(doc! { "team": "web" }), None)
        .wait()
        .unwrap()
        .unwrap();

    assert_eq!(web.get("name").unwrap().as_str(), Some("di"));
    assert!(base.criteria().is_empty());
    assert!(base.find_one(Some(doc! { "team": "ops" }), None).wait().unwrap().is_none());
}

#[test]
fn lookups_by_identifier_ignore_criteria() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let ada = db
        .queryset(&schema)
        .find_one(Some(doc! { "name": "ada" }), None)
        .wait()
        .unwrap()
        .unwrap();

    let found = db
        .queryset(&schema)
        .find(doc! { "team": "web" }, Some(doc! { "age": 1 }))
        .with_id(ada.id().unwrap())
        .wait()
        .unwrap()
        .unwrap();

    assert_eq!(found, ada);
    assert_eq!(found.get("name").unwrap().as_str(), Some("ada"));
}

#[test]
fn updates_apply_to_every_match() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Immediate);
    let core = db.queryset(&schema).find(doc! { "team": "core" }, None);

    let result = core.update(doc! { "$inc": { "age": 1 } }).wait().unwrap();
    assert_eq!(result.matched, 2);
    assert_eq!(result.modified, 2);

    let one = db
        .queryset(&schema)
        .find(doc! { "team": "web" }, None)
        .update_one(doc! { "$set": { "team": "ops" } })
        .wait()
        .unwrap();
    assert_eq!(one.matched, 1);

    let nothing = db
        .queryset(&schema)
        .find(doc! { "team": "none" }, None)
        .update(doc! { "$set": { "age": 0 } })
        .wait()
        .unwrap();
    assert_eq!(nothing.upserted_id, None);
    assert_eq!(db.queryset(&schema).count().wait().unwrap(), 4);

    let ages = db
        .queryset(&schema)
        .find(doc! { "team": "core" }, None)
        .sort([Sort::asc("age")])
        .fetch()
        .wait()
        .unwrap()
        .iter()
        .map(|person| person.get("age").unwrap().as_i64().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(ages, [37, 42]);
}

#[test]
fn cursors_restart_per_call() {
    let store = CountingStore::default();
    let (db, schema) = seeded(store.clone(), Mode::Immediate);
    let all = db.queryset(&schema);
    store.reset();

    let first = all.iter().wait().unwrap();
    assert_eq!(first.len(), 4);
    let second = all.iter().wait().unwrap();
    assert_eq!(second.count(), 4);

    assert_eq!(store.finds(), 2);
}

#[tokio::test]
async fn deferred_query_sets_are_awaited() {
    let (db, schema) = seeded(InMemoryStore::new(), Mode::Deferred);
    let all = db.queryset(&schema).sort([Sort::asc("name")]);

    let count = all.count();
    assert!(!count.is_ready());
    assert_eq!(count.await.unwrap(), 4);

    assert!(matches!(all.fetch().wait(), Err(DocumentStoreError::Usage(_))));
    assert_eq!(names(&all.fetch().await.unwrap()), ["ada", "bob", "cy", "di"]);

    let streamed = all.stream().try_collect::<Vec<_>>().await.unwrap();
    assert_eq!(names(&streamed), ["ada", "bob", "cy", "di"]);
}

#[tokio::test]
async fn streams_are_lazy_in_both_modes() {
    let store = CountingStore::default();
    let (db, schema) = seeded(store.clone(), Mode::Immediate);
    store.reset();

    let stream = db.queryset(&schema).limit(2).stream();
    assert_eq!(store.finds(), 0);

    let documents = stream.try_collect::<Vec<_>>().await.unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(store.finds(), 1);
}

#[test]
fn embedded_types_have_no_query_sets() {
    let address = Schema::builder("Address")
        .field("city", ScalarField::string())
        .build();
    let db = Database::new(InMemoryStore::new());

    assert!(db.queryset(&address).count().wait().is_err());
}
