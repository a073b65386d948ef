//! Criteria evaluation for in-memory record filtering.
//!
//! This module evaluates the MongoDB criteria dialect against BSON records and
//! provides the ordering used for sorting.
//!
//! Supported top-level operators are `$and`, `$or` and `$nor`. Field conditions
//! accept plain equality (which also matches array members) and the operators
//! `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists` and `$not`.
//! Field names may be dotted paths into sub-documents.

use bson::{Bson, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docmap_core::{
    document::Record,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so that `1`, `1i64` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null or missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Object identifier
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl Comparable<'_> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: values of different types order by type,
    /// values of the same type by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> From<Option<&'a Bson>> for Comparable<'a> {
    fn from(bson: Option<&'a Bson>) -> Self {
        bson.map(Comparable::from).unwrap_or(Comparable::Null)
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path inside a record.
pub(crate) fn lookup_path<'a>(record: &'a Record, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Returns `true` if `value` is an operator document such as `{"$gt": 1}`.
pub(crate) fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|key| key.starts_with('$')),
        _ => false,
    }
}

/// Evaluates criteria against a single record.
pub(crate) struct RecordEvaluator<'a> {
    record: &'a Record,
}

impl<'a> RecordEvaluator<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self { record }
    }

    /// Returns `true` if the record satisfies every condition in `criteria`.
    pub fn matches(&self, criteria: &Record) -> DocumentStoreResult<bool> {
        for (key, condition) in criteria {
            let matched = match key.as_str() {
                "$and" => self.all(clauses(key, condition)?)?,
                "$or" => self.any(clauses(key, condition)?)?,
                "$nor" => !self.any(clauses(key, condition)?)?,
                operator if operator.starts_with('$') => return Err(unsupported(operator)),
                path => self.field(path, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Keeps the records matching `criteria`.
    pub fn filter_records(
        records: impl IntoIterator<Item = &'a Record>,
        criteria: &Record,
    ) -> DocumentStoreResult<Vec<&'a Record>> {
        let mut matched = Vec::new();

        for record in records {
            if RecordEvaluator::new(record).matches(criteria)? {
                matched.push(record);
            }
        }

        Ok(matched)
    }

    fn all(&self, clauses: Vec<&Record>) -> DocumentStoreResult<bool> {
        for clause in clauses {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any(&self, clauses: Vec<&Record>) -> DocumentStoreResult<bool> {
        for clause in clauses {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn field(&self, path: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        let value = lookup_path(self.record, path);

        match condition {
            Bson::Document(operators) if is_operator_document(condition) => {
                self.operators(value, operators)
            }
            _ => Ok(equals(value, condition)),
        }
    }

    fn operators(&self, value: Option<&Bson>, operators: &Record) -> DocumentStoreResult<bool> {
        for (operator, operand) in operators {
            let matched = match operator.as_str() {
                "$eq" => equals(value, operand),
                "$ne" => !equals(value, operand),
                "$gt" => compare(value, operand, |ordering| ordering == Ordering::Greater),
                "$gte" => compare(value, operand, |ordering| ordering != Ordering::Less),
                "$lt" => compare(value, operand, |ordering| ordering == Ordering::Less),
                "$lte" => compare(value, operand, |ordering| ordering != Ordering::Greater),
                "$in" => members(operator, operand)?
                    .iter()
                    .any(|candidate| equals(value, candidate)),
                "$nin" => !members(operator, operand)?
                    .iter()
                    .any(|candidate| equals(value, candidate)),
                "$exists" => value.is_some() == exists_flag(operand),
                "$not" => match operand {
                    Bson::Document(inner) => !self.operators(value, inner)?,
                    _ => {
                        return Err(DocumentStoreError::Backend(
                            "$not expects an operator document".to_string(),
                        ))
                    }
                },
                other => return Err(unsupported(other)),
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Equality as the store defines it: a missing field equals null and an array
/// field equals any of its members.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    let expected = Comparable::from(expected);
    let actual = Comparable::from(value);

    if actual == expected {
        return true;
    }

    match actual {
        Comparable::Array(items) => items.iter().any(|item| item == &expected),
        _ => false,
    }
}

fn compare(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    let operand = Comparable::from(operand);

    match Comparable::from(value) {
        Comparable::Array(items) => items
            .iter()
            .any(|item| item.partial_cmp(&operand).is_some_and(&accept)),
        actual => actual.partial_cmp(&operand).is_some_and(accept),
    }
}

fn clauses<'b>(operator: &str, value: &'b Bson) -> DocumentStoreResult<Vec<&'b Record>> {
    match value {
        Bson::Array(items) => items
            .iter()
            .map(|item| {
                item.as_document().ok_or_else(|| {
                    DocumentStoreError::Backend(format!("{operator} expects an array of documents"))
                })
            })
            .collect(),
        _ => Err(DocumentStoreError::Backend(format!("{operator} expects an array"))),
    }
}

fn members<'b>(operator: &str, value: &'b Bson) -> DocumentStoreResult<&'b [Bson]> {
    match value {
        Bson::Array(items) => Ok(items),
        _ => Err(DocumentStoreError::Backend(format!("{operator} expects an array"))),
    }
}

fn exists_flag(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Null => false,
        _ => true,
    }
}

fn unsupported(operator: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("Unsupported query operator: {operator}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(record: Record, criteria: Record) -> bool {
        RecordEvaluator::new(&record).matches(&criteria).unwrap()
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert!(matches(doc! { "i": 1_i64 }, doc! { "i": 1 }));
        assert!(matches(doc! { "i": 2.0 }, doc! { "i": { "$gt": 1 } }));
        assert!(!matches(doc! { "i": "2" }, doc! { "i": { "$gt": 1 } }));
    }

    #[test]
    fn missing_fields_equal_null() {
        assert!(matches(doc! {}, doc! { "x": Bson::Null }));
        assert!(!matches(doc! {}, doc! { "x": { "$exists": true } }));
        assert!(matches(doc! { "x": 1 }, doc! { "x": { "$exists": 1 } }));
    }

    #[test]
    fn arrays_match_their_members() {
        let record = doc! { "tags": ["a", "b"] };

        assert!(matches(record.clone(), doc! { "tags": "a" }));
        assert!(matches(record.clone(), doc! { "tags": { "$in": ["c", "b"] } }));
        assert!(!matches(record, doc! { "tags": { "$nin": ["b"] } }));
    }

    #[test]
    fn logical_operators_combine_clauses() {
        let record = doc! { "a": 1, "b": 2 };

        assert!(matches(record.clone(), doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!matches(record.clone(), doc! { "$and": [{ "a": 1 }, { "b": 3 }] }));
        assert!(matches(record.clone(), doc! { "$nor": [{ "a": 5 }] }));
        assert!(matches(record, doc! { "a": { "$not": { "$gt": 3 } } }));
    }

    #[test]
    fn dotted_paths_reach_into_sub_documents() {
        let record = doc! { "e": { "f": { "g": 7 } } };

        assert!(matches(record.clone(), doc! { "e.f.g": 7 }));
        assert!(!matches(record, doc! { "e.x": { "$exists": true } }));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let record = doc! { "a": 1 };

        assert!(RecordEvaluator::new(&record).matches(&doc! { "a": { "$regex": "x" } }).is_err());
        assert!(RecordEvaluator::new(&record).matches(&doc! { "$where": "1" }).is_err());
    }

    #[test]
    fn sort_order_groups_by_type() {
        let null = Bson::Null;
        let number = Bson::Int32(3);
        let string = Bson::String("a".to_string());

        assert_eq!(Comparable::from(&null).sort_cmp(&Comparable::from(&number)), Ordering::Less);
        assert_eq!(Comparable::from(&string).sort_cmp(&Comparable::from(&number)), Ordering::Greater);
        assert_eq!(Comparable::from(None).sort_cmp(&Comparable::from(&null)), Ordering::Equal);
    }
}
