//! Document store abstraction.
//!
//! Documents are JSON objects carrying an `_id` member. Collections are named
//! by the caller. The only atomicity primitives are insert-if-absent and
//! find-and-remove ([`DocumentStore::pop_one`]); there are no cross-process locks.

use fuzzrec_core::{selector_matches, Error, Result, Selector, ID_KEY};
use serde_json::Value;
use std::collections::BTreeSet;

/// Outcome of an insert-if-absent. A duplicate id is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Size limit of a single inline document (the broker spills above it).
pub const DEFAULT_INLINE_LIMIT: usize = 16 * 1024 * 1024;

pub trait DocumentStore: Send + Sync {
    /// Insert `doc` unless a document with the same `_id` exists.
    fn insert(&self, collection: &str, doc: Value) -> Result<InsertOutcome>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Visit every document matching `selector`. Return `Ok(false)` from the
    /// visitor to stop early.
    fn scan(
        &self,
        collection: &str,
        selector: &Selector,
        visit: &mut dyn FnMut(Value) -> Result<bool>,
    ) -> Result<()>;

    /// Find-and-remove one document, if any.
    fn pop_one(&self, collection: &str) -> Result<Option<Value>>;

    fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Create single-field secondary indexes for `fields`.
    fn create_index(&self, collection: &str, fields: &[String]) -> Result<()>;

    fn drop_collection(&self, collection: &str) -> Result<()>;

    fn inline_limit(&self) -> usize {
        DEFAULT_INLINE_LIMIT
    }

    fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<usize> {
        let mut inserted = 0;
        for doc in docs {
            if self.insert(collection, doc)? == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Matching documents; with a projection only `_id` and the projected members are kept.
    fn find(
        &self,
        collection: &str,
        selector: &Selector,
        projection: Option<&[String]>,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        self.scan(collection, selector, &mut |doc| {
            out.push(match projection {
                Some(fields) => project(doc, fields),
                None => doc,
            });
            Ok(true)
        })?;
        Ok(out)
    }

    fn find_one(&self, collection: &str, selector: &Selector) -> Result<Option<Value>> {
        let mut found = None;
        self.scan(collection, selector, &mut |doc| {
            found = Some(doc);
            Ok(false)
        })?;
        Ok(found)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let mut n = 0;
        self.scan(collection, &Selector::new(), &mut |_| {
            n += 1;
            Ok(true)
        })?;
        Ok(n)
    }

    /// Distinct string values of `field`.
    fn distinct(&self, collection: &str, field: &str) -> Result<BTreeSet<String>> {
        let mut values = BTreeSet::new();
        self.scan(collection, &Selector::new(), &mut |doc| {
            if let Some(v) = doc.get(field).and_then(Value::as_str) {
                values.insert(v.to_string());
            }
            Ok(true)
        })?;
        Ok(values)
    }

    /// Distinct value combinations of `fields`; members a document lacks are omitted.
    fn group_distinct(&self, collection: &str, fields: &[String]) -> Result<Vec<Selector>> {
        let mut groups: BTreeSet<Selector> = BTreeSet::new();
        self.scan(collection, &Selector::new(), &mut |doc| {
            let group: Selector = fields
                .iter()
                .filter_map(|f| {
                    doc.get(f)
                        .and_then(Value::as_str)
                        .map(|v| (f.clone(), v.to_string()))
                })
                .collect();
            groups.insert(group);
            Ok(true)
        })?;
        Ok(groups.into_iter().collect())
    }
}

/// `_id` of a document.
pub fn document_id(doc: &Value) -> Result<&str> {
    doc.get(ID_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput(format!("document without string {}", ID_KEY)))
}

pub(crate) fn project(doc: Value, fields: &[String]) -> Value {
    let Value::Object(map) = doc else { return doc };
    let kept: serde_json::Map<String, Value> = map
        .into_iter()
        .filter(|(k, _)| k == ID_KEY || fields.iter().any(|f| f == k))
        .collect();
    Value::Object(kept)
}

pub(crate) fn matches(selector: &Selector, doc: &Value) -> bool {
    selector.is_empty() || selector_matches(selector, doc)
}

/// String members of `doc` that are covered by an index on `fields`.
pub(crate) fn indexed_values<'a>(
    doc: &'a Value,
    fields: &'a BTreeSet<String>,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    fields.iter().filter_map(move |field| {
        doc.get(field)
            .and_then(Value::as_str)
            .map(|value| (field.as_str(), value))
    })
}
