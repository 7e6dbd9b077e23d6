// Exact-field filters: shard selection predicates and store selectors
use crate::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Equality selector over string document members.
pub type Selector = BTreeMap<String, String>;

/// Whether every selector member is present in `doc` with the same string value.
pub fn selector_matches(selector: &Selector, doc: &Value) -> bool {
    selector
        .iter()
        .all(|(field, value)| doc.get(field).and_then(Value::as_str) == Some(value.as_str()))
}

/// Values for a subset of exact fields, kept sorted by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterAssignment {
    values: Selector,
}

impl FilterAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The assignment a query record selects; exact fields it lacks are omitted.
    pub fn from_record<S: AsRef<str>>(record: &Record, exact: &[S]) -> Self {
        let values = exact
            .iter()
            .filter_map(|field| {
                let field = field.as_ref();
                record.get(field).map(|v| (field.to_string(), v.to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn as_selector(&self) -> &Selector {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Selector> for FilterAssignment {
    fn from(values: Selector) -> Self {
        Self { values }
    }
}

/// `FIELD=VALUE` pairs joined by `_`, in field order.
impl fmt::Display for FilterAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, value) in &self.values {
            if !first {
                f.write_str("_")?;
            }
            write!(f, "{}={}", field, value)?;
            first = false;
        }
        Ok(())
    }
}
