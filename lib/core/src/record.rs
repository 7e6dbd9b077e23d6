use crate::canonical::{canonicalize, content_hash};
use crate::stats::Metadata;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Document member holding the record identifier.
pub const ID_KEY: &str = "_id";
/// Document member holding per-field token metadata.
pub const META_KEY: &str = "_meta";
/// Column appended to matched records in batch output.
pub const MATCH_RATE: &str = "MATCH_RATE";

/// Content-derived identifier of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Hash the ordered field values.
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self(content_hash(values))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered field -> value mapping with a stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    fields: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Metadata>,
}

impl Record {
    /// Build a record from already canonical `(field, value)` pairs.
    pub fn new(fields: Vec<(String, String)>) -> Self {
        let id = RecordId::from_values(fields.iter().map(|(_, v)| v.as_str()));
        Self {
            id,
            fields,
            meta: None,
        }
    }

    /// Canonicalize names and values, then build the record.
    pub fn from_raw<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (canonicalize(k.as_ref()), canonicalize(v.as_ref())))
                .collect(),
        )
    }

    /// Zip a header with one split line.
    pub fn from_row(header: &[String], cells: Vec<String>) -> Self {
        Self::new(header.iter().cloned().zip(cells).collect())
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Move `source` columns to their `target` names; the identifier is not recomputed.
    pub fn rename_fields<'a, I>(&mut self, renames: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (target, source) in renames {
            if let Some(pos) = self.fields.iter().position(|(name, _)| name == source) {
                let (_, value) = self.fields.remove(pos);
                match self.fields.iter_mut().find(|(name, _)| name == target) {
                    Some(slot) => slot.1 = value,
                    None => self.fields.insert(pos, (target.to_string(), value)),
                }
            }
        }
    }

    pub fn without_meta(mut self) -> Self {
        self.meta = None;
        self
    }

    /// Store representation: `_id`, the fields in order, then `_meta`.
    pub fn to_document(&self) -> Result<Value> {
        let mut doc = Map::new();
        doc.insert(ID_KEY.to_string(), Value::String(self.id.to_string()));
        for (name, value) in &self.fields {
            doc.insert(name.clone(), Value::String(value.clone()));
        }
        if let Some(meta) = &self.meta {
            doc.insert(META_KEY.to_string(), serde_json::to_value(meta)?);
        }
        Ok(Value::Object(doc))
    }

    /// Inverse of [`Record::to_document`]. Members starting with `_` other than
    /// `_id`/`_meta` are ignored.
    pub fn from_document(doc: Value) -> Result<Self> {
        let Value::Object(map) = doc else {
            return Err(Error::InvalidInput("document is not an object".to_string()));
        };
        let mut id = None;
        let mut meta = None;
        let mut fields = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                ID_KEY => id = value.as_str().map(RecordId::new),
                META_KEY => meta = Some(serde_json::from_value(value)?),
                k if k.starts_with('_') => {}
                _ => {
                    let value = match value {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    fields.push((key, value));
                }
            }
        }
        let id = id.unwrap_or_else(|| RecordId::from_values(fields.iter().map(|(_, v)| v.as_str())));
        Ok(Self { id, fields, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::from_raw([("name", "Acme Inc."), ("state", "ca")])
    }

    #[test]
    fn test_from_raw_canonicalizes() {
        let rec = sample();
        assert_eq!(rec.get("NAME"), Some("ACME INC"));
        assert_eq!(rec.get("STATE"), Some("CA"));
        assert_eq!(rec.id, Record::from_raw([("NAME", "ACME INC"), ("STATE", "CA")]).id);
    }

    #[test]
    fn test_document_round_trip_keeps_order() {
        let rec = sample();
        let doc = rec.to_document().unwrap();
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["_id", "NAME", "STATE"]);
        let back = Record::from_document(doc).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_rename_fields() {
        let mut rec = Record::from_raw([("company", "acme"), ("state", "ca")]);
        let id = rec.id.clone();
        rec.rename_fields([("NAME", "COMPANY")]);
        assert_eq!(rec.get("NAME"), Some("ACME"));
        assert_eq!(rec.get("COMPANY"), None);
        assert_eq!(rec.field_names().collect::<Vec<_>>(), vec!["NAME", "STATE"]);
        assert_eq!(rec.id, id);
    }

    #[test]
    fn test_from_document_rejects_non_object() {
        assert!(Record::from_document(Value::Null).is_err());
    }
}
