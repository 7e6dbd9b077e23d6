//! Field weights
//!
//! Every fuzzy field carries a non-negative weight; fields without an explicit
//! weight default to 1. Weights are kept as configured and divided by their
//! sum when a score is aggregated.

use fuzzrec_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_FIELD_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldWeights {
    /// Scored fields in configuration order.
    fields: Vec<String>,
    weights: BTreeMap<String, f64>,
    total: f64,
}

impl FieldWeights {
    /// Resolve weights for `fields`, taking overrides from `explicit`.
    /// Entries of `explicit` naming other fields are ignored.
    pub fn new<S: AsRef<str>>(fields: &[S], explicit: &BTreeMap<String, f64>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::Configuration("no fuzzy fields to weight".to_string()));
        }

        let mut weights = BTreeMap::new();
        for field in fields {
            let field = field.as_ref();
            let weight = explicit.get(field).copied().unwrap_or(DEFAULT_FIELD_WEIGHT);
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::Configuration(format!(
                    "field {} has invalid weight {}",
                    field, weight
                )));
            }
            weights.insert(field.to_string(), weight);
        }

        let total: f64 = weights.values().sum();
        if total <= 0.0 {
            return Err(Error::Configuration(
                "field weights sum to zero".to_string(),
            ));
        }

        Ok(Self {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            weights,
            total,
        })
    }

    /// Every field at the default weight.
    pub fn uniform<S: AsRef<str>>(fields: &[S]) -> Result<Self> {
        Self::new(fields, &BTreeMap::new())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn weight(&self, field: &str) -> f64 {
        self.weights.get(field).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// `weight / total`.
    pub fn share(&self, field: &str) -> f64 {
        self.weight(field) / self.total
    }
}
