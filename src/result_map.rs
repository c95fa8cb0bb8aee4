//! # Mergeable result maps
//!
//! Table of Contents:
//! 1. Summable: scalar, vector or matrix values that add
//! 2. ResultMap: ordered key → Summable map, only ever merged into
//! 3. ScenarioOutcome: damage or risk results, flattened to records
//!
//! Merging is commutative and associative; a missing key is the additive
//! identity and a `None` contribution is skipped, never treated as zero.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScenarioError};

// ─────────────────────────────────────────────
// 1. Summable
// ─────────────────────────────────────────────

/// A value that can be added to another of the same shape.
/// A scalar broadcasts over vectors and matrices.
#[derive(Debug, Clone, PartialEq)]
pub enum Summable {
    /// Single number
    Scalar(f64),
    /// One value per realization or damage state
    Vector(Vec<f64>),
    /// Two-dimensional values
    Matrix(DMatrix<f64>),
}

impl Summable {
    /// (rows, cols); a vector is a single row
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Scalar(_) => (1, 1),
            Self::Vector(v) => (1, v.len()),
            Self::Matrix(m) => m.shape(),
        }
    }

    /// Multiply every element
    pub fn scale(&self, factor: f64) -> Self {
        match self {
            Self::Scalar(x) => Self::Scalar(x * factor),
            Self::Vector(v) => Self::Vector(v.iter().map(|x| x * factor).collect()),
            Self::Matrix(m) => Self::Matrix(m * factor),
        }
    }

    /// Elements in row-major order
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Self::Scalar(x) => vec![*x],
            Self::Vector(v) => v.clone(),
            Self::Matrix(m) => m.transpose().iter().copied().collect(),
        }
    }

    /// Elementwise sum
    pub fn add(self, other: Summable) -> Result<Summable> {
        use Summable::*;
        match (self, other) {
            (Scalar(a), Scalar(b)) => Ok(Scalar(a + b)),
            (Scalar(s), Vector(v)) | (Vector(v), Scalar(s)) => Ok(Vector(v.into_iter().map(|x| x + s).collect())),
            (Scalar(s), Matrix(m)) | (Matrix(m), Scalar(s)) => Ok(Matrix(m.add_scalar(s))),
            (Vector(a), Vector(b)) => {
                if a.len() != b.len() {
                    return Err(ScenarioError::shape("summed vector", (1, a.len()), (1, b.len())));
                }
                Ok(Vector(a.iter().zip(&b).map(|(x, y)| x + y).collect()))
            }
            (Matrix(a), Matrix(b)) => {
                if a.shape() != b.shape() {
                    return Err(ScenarioError::shape("summed matrix", a.shape(), b.shape()));
                }
                Ok(Matrix(a + b))
            }
            (a, b) => Err(ScenarioError::shape("summed value", a.shape(), b.shape())),
        }
    }
}

impl From<f64> for Summable {
    fn from(x: f64) -> Self {
        Self::Scalar(x)
    }
}

impl From<Vec<f64>> for Summable {
    fn from(v: Vec<f64>) -> Self {
        Self::Vector(v)
    }
}

impl From<DMatrix<f64>> for Summable {
    fn from(m: DMatrix<f64>) -> Self {
        Self::Matrix(m)
    }
}

// ─────────────────────────────────────────────
// 2. ResultMap
// ─────────────────────────────────────────────

/// Ordered aggregation map
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMap<K: Ord> {
    entries: BTreeMap<K, Summable>,
}

impl<K: Ord> Default for ResultMap<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord> ResultMap<K> {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contribution under `key`; `None` leaves the map untouched
    pub fn add(&mut self, key: K, value: Option<Summable>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => {
                let current = std::mem::replace(slot.get_mut(), Summable::Scalar(0.0));
                *slot.get_mut() = current.add(value)?;
            }
        }
        Ok(())
    }

    /// Merge another map into this one
    pub fn merge(&mut self, other: ResultMap<K>) -> Result<()> {
        for (key, value) in other.entries {
            self.add(key, Some(value))?;
        }
        Ok(())
    }

    /// Value under a key
    pub fn get(&self, key: &K) -> Option<&Summable> {
        self.entries.get(key)
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Summable)> {
        self.entries.iter()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key was ever added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Ord> IntoIterator for ResultMap<K> {
    type Item = (K, Summable);
    type IntoIter = std::collections::btree_map::IntoIter<K, Summable>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Merge two maps into a new one
pub fn add_dicts<K: Ord>(mut acc: ResultMap<K>, other: ResultMap<K>) -> Result<ResultMap<K>> {
    acc.merge(other)?;
    Ok(acc)
}

// ─────────────────────────────────────────────
// 3. ScenarioOutcome
// ─────────────────────────────────────────────

/// Aggregate or insured losses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LossKind {
    /// Ground-up losses
    #[serde(rename = "agg")]
    Aggregate,
    /// Insured losses
    #[serde(rename = "ins")]
    Insured,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregate => f.write_str("agg"),
            Self::Insured => f.write_str("ins"),
        }
    }
}

/// Result of a scenario calculation
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioOutcome {
    /// Damage-state counts keyed by taxonomy
    Damage(ResultMap<String>),
    /// Losses keyed by (kind, loss type)
    Risk(ResultMap<(LossKind, String)>),
}

/// One flattened outcome entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Loss kind, for risk outcomes
    pub kind: Option<LossKind>,
    /// Taxonomy (damage) or loss type (risk)
    pub name: String,
    /// (rows, cols) of `values`
    pub shape: (usize, usize),
    /// Values in row-major order
    pub values: Vec<f64>,
}

impl ScenarioOutcome {
    /// Calculation mode that produced the outcome
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Damage(_) => "scenario_damage",
            Self::Risk(_) => "scenario_risk",
        }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        match self {
            Self::Damage(m) => m.len(),
            Self::Risk(m) => m.len(),
        }
    }

    /// Whether nothing was aggregated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to records, in key order
    pub fn to_records(&self) -> Vec<OutcomeRecord> {
        let record = |kind, name: &str, value: &Summable| OutcomeRecord {
            kind,
            name: name.to_string(),
            shape: value.shape(),
            values: value.to_vec(),
        };
        match self {
            Self::Damage(m) => m.iter().map(|(taxonomy, v)| record(None, taxonomy, v)).collect(),
            Self::Risk(m) => m
                .iter()
                .map(|((kind, loss_type), v)| record(Some(*kind), loss_type, v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Option<Summable>)]) -> ResultMap<String> {
        let mut m = ResultMap::new();
        for (k, v) in entries {
            m.add(k.to_string(), v.clone()).unwrap();
        }
        m
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = map(&[("x", Some(vec![1.0, 2.0].into())), ("y", Some(3.0.into()))]);
        let b = map(&[("x", Some(vec![0.5, 0.25].into())), ("z", Some(1.0.into()))]);
        assert_eq!(add_dicts(a.clone(), b.clone()).unwrap(), add_dicts(b, a).unwrap());
    }

    #[test]
    fn test_merge_is_associative() {
        let a = map(&[("x", Some(1.0.into()))]);
        let b = map(&[("x", Some(2.0.into())), ("y", Some(vec![1.0].into()))]);
        let c = map(&[("y", Some(vec![4.0].into()))]);
        let left = add_dicts(add_dicts(a.clone(), b.clone()).unwrap(), c.clone()).unwrap();
        let right = add_dicts(a, add_dicts(b, c).unwrap()).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.get(&"x".to_string()), Some(&Summable::Scalar(3.0)));
    }

    #[test]
    fn test_empty_is_identity() {
        let a = map(&[("x", Some(vec![1.0, 2.0].into()))]);
        assert_eq!(add_dicts(ResultMap::new(), a.clone()).unwrap(), a);
        assert_eq!(add_dicts(a.clone(), ResultMap::new()).unwrap(), a);
    }

    #[test]
    fn test_none_contribution_is_skipped() {
        let m = map(&[("ins", None), ("agg", Some(2.0.into()))]);
        assert_eq!(m.len(), 1);
        assert!(m.get(&"ins".to_string()).is_none());

        let mut with_value = map(&[("ins", Some(1.0.into()))]);
        with_value.add("ins".to_string(), None).unwrap();
        assert_eq!(with_value.get(&"ins".to_string()), Some(&Summable::Scalar(1.0)));
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let err = Summable::from(vec![1.0]).add(vec![1.0, 2.0].into()).unwrap_err();
        assert!(matches!(err, ScenarioError::NumericShape { .. }));
    }

    #[test]
    fn test_scalar_broadcasts() {
        let sum = Summable::from(1.0).add(vec![1.0, 2.0].into()).unwrap();
        assert_eq!(sum, Summable::Vector(vec![2.0, 3.0]));
    }

    #[test]
    fn test_risk_records() {
        let mut m = ResultMap::new();
        m.add((LossKind::Insured, "structural".to_string()), Some(vec![1.0].into()))
            .unwrap();
        m.add((LossKind::Aggregate, "structural".to_string()), Some(vec![2.0].into()))
            .unwrap();
        let records = ScenarioOutcome::Risk(m).to_records();
        assert_eq!(records[0].kind, Some(LossKind::Aggregate));
        assert_eq!(records[1].values, vec![1.0]);
        assert_eq!(serde_json::to_string(&LossKind::Insured).unwrap(), "\"ins\"");
    }

    #[test]
    fn test_matrix_records_are_row_major() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(Summable::from(m).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
