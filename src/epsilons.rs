//! Taxonomy-correlated epsilons for vulnerability sampling
//!
//! ## Table of Contents
//! - **make_epsilons**: (assets × samples) matrix with equicorrelated rows
//! - **add_epsilons**: one matrix per taxonomy, rows attached to the assets
//! - **EpsilonRow**: shared handle on one row of a taxonomy matrix

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::info;

use crate::error::{Result, ScenarioError};
use crate::exposure::AssetsBySite;

/// A row of a taxonomy's epsilon matrix. The matrix is shared, not owned.
#[derive(Clone, PartialEq)]
pub struct EpsilonRow {
    matrix: Arc<DMatrix<f64>>,
    row: usize,
}

impl EpsilonRow {
    /// Handle on `row` of `matrix`
    pub fn new(matrix: Arc<DMatrix<f64>>, row: usize) -> Result<Self> {
        if row >= matrix.nrows() {
            return Err(ScenarioError::shape("epsilon row", (row + 1, matrix.ncols()), matrix.shape()));
        }
        Ok(Self { matrix, row })
    }

    /// Row index
    pub fn row(&self) -> usize {
        self.row
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.matrix.ncols()
    }

    /// Whether there are no samples
    pub fn is_empty(&self) -> bool {
        self.matrix.ncols() == 0
    }

    /// Epsilon for one sample
    pub fn get(&self, sample: usize) -> Option<f64> {
        (sample < self.matrix.ncols()).then(|| self.matrix[(self.row, sample)])
    }

    /// Copy the row out
    pub fn to_vec(&self) -> Vec<f64> {
        self.matrix.row(self.row).iter().copied().collect()
    }
}

impl fmt::Debug for EpsilonRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpsilonRow")
            .field("row", &self.row)
            .field("samples", &self.matrix.ncols())
            .finish()
    }
}

/// `eps_ij = sqrt(rho) z_j + sqrt(1 - rho) e_ij` with z, e standard normal.
///
/// Draw order: z for every sample, then e row by row.
pub fn make_epsilons(num_assets: usize, num_samples: usize, seed: u64, correlation: f64) -> Result<DMatrix<f64>> {
    check_correlation(correlation)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let common: Vec<f64> = (0..num_samples).map(|_| rng.sample(StandardNormal)).collect();
    let (a, b) = (correlation.sqrt(), (1.0 - correlation).sqrt());

    let mut eps = DMatrix::zeros(num_assets, num_samples);
    for i in 0..num_assets {
        for (j, z) in common.iter().enumerate() {
            let e: f64 = rng.sample(StandardNormal);
            eps[(i, j)] = a * z + b * e;
        }
    }
    Ok(eps)
}

fn check_correlation(correlation: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&correlation) {
        return Err(ScenarioError::config(format!(
            "asset correlation must be in [0, 1], got {}",
            correlation
        )));
    }
    Ok(())
}

/// Build one epsilon matrix per taxonomy and attach a row to every asset.
///
/// Every taxonomy starts from a fresh RNG seeded with `seed`; rows follow
/// the encounter order of the assets within the taxonomy.
pub fn add_epsilons(
    assets_by_site: &mut AssetsBySite,
    num_samples: usize,
    seed: u64,
    correlation: f64,
) -> Result<BTreeMap<String, Arc<DMatrix<f64>>>> {
    check_correlation(correlation)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for asset in assets_by_site.assets() {
        *counts.entry(asset.taxonomy.clone()).or_default() += 1;
    }

    let mut matrices = BTreeMap::new();
    for (taxonomy, n) in &counts {
        info!("Building ({}, {}) epsilons for taxonomy {}", n, num_samples, taxonomy);
        let eps = make_epsilons(*n, num_samples, seed, correlation)?;
        matrices.insert(taxonomy.clone(), Arc::new(eps));
    }

    let mut next_row: BTreeMap<&str, usize> = BTreeMap::new();
    for asset in assets_by_site.assets_mut() {
        let matrix = matrices
            .get(&asset.taxonomy)
            .ok_or_else(|| ScenarioError::internal(format!("no epsilons for taxonomy {}", asset.taxonomy)))?;
        let row = next_row.entry(matrix_key(&counts, &asset.taxonomy)?).or_default();
        asset.epsilons = Some(EpsilonRow::new(Arc::clone(matrix), *row)?);
        *row += 1;
    }

    Ok(matrices)
}

/// Key of `counts` equal to `taxonomy`
fn matrix_key<'a>(counts: &'a BTreeMap<String, usize>, taxonomy: &str) -> Result<&'a str> {
    counts
        .get_key_value(taxonomy)
        .map(|(k, _)| k.as_str())
        .ok_or_else(|| ScenarioError::internal(format!("unknown taxonomy {}", taxonomy)))
}
