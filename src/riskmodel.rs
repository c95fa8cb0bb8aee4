//! # Risk models
//!
//! Table of Contents:
//! 1. RiskModel / Outputs: trait consumed by the calculators
//! 2. VulnerabilityFunction: mean loss ratio and CoV per IML
//! 3. FragilityFunction: limit-state PoEs per IML
//! 4. VulnerabilityModel: losses per loss type, with insurance
//! 5. FragilityModel: damage-state fractions
//! 6. RiskModelSpec: serde form of the models above

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::epsilons::EpsilonRow;
use crate::error::{Result, ScenarioError};
use crate::exposure::Asset;
use crate::imt::Imt;
use crate::risk_input::RiskInput;

/// Loss type reported by damage models
pub const DAMAGE_LOSS_TYPE: &str = "damage";

// ─────────────────────────────────────────────
// 1. RiskModel / Outputs
// ─────────────────────────────────────────────

/// What a risk model produces for a group of assets
#[derive(Debug, Clone, PartialEq)]
pub enum Outputs {
    /// Damage-state fractions, one (realizations × states) matrix per asset
    Damage {
        /// Assets, aligned with `fractions`
        assets: Vec<Asset>,
        /// Fractions per asset
        fractions: Vec<DMatrix<f64>>,
    },
    /// Losses
    Loss {
        /// Assets, aligned with the matrix rows
        assets: Vec<Asset>,
        /// Loss ratios (assets × realizations)
        loss_ratio_matrix: DMatrix<f64>,
        /// Summed losses per realization
        aggregate_losses: Vec<f64>,
        /// Insured losses (assets × realizations), when any asset is insured
        insured_loss_matrix: Option<DMatrix<f64>>,
        /// Summed insured losses per realization
        insured_losses: Option<Vec<f64>>,
    },
}

/// Lazy sequence of (loss type, outputs)
pub type OutputIter<'a> = Box<dyn Iterator<Item = Result<(String, Outputs)>> + 'a>;

/// A risk or damage model
pub trait RiskModel: Send + Sync + fmt::Debug {
    /// Loss types the model produces, sorted
    fn loss_types(&self) -> Vec<String>;

    /// Outputs for the given risk inputs, input by input, loss type by loss type
    fn gen_outputs<'a>(&'a self, inputs: &'a [RiskInput]) -> OutputIter<'a>;
}

// ─────────────────────────────────────────────
// 2. VulnerabilityFunction
// ─────────────────────────────────────────────

/// Discrete vulnerability function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityFunction {
    /// IMT the levels refer to
    pub imt: Imt,
    /// Intensity levels, strictly increasing
    pub imls: Vec<f64>,
    /// Mean loss ratio per level
    pub mean_loss_ratios: Vec<f64>,
    /// Coefficient of variation per level
    #[serde(default)]
    pub covs: Vec<f64>,
}

impl VulnerabilityFunction {
    /// Build and validate a function
    pub fn new(imt: Imt, imls: Vec<f64>, mean_loss_ratios: Vec<f64>, covs: Vec<f64>) -> Result<Self> {
        let f = Self {
            imt,
            imls,
            mean_loss_ratios,
            covs,
        };
        f.validate()?;
        Ok(f)
    }

    /// Check lengths, ordering and ranges; empty `covs` means all zero
    pub fn validate(&self) -> Result<()> {
        check_imls(&self.imls)?;
        if self.mean_loss_ratios.len() != self.imls.len() {
            return Err(ScenarioError::model(format!(
                "{} mean loss ratios for {} levels",
                self.mean_loss_ratios.len(),
                self.imls.len()
            )));
        }
        if !self.covs.is_empty() && self.covs.len() != self.imls.len() {
            return Err(ScenarioError::model(format!("{} CoVs for {} levels", self.covs.len(), self.imls.len())));
        }
        if self.mean_loss_ratios.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(ScenarioError::model("mean loss ratios must be in [0, 1]"));
        }
        if self.covs.iter().any(|c| !(c.is_finite() && *c >= 0.0)) {
            return Err(ScenarioError::model("CoVs must be non-negative"));
        }
        Ok(())
    }

    /// Mean loss ratio at an intensity; zero below the first level
    pub fn mean_loss_ratio(&self, iml: f64) -> f64 {
        interpolate(&self.imls, &self.mean_loss_ratios, iml)
    }

    /// CoV at an intensity
    pub fn cov(&self, iml: f64) -> f64 {
        if self.covs.is_empty() {
            0.0
        } else {
            interpolate(&self.imls, &self.covs, iml)
        }
    }

    /// One loss ratio per ground-motion value; lognormal around the mean
    /// when epsilons are given and the CoV is positive
    pub fn sample(&self, gmvs: &[f64], epsilons: Option<&EpsilonRow>) -> Result<Vec<f64>> {
        check_gmvs(gmvs)?;
        if let Some(eps) = epsilons {
            if eps.len() < gmvs.len() {
                return Err(ScenarioError::shape("epsilons", (1, gmvs.len()), (1, eps.len())));
            }
        }
        Ok(gmvs
            .iter()
            .enumerate()
            .map(|(j, &iml)| {
                let mean = self.mean_loss_ratio(iml);
                let cov = self.cov(iml);
                match epsilons.and_then(|e| e.get(j)) {
                    Some(eps) if mean > 0.0 && cov > 0.0 => {
                        let sigma = (1.0 + cov * cov).ln().sqrt();
                        (mean.ln() - sigma * sigma / 2.0 + sigma * eps).exp()
                    }
                    _ => mean,
                }
            })
            .collect())
    }
}

fn check_imls(imls: &[f64]) -> Result<()> {
    if imls.is_empty() {
        return Err(ScenarioError::model("no intensity levels"));
    }
    if imls.iter().any(|x| !x.is_finite()) || imls.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ScenarioError::model("intensity levels must be finite and strictly increasing"));
    }
    Ok(())
}

fn check_gmvs(gmvs: &[f64]) -> Result<()> {
    match gmvs.iter().find(|g| !g.is_finite()) {
        Some(g) => Err(ScenarioError::model(format!("ground-motion value {} is not finite", g))),
        None => Ok(()),
    }
}

/// Linear interpolation; zero below the first level (and for NaN), last
/// value above the last
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let (Some(&first), Some(&last)) = (xs.first(), xs.last()) else {
        return 0.0;
    };
    if x.is_nan() || x < first {
        return 0.0;
    }
    if x >= last {
        return ys[ys.len() - 1];
    }
    let i = xs.partition_point(|&v| v <= x) - 1;
    let w = (x - xs[i]) / (xs[i + 1] - xs[i]);
    ys[i] + w * (ys[i + 1] - ys[i])
}

// ─────────────────────────────────────────────
// 3. FragilityFunction
// ─────────────────────────────────────────────

/// Discrete fragility function: one PoE curve per limit state, in
/// increasing severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragilityFunction {
    /// IMT the levels refer to
    pub imt: Imt,
    /// Intensity levels, strictly increasing
    pub imls: Vec<f64>,
    /// PoEs per limit state, per level
    pub poes: Vec<Vec<f64>>,
}

impl FragilityFunction {
    /// Build and validate a function
    pub fn new(imt: Imt, imls: Vec<f64>, poes: Vec<Vec<f64>>) -> Result<Self> {
        let f = Self { imt, imls, poes };
        f.validate()?;
        Ok(f)
    }

    /// Check lengths and that more severe states are never more likely
    pub fn validate(&self) -> Result<()> {
        check_imls(&self.imls)?;
        if self.poes.is_empty() {
            return Err(ScenarioError::model("fragility function has no limit states"));
        }
        for curve in &self.poes {
            if curve.len() != self.imls.len() {
                return Err(ScenarioError::model(format!("{} PoEs for {} levels", curve.len(), self.imls.len())));
            }
            if curve.iter().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(ScenarioError::model("PoEs must be in [0, 1]"));
            }
        }
        for pair in self.poes.windows(2) {
            if pair[0].iter().zip(&pair[1]).any(|(a, b)| b > a) {
                return Err(ScenarioError::model("limit state PoEs must not increase with severity"));
            }
        }
        Ok(())
    }

    /// Number of damage states, including "no damage"
    pub fn num_damage_states(&self) -> usize {
        self.poes.len() + 1
    }

    /// Fractions per damage state at an intensity; they sum to one
    pub fn damage_state_fractions(&self, iml: f64) -> Vec<f64> {
        let exceed: Vec<f64> = self.poes.iter().map(|c| interpolate(&self.imls, c, iml)).collect();
        let mut fractions = Vec::with_capacity(exceed.len() + 1);
        fractions.push(1.0 - exceed[0]);
        for pair in exceed.windows(2) {
            fractions.push(pair[0] - pair[1]);
        }
        fractions.push(exceed[exceed.len() - 1]);
        fractions
    }

    /// (realizations × damage states) fractions
    pub fn fractions_matrix(&self, gmvs: &[f64]) -> DMatrix<f64> {
        let rows: Vec<Vec<f64>> = gmvs.iter().map(|g| self.damage_state_fractions(*g)).collect();
        DMatrix::from_fn(gmvs.len(), self.num_damage_states(), |i, j| rows[i][j])
    }
}

// ─────────────────────────────────────────────
// 4. VulnerabilityModel
// ─────────────────────────────────────────────

/// Vulnerability functions by taxonomy and loss type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityModel {
    /// taxonomy → loss type → function
    pub functions: BTreeMap<String, BTreeMap<String, VulnerabilityFunction>>,
}

impl VulnerabilityModel {
    /// Empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function
    pub fn with_function(mut self, taxonomy: impl Into<String>, loss_type: impl Into<String>, f: VulnerabilityFunction) -> Self {
        self.functions
            .entry(taxonomy.into())
            .or_default()
            .insert(loss_type.into(), f);
        self
    }

    /// Validate every function
    pub fn validate(&self) -> Result<()> {
        if self.functions.is_empty() {
            return Err(ScenarioError::model("vulnerability model has no functions"));
        }
        self.functions.values().flat_map(BTreeMap::values).try_for_each(|f| f.validate())
    }

    fn losses(&self, input: &RiskInput, loss_type: &str) -> Result<Option<Outputs>> {
        let mut assets = Vec::new();
        let mut ratios = Vec::new();
        for asset in &input.assets {
            let by_loss_type = self.functions.get(&asset.taxonomy).ok_or_else(|| {
                ScenarioError::model(format!("no vulnerability function for taxonomy {}", asset.taxonomy))
            })?;
            let Some(function) = by_loss_type.get(loss_type) else {
                continue;
            };
            if function.imt != input.imt {
                continue;
            }
            ratios.push(function.sample(&input.gmvs, asset.epsilons.as_ref())?);
            assets.push(asset.clone());
        }
        if assets.is_empty() {
            return Ok(None);
        }

        let n = input.gmvs.len();
        let loss_ratio_matrix = DMatrix::from_fn(assets.len(), n, |i, j| ratios[i][j]);

        let mut values = Vec::with_capacity(assets.len());
        for asset in &assets {
            values.push(asset.value(loss_type).ok_or_else(|| {
                ScenarioError::model(format!("asset {} has no {} value", asset.id, loss_type))
            })?);
        }

        let losses = DMatrix::from_fn(assets.len(), n, |i, j| loss_ratio_matrix[(i, j)] * values[i]);
        let aggregate_losses = column_sums(&losses);

        let (insured_loss_matrix, insured_losses) = if assets.iter().any(|a| a.insurance.is_some()) {
            let insured = DMatrix::from_fn(assets.len(), n, |i, j| match assets[i].insurance {
                Some(ins) => insured_loss(losses[(i, j)], values[i], ins.deductible, ins.limit),
                None => 0.0,
            });
            let sums = column_sums(&insured);
            (Some(insured), Some(sums))
        } else {
            (None, None)
        };

        Ok(Some(Outputs::Loss {
            assets,
            loss_ratio_matrix,
            aggregate_losses,
            insured_loss_matrix,
            insured_losses,
        }))
    }
}

/// `clip(loss - deductible·value, 0, (limit - deductible)·value)`
pub fn insured_loss(loss: f64, value: f64, deductible: f64, limit: f64) -> f64 {
    (loss - deductible * value).clamp(0.0, ((limit - deductible) * value).max(0.0))
}

fn column_sums(m: &DMatrix<f64>) -> Vec<f64> {
    m.column_iter().map(|c| c.sum()).collect()
}

impl RiskModel for VulnerabilityModel {
    fn loss_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .functions
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    fn gen_outputs<'a>(&'a self, inputs: &'a [RiskInput]) -> OutputIter<'a> {
        let loss_types = self.loss_types();
        Box::new(inputs.iter().flat_map(move |input| {
            loss_types
                .clone()
                .into_iter()
                .filter_map(move |lt| match self.losses(input, &lt) {
                    Ok(Some(out)) => Some(Ok((lt, out))),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                })
        }))
    }
}

// ─────────────────────────────────────────────
// 5. FragilityModel
// ─────────────────────────────────────────────

/// Fragility functions by taxonomy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragilityModel {
    /// Damage state names, "no damage" first
    #[serde(default)]
    pub damage_states: Vec<String>,
    /// taxonomy → function
    pub functions: BTreeMap<String, FragilityFunction>,
}

impl FragilityModel {
    /// Empty model with the given damage states
    pub fn new(damage_states: Vec<String>) -> Self {
        Self {
            damage_states,
            functions: BTreeMap::new(),
        }
    }

    /// Register a function
    pub fn with_function(mut self, taxonomy: impl Into<String>, f: FragilityFunction) -> Self {
        self.functions.insert(taxonomy.into(), f);
        self
    }

    /// Validate every function and the damage state count
    pub fn validate(&self) -> Result<()> {
        if self.functions.is_empty() {
            return Err(ScenarioError::model("fragility model has no functions"));
        }
        for (taxonomy, f) in &self.functions {
            f.validate()?;
            if !self.damage_states.is_empty() && self.damage_states.len() != f.num_damage_states() {
                return Err(ScenarioError::model(format!(
                    "taxonomy {} has {} damage states, expected {}",
                    taxonomy,
                    f.num_damage_states(),
                    self.damage_states.len()
                )));
            }
        }
        Ok(())
    }

    fn damage(&self, input: &RiskInput) -> Result<Option<Outputs>> {
        let mut assets = Vec::new();
        let mut fractions = Vec::new();
        for asset in &input.assets {
            let function = self.functions.get(&asset.taxonomy).ok_or_else(|| {
                ScenarioError::model(format!("no fragility function for taxonomy {}", asset.taxonomy))
            })?;
            if function.imt != input.imt {
                continue;
            }
            check_gmvs(&input.gmvs)?;
            fractions.push(function.fractions_matrix(&input.gmvs));
            assets.push(asset.clone());
        }
        Ok((!assets.is_empty()).then_some(Outputs::Damage { assets, fractions }))
    }
}

impl RiskModel for FragilityModel {
    fn loss_types(&self) -> Vec<String> {
        vec![DAMAGE_LOSS_TYPE.to_string()]
    }

    fn gen_outputs<'a>(&'a self, inputs: &'a [RiskInput]) -> OutputIter<'a> {
        Box::new(inputs.iter().filter_map(move |input| match self.damage(input) {
            Ok(Some(out)) => Some(Ok((DAMAGE_LOSS_TYPE.to_string(), out))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }))
    }
}

// ─────────────────────────────────────────────
// 6. RiskModelSpec
// ─────────────────────────────────────────────

/// Serialized risk model, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskModelSpec {
    /// Loss model, for `scenario_risk`
    Vulnerability(VulnerabilityModel),
    /// Damage model, for `scenario_damage`
    Fragility(FragilityModel),
}

impl RiskModelSpec {
    /// Kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Vulnerability(_) => "vulnerability",
            Self::Fragility(_) => "fragility",
        }
    }

    /// Validate and share
    pub fn build(&self) -> Result<Arc<dyn RiskModel>> {
        match self {
            Self::Vulnerability(m) => {
                m.validate()?;
                Ok(Arc::new(m.clone()))
            }
            Self::Fragility(m) => {
                m.validate()?;
                Ok(Arc::new(m.clone()))
            }
        }
    }
}
