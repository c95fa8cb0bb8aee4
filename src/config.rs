//! Job configuration
//!
//! ## Table of Contents
//! - **CalculationMode**: `scenario_risk` or `scenario_damage`
//! - **GmfMode**: streaming (per-realization seeds) or bulk (one RNG)
//! - **ScenarioConfig**: every job option with its default, TOML/JSON loading
//!   and validation

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::correlation;
use crate::error::{Result, ScenarioError};
use crate::imt::Imt;

/// Which calculator runs after the ground-motion simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalculationMode {
    /// Losses per loss type
    ScenarioRisk,
    /// Damage-state counts per taxonomy
    ScenarioDamage,
}

impl CalculationMode {
    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScenarioRisk => "scenario_risk",
            Self::ScenarioDamage => "scenario_damage",
        }
    }
}

impl fmt::Display for CalculationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationMode {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scenario_risk" => Ok(Self::ScenarioRisk),
            "scenario_damage" => Ok(Self::ScenarioDamage),
            other => Err(ScenarioError::config(format!("unrecognized calculation mode '{}'", other))),
        }
    }
}

/// How ground-motion fields are sampled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GmfMode {
    /// One seed per realization drawn from a master RNG
    #[default]
    Streaming,
    /// All realizations from one RNG, after a rupture distance filter
    Bulk,
}

/// Scenario job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// `scenario_risk` or `scenario_damage`
    pub calculation_mode: String,
    /// Integration distance in km
    pub maximum_distance: f64,
    /// Seed of the ground-motion simulation
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    /// Seed of the epsilon sampling
    #[serde(default = "default_seed")]
    pub master_seed: u64,
    /// Residual truncation in standard deviations
    #[serde(default)]
    pub truncation_level: Option<f64>,
    /// Number of realizations
    #[serde(default = "default_number_of_gmfs")]
    pub number_of_ground_motion_fields: u32,
    /// Equicorrelation of epsilons within a taxonomy
    #[serde(default)]
    pub asset_correlation: f64,
    /// IMT strings such as "PGA" or "SA(0.2)"
    pub intensity_measure_types: Vec<String>,
    /// Ground-motion model name
    pub gsim: String,
    /// Spatial correlation model name
    #[serde(default)]
    pub ground_motion_correlation_model: Option<String>,
    /// JB2009 parameter
    #[serde(default)]
    pub vs30_clustering: bool,
    /// GMF sampling mode
    #[serde(default)]
    pub gmf_mode: GmfMode,
    /// Number of blocks for the map-reduce; defaults to the executor's worker count
    #[serde(default)]
    pub concurrent_tasks: Option<usize>,
}

fn default_seed() -> u64 {
    42
}

fn default_number_of_gmfs() -> u32 {
    1
}

impl ScenarioConfig {
    /// Configuration with the required fields and every default
    pub fn new(
        calculation_mode: impl Into<String>,
        maximum_distance: f64,
        intensity_measure_types: Vec<impl Into<String>>,
        gsim: impl Into<String>,
    ) -> Self {
        Self {
            description: String::new(),
            calculation_mode: calculation_mode.into(),
            maximum_distance,
            random_seed: default_seed(),
            master_seed: default_seed(),
            truncation_level: None,
            number_of_ground_motion_fields: default_number_of_gmfs(),
            asset_correlation: 0.0,
            intensity_measure_types: intensity_measure_types.into_iter().map(Into::into).collect(),
            gsim: gsim.into(),
            ground_motion_correlation_model: None,
            vs30_clustering: false,
            gmf_mode: GmfMode::default(),
            concurrent_tasks: None,
        }
    }

    /// Parse TOML
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Parse JSON
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| ScenarioError::config(e.to_string()))
    }

    /// Load from a `.toml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Set the simulation seed
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Set the epsilon seed
    pub fn master_seed(mut self, seed: u64) -> Self {
        self.master_seed = seed;
        self
    }

    /// Set the number of realizations
    pub fn number_of_ground_motion_fields(mut self, n: u32) -> Self {
        self.number_of_ground_motion_fields = n;
        self
    }

    /// Set the truncation level
    pub fn truncation_level(mut self, level: f64) -> Self {
        self.truncation_level = Some(level);
        self
    }

    /// Set the asset correlation
    pub fn asset_correlation(mut self, rho: f64) -> Self {
        self.asset_correlation = rho;
        self
    }

    /// Set the spatial correlation model
    pub fn correlation_model(mut self, name: impl Into<String>, vs30_clustering: bool) -> Self {
        self.ground_motion_correlation_model = Some(name.into());
        self.vs30_clustering = vs30_clustering;
        self
    }

    /// Set the GMF sampling mode
    pub fn gmf_mode(mut self, mode: GmfMode) -> Self {
        self.gmf_mode = mode;
        self
    }

    /// Set the number of map-reduce blocks
    pub fn concurrent_tasks(mut self, n: usize) -> Self {
        self.concurrent_tasks = Some(n);
        self
    }

    /// Parsed calculation mode
    pub fn mode(&self) -> Result<CalculationMode> {
        self.calculation_mode.parse()
    }

    /// Parsed IMTs, sorted and deduplicated
    pub fn imts(&self) -> Result<Vec<Imt>> {
        if self.intensity_measure_types.is_empty() {
            return Err(ScenarioError::config("intensity_measure_types is empty"));
        }
        let mut imts = self
            .intensity_measure_types
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Imt>>>()?;
        imts.sort();
        imts.dedup();
        Ok(imts)
    }

    /// Map-reduce block count; `workers` applies when none is configured
    pub fn effective_concurrent_tasks(&self, workers: usize) -> usize {
        self.concurrent_tasks.unwrap_or(workers).max(1)
    }

    /// Check every option; runs before any simulation work
    pub fn validate(&self) -> Result<()> {
        self.mode()?;
        if !(self.maximum_distance.is_finite() && self.maximum_distance > 0.0) {
            return Err(ScenarioError::config(format!(
                "maximum_distance must be positive, got {}",
                self.maximum_distance
            )));
        }
        if let Some(t) = self.truncation_level {
            if !(t.is_finite() && t >= 0.0) {
                return Err(ScenarioError::config(format!("truncation_level must be >= 0, got {}", t)));
            }
        }
        if self.number_of_ground_motion_fields == 0 {
            return Err(ScenarioError::config("number_of_ground_motion_fields must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.asset_correlation) {
            return Err(ScenarioError::config(format!(
                "asset_correlation must be in [0, 1], got {}",
                self.asset_correlation
            )));
        }
        self.imts()?;
        if self.gsim.trim().is_empty() {
            return Err(ScenarioError::config("gsim is required"));
        }
        correlation::from_config(self.ground_motion_correlation_model.as_deref(), self.vs30_clustering)?;
        if self.concurrent_tasks == Some(0) {
            return Err(ScenarioError::config("concurrent_tasks must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
        calculation_mode = "scenario_damage"
        maximum_distance = 200.0
        intensity_measure_types = ["SA(0.3)", "PGA"]
        gsim = "LinearAttenuation"
    "#;

    #[test]
    fn test_defaults() {
        let config = ScenarioConfig::from_toml_str(JOB).unwrap();
        assert_eq!(config.random_seed, 42);
        assert_eq!(config.master_seed, 42);
        assert_eq!(config.number_of_ground_motion_fields, 1);
        assert_eq!(config.asset_correlation, 0.0);
        assert_eq!(config.truncation_level, None);
        assert_eq!(config.gmf_mode, GmfMode::Streaming);
        assert!(config.ground_motion_correlation_model.is_none());
        assert_eq!(config.mode().unwrap(), CalculationMode::ScenarioDamage);
        assert_eq!(config.imts().unwrap(), vec![Imt::Pga, Imt::sa(0.3)]);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_required_field_is_config_error() {
        let err = ScenarioConfig::from_toml_str("calculation_mode = \"scenario_risk\"").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unknown_mode_fails_validation() {
        let config = ScenarioConfig::new("unknown_mode", 100.0, vec!["PGA"], "LinearAttenuation");
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_out_of_range_values() {
        let base = ScenarioConfig::new("scenario_risk", 100.0, vec!["PGA"], "LinearAttenuation");
        assert!(base.clone().asset_correlation(1.5).validate().is_err());
        assert!(base.clone().number_of_ground_motion_fields(0).validate().is_err());
        assert!(base.clone().truncation_level(-1.0).validate().is_err());
        assert!(base.clone().correlation_model("XYZ", false).validate().is_err());
        assert!(base.clone().concurrent_tasks(0).validate().is_err());
        assert!(ScenarioConfig::new("scenario_risk", 0.0, vec!["PGA"], "LinearAttenuation")
            .validate()
            .is_err());
        assert!(ScenarioConfig::new("scenario_risk", 10.0, vec!["XYZ"], "LinearAttenuation")
            .validate()
            .is_err());
        base.validate().unwrap();
    }

    #[test]
    fn test_json_and_bulk_mode() {
        let json = r#"{
            "calculation_mode": "scenario_risk",
            "maximum_distance": 50,
            "intensity_measure_types": ["PGA"],
            "gsim": "LinearAttenuation",
            "gmf_mode": "bulk",
            "concurrent_tasks": 3
        }"#;
        let config = ScenarioConfig::from_json_str(json).unwrap();
        assert_eq!(config.gmf_mode, GmfMode::Bulk);
        assert_eq!(config.effective_concurrent_tasks(8), 3);
    }

    #[test]
    fn test_concurrent_tasks_default_to_workers() {
        let config = ScenarioConfig::new("scenario_risk", 50.0, vec!["PGA"], "LinearAttenuation");
        assert_eq!(config.effective_concurrent_tasks(6), 6);
        assert_eq!(config.effective_concurrent_tasks(0), 1);
    }
}
