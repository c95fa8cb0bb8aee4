//! # Scenario Shake
//!
//! Earthquake scenario calculations: seeded, spatially correlated
//! ground-motion fields for a single rupture, followed by a weighted
//! map-reduce of damage or loss over an exposure model.
//!
//! ## Features
//!
//! - **Rupture/site filtering**: Distance-based pruning of sources and ruptures
//! - **Ground-motion fields**: Streaming and bulk sampling, truncation, JB2009
//!   spatial correlation
//! - **Epsilons**: Equicorrelated residuals per taxonomy
//! - **Map-reduce**: Weight-balanced partitions on an inline or rayon executor
//! - **Calculators**: Damage-state counts and aggregate/insured losses
//! - **Metrics**: Prometheus-compatible phase and work counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scenario_shake::{ScenarioBuilder, ScenarioConfig};
//!
//! #[tokio::main]
//! async fn main() -> scenario_shake::Result<()> {
//!     let config = ScenarioConfig::load("job.toml")?;
//!     let runtime = ScenarioBuilder::new()
//!         .with_config(config)
//!         .with_files("inputs.json", "out")?
//!         .build()?;
//!
//!     let report = runtime.run().await?;
//!     println!("{} keys in {}", report.outcome.len(), report.calc_id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod calculators;
pub mod config;
pub mod correlation;
pub mod epsilons;
pub mod error;
pub mod exposure;
pub mod filters;
pub mod gmf;
pub mod gsim;
pub mod imt;
pub mod metrics;
pub mod monitor;
pub mod parallel;
pub mod result_map;
pub mod risk_input;
pub mod riskmodel;
pub mod runtime;
pub mod site;
pub mod source;
pub mod storage;

// Re-exports for ergonomic API
pub use builder::ScenarioBuilder;
pub use calculators::{calc_damage, calc_gmfs, calc_risk, run_scenario, ScenarioInputs};
pub use config::{CalculationMode, GmfMode, ScenarioConfig};
pub use error::{Result, ScenarioError};
pub use gmf::{GmfComputer, GmfRecord, GroundMotionFields};
pub use gsim::{GroundMotionModel, GsimRegistry, LinearAttenuation};
pub use imt::Imt;
pub use metrics::ScenarioMetrics;
pub use monitor::Monitor;
pub use parallel::{apply_reduce, InlineExecutor, RayonExecutor, TaskExecutor};
pub use result_map::{LossKind, ResultMap, ScenarioOutcome, Summable};
pub use runtime::{CalculationReport, GmfReport, ScenarioRuntime};
pub use site::{Location, Site, SiteCollection};
pub use source::{PointSource, Rupture, SeismicSource};
pub use storage::{FileRepository, MemoryRepository, ScenarioRepository};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::ScenarioBuilder;
    pub use crate::calculators::{run_scenario, ScenarioInputs};
    pub use crate::config::ScenarioConfig;
    pub use crate::error::Result;
    pub use crate::exposure::Asset;
    pub use crate::imt::Imt;
    pub use crate::parallel::TaskExecutor;
    pub use crate::result_map::ScenarioOutcome;
    pub use crate::riskmodel::RiskModelSpec;
    pub use crate::runtime::ScenarioRuntime;
    pub use crate::site::{Location, Site, SiteCollection};
    pub use crate::source::Rupture;
}
