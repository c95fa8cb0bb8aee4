//! # Scenario calculators
//!
//! Table of Contents:
//! 1. ScenarioInputs: sites, exposure, rupture and risk model of a job
//! 2. calc_damage / calc_risk: per-partition aggregation
//! 3. calc_gmfs: ground-motion fields in the configured mode
//! 4. run_scenario: validate, simulate, assemble, map-reduce

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CalculationMode, GmfMode, ScenarioConfig};
use crate::correlation;
use crate::epsilons::add_epsilons;
use crate::error::{Result, ScenarioError};
use crate::exposure::{Asset, AssetsBySite};
use crate::filters::rupture_site_distance_filter;
use crate::gmf::{calc_gmfs_streaming, ground_motion_fields, GmfRequest, GroundMotionFields};
use crate::gsim::GsimRegistry;
use crate::monitor::Monitor;
use crate::parallel::{apply_reduce, TaskExecutor};
use crate::result_map::{add_dicts, LossKind, ResultMap, ScenarioOutcome, Summable};
use crate::risk_input::{asset_count_weight, build_risk_inputs, RiskInput};
use crate::riskmodel::{Outputs, RiskModel, RiskModelSpec};
use crate::site::SiteCollection;
use crate::source::{PointSource, Rupture, SeismicSource};

// ─────────────────────────────────────────────
// 1. ScenarioInputs
// ─────────────────────────────────────────────

/// Everything a scenario job reads besides its configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInputs {
    /// Sites of interest
    pub sites: SiteCollection,
    /// Exposed assets
    #[serde(default)]
    pub assets: Vec<Asset>,
    /// The scenario rupture
    pub rupture: Rupture,
    /// Candidate sources for hazard-only runs over many ruptures
    #[serde(default)]
    pub sources: Vec<PointSource>,
    /// Vulnerability or fragility model; not needed for hazard-only runs
    #[serde(default)]
    pub risk_model: Option<RiskModelSpec>,
}

impl ScenarioInputs {
    /// Inputs for a single rupture, without sources
    pub fn new(sites: SiteCollection, assets: Vec<Asset>, rupture: Rupture, risk_model: Option<RiskModelSpec>) -> Self {
        Self {
            sites,
            assets,
            rupture,
            sources: Vec::new(),
            risk_model,
        }
    }

    /// Sources as trait objects, in input order
    pub fn seismic_sources(&self) -> Vec<Arc<dyn SeismicSource>> {
        self.sources
            .iter()
            .map(|s| Arc::new(s.clone()) as Arc<dyn SeismicSource>)
            .collect()
    }
}

// ─────────────────────────────────────────────
// 2. calc_damage / calc_risk
// ─────────────────────────────────────────────

fn log_inputs(riskinputs: &[RiskInput]) {
    debug!(
        "Process {}, considering {} risk input(s) of weight {}",
        std::process::id(),
        riskinputs.len(),
        riskinputs.iter().map(|ri| ri.weight).sum::<f64>()
    );
}

/// Damage-state fractions times asset counts, summed by taxonomy
pub fn calc_damage<M: RiskModel + ?Sized>(riskinputs: &[RiskInput], riskmodel: &M) -> Result<ResultMap<String>> {
    log_inputs(riskinputs);
    let mut result = ResultMap::new();
    for output in riskmodel.gen_outputs(riskinputs) {
        let (loss_type, outputs) = output?;
        match outputs {
            Outputs::Damage { assets, fractions } => {
                for (asset, fraction) in assets.iter().zip(fractions) {
                    result.add(asset.taxonomy.clone(), Some(Summable::Matrix(fraction * asset.number)))?;
                }
            }
            Outputs::Loss { .. } => {
                return Err(ScenarioError::model(format!(
                    "damage calculator received loss outputs for {}",
                    loss_type
                )))
            }
        }
    }
    Ok(result)
}

/// Aggregate and insured losses, summed by loss type
pub fn calc_risk<M: RiskModel + ?Sized>(
    riskinputs: &[RiskInput],
    riskmodel: &M,
) -> Result<ResultMap<(LossKind, String)>> {
    log_inputs(riskinputs);
    let mut result = ResultMap::new();
    for output in riskmodel.gen_outputs(riskinputs) {
        let (loss_type, outputs) = output?;
        match outputs {
            Outputs::Loss {
                aggregate_losses,
                insured_losses,
                ..
            } => {
                result.add((LossKind::Aggregate, loss_type.clone()), Some(aggregate_losses.into()))?;
                result.add((LossKind::Insured, loss_type), insured_losses.map(Summable::from))?;
            }
            Outputs::Damage { .. } => {
                return Err(ScenarioError::model(format!(
                    "risk calculator received damage outputs for {}",
                    loss_type
                )))
            }
        }
    }
    Ok(result)
}

// ─────────────────────────────────────────────
// 3. calc_gmfs
// ─────────────────────────────────────────────

/// Ground-motion fields for the job's rupture, in the configured mode
pub fn calc_gmfs(
    config: &ScenarioConfig,
    sites: &SiteCollection,
    rupture: &Rupture,
    registry: &GsimRegistry,
    monitor: &Monitor,
) -> Result<GroundMotionFields> {
    let imts = config.imts()?;
    let gsim = registry.get(&config.gsim)?;
    let correlation =
        correlation::from_config(config.ground_motion_correlation_model.as_deref(), config.vs30_clustering)?;
    let realizations = config.number_of_ground_motion_fields as usize;

    let request = GmfRequest {
        rupture,
        sites,
        imts: &imts,
        gsim,
        truncation_level: config.truncation_level,
        realizations,
        correlation,
        seed: config.random_seed,
    };

    let mon = monitor.copy("computing gmfs");
    let fields = mon.measure(|| match config.gmf_mode {
        GmfMode::Streaming => calc_gmfs_streaming(&request),
        GmfMode::Bulk => {
            let filter = rupture_site_distance_filter(config.maximum_distance);
            ground_motion_fields(&request, Some(&filter))
        }
    })?;
    mon.flush();

    if let Some(metrics) = monitor.metrics() {
        let mode = match config.gmf_mode {
            GmfMode::Streaming => "streaming",
            GmfMode::Bulk => "bulk",
        };
        metrics.record_realizations(mode, realizations);
    }
    Ok(fields)
}

// ─────────────────────────────────────────────
// 4. run_scenario
// ─────────────────────────────────────────────

/// Risk model matching the calculation mode, validated
fn risk_model_for(mode: CalculationMode, spec: Option<&RiskModelSpec>) -> Result<Arc<dyn RiskModel>> {
    let spec = spec.ok_or_else(|| ScenarioError::config(format!("{} requires a risk model", mode)))?;
    match (mode, spec) {
        (CalculationMode::ScenarioRisk, RiskModelSpec::Vulnerability(_))
        | (CalculationMode::ScenarioDamage, RiskModelSpec::Fragility(_)) => spec.build(),
        _ => Err(ScenarioError::config(format!(
            "{} cannot run with a {} model",
            mode,
            spec.kind()
        ))),
    }
}

/// Run a scenario damage or scenario risk calculation.
///
/// Configuration, models and names are validated before any simulation.
pub fn run_scenario(
    config: &ScenarioConfig,
    inputs: &ScenarioInputs,
    registry: &GsimRegistry,
    executor: &dyn TaskExecutor,
    monitor: &Monitor,
) -> Result<ScenarioOutcome> {
    config.validate()?;
    let mode = config.mode()?;
    let gsim = registry.get(&config.gsim)?;
    for imt in config.imts()? {
        if !gsim.supports(&imt) {
            return Err(ScenarioError::config(format!("{} does not support {}", gsim.name(), imt)));
        }
    }
    let risk_model = risk_model_for(mode, inputs.risk_model.as_ref())?;

    info!("Reading the exposure");
    let mut assets_by_site = AssetsBySite::from_assets(inputs.assets.iter().cloned());
    let known = inputs.sites.ids();
    let orphans = assets_by_site.assets().filter(|a| !known.contains(&a.site_id)).count();
    if orphans > 0 {
        warn!(orphans, "Assets located at unknown sites are ignored");
    }

    info!("Computing the GMFs");
    let gmfs = calc_gmfs(config, &inputs.sites, &inputs.rupture, registry, monitor)?;

    if mode == CalculationMode::ScenarioRisk {
        add_epsilons(
            &mut assets_by_site,
            config.number_of_ground_motion_fields as usize,
            config.master_seed,
            config.asset_correlation,
        )?;
    }

    info!("Preparing the risk input");
    let risk_inputs = build_risk_inputs(&gmfs, &assets_by_site, asset_count_weight)?;
    if let Some(metrics) = monitor.metrics() {
        metrics.record_risk_inputs(risk_inputs.len(), risk_inputs.iter().map(|ri| ri.weight).sum());
    }

    let tasks = config.effective_concurrent_tasks(executor.num_workers());
    let mon = monitor.copy(mode.as_str());
    let outcome = mon.measure(|| match mode {
        CalculationMode::ScenarioDamage => apply_reduce(
            calc_damage::<dyn RiskModel>,
            risk_inputs,
            risk_model,
            add_dicts,
            ResultMap::new(),
            |ri: &RiskInput| ri.imt,
            |ri: &RiskInput| ri.weight,
            tasks,
            executor,
        )
        .map(ScenarioOutcome::Damage),
        CalculationMode::ScenarioRisk => apply_reduce(
            calc_risk::<dyn RiskModel>,
            risk_inputs,
            risk_model,
            add_dicts,
            ResultMap::new(),
            |ri: &RiskInput| ri.imt,
            |ri: &RiskInput| ri.weight,
            tasks,
            executor,
        )
        .map(ScenarioOutcome::Risk),
    })?;
    mon.flush();

    info!(mode = %mode, keys = outcome.len(), "Scenario complete");
    Ok(outcome)
}
