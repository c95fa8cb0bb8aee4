//! Async scenario runtime
//!
//! ## Table of Contents
//! - **ScenarioRuntime**: Loads inputs, runs the calculation off the async
//!   executor, stores the results
//! - **CalculationReport / GmfReport**: What a run produced

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::calculators::{calc_gmfs, run_scenario, ScenarioInputs};
use crate::config::ScenarioConfig;
use crate::error::{Result, ScenarioError};
use crate::filters::count_ruptures_in_range;
use crate::gsim::GsimRegistry;
use crate::metrics::ScenarioMetrics;
use crate::monitor::Monitor;
use crate::parallel::TaskExecutor;
use crate::result_map::ScenarioOutcome;
use crate::storage::BoxedRepository;

/// Outcome of a risk or damage run
#[derive(Debug, Clone)]
pub struct CalculationReport {
    /// Calculation id, also the storage key
    pub calc_id: Uuid,
    /// Merged result
    pub outcome: ScenarioOutcome,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

/// Outcome of a hazard-only run
#[derive(Debug, Clone, PartialEq)]
pub struct GmfReport {
    /// Calculation id, also the storage key
    pub calc_id: Uuid,
    /// Stored (IMT, site) records
    pub records: usize,
    /// Ruptures of the input sources with at least one site in range.
    /// Only counted; the fields come from the scenario rupture.
    pub ruptures_in_range: usize,
}

/// Main scenario runtime
pub struct ScenarioRuntime {
    config: ScenarioConfig,
    repository: BoxedRepository,
    registry: Arc<GsimRegistry>,
    executor: Arc<dyn TaskExecutor>,
    metrics: Option<Arc<ScenarioMetrics>>,
}

impl ScenarioRuntime {
    /// Create a runtime (use ScenarioBuilder instead)
    pub(crate) fn new(
        config: ScenarioConfig,
        repository: BoxedRepository,
        registry: Arc<GsimRegistry>,
        executor: Arc<dyn TaskExecutor>,
        metrics: Option<Arc<ScenarioMetrics>>,
    ) -> Self {
        Self {
            config,
            repository,
            registry,
            executor,
            metrics,
        }
    }

    /// Job configuration
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Get metrics instance
    pub fn metrics(&self) -> Option<&Arc<ScenarioMetrics>> {
        self.metrics.as_ref()
    }

    /// Get the repository
    pub fn repository(&self) -> &BoxedRepository {
        &self.repository
    }

    /// Get the executor
    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    fn monitor(&self, operation: &str) -> Monitor {
        match &self.metrics {
            Some(m) => Monitor::with_metrics(operation, Arc::clone(m)),
            None => Monitor::new(operation),
        }
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ScenarioError::internal(format!("calculation task failed: {}", e)))?
    }

    /// Run the configured risk or damage calculation and store its outcome
    pub async fn run(&self) -> Result<CalculationReport> {
        let calc_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %calc_id,
            mode = %self.config.calculation_mode,
            repository = self.repository.name(),
            executor = self.executor.name(),
            "Starting calculation"
        );

        self.config.validate()?;
        let inputs = self.repository.load_inputs(&self.config).await?;

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let monitor = self.monitor("scenario");
        let outcome = Self::blocking(move || {
            run_scenario(&config, &inputs, &registry, executor.as_ref(), &monitor)
        })
        .await
        .map_err(|e| {
            error!(%calc_id, error = %e, "Calculation failed");
            e
        })?;

        self.repository.store_results(calc_id, &outcome).await?;
        let finished_at = Utc::now();
        info!(
            %calc_id,
            keys = outcome.len(),
            seconds = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            "Calculation stored"
        );

        Ok(CalculationReport {
            calc_id,
            outcome,
            started_at,
            finished_at,
        })
    }

    /// Simulate and store the scenario rupture's ground-motion fields, and
    /// count how many ruptures of the input sources reach the sites
    pub async fn run_gmfs(&self) -> Result<GmfReport> {
        let calc_id = Uuid::new_v4();
        self.config.validate()?;
        let inputs: ScenarioInputs = self.repository.load_inputs(&self.config).await?;

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let monitor = self.monitor("hazard");
        let (records, ruptures_in_range) = Self::blocking(move || {
            let sources = inputs.seismic_sources();
            let ruptures_in_range =
                count_ruptures_in_range(&sources, &inputs.sites, config.maximum_distance, &monitor)?;
            let gmfs = calc_gmfs(&config, &inputs.sites, &inputs.rupture, &registry, &monitor)?;
            Ok((gmfs.to_records(), ruptures_in_range))
        })
        .await?;

        self.repository.store_gmfs(calc_id, &records).await?;
        info!(%calc_id, records = records.len(), ruptures_in_range, "Ground-motion fields stored");

        Ok(GmfReport {
            calc_id,
            records: records.len(),
            ruptures_in_range,
        })
    }
}

impl std::fmt::Debug for ScenarioRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRuntime")
            .field("config", &self.config)
            .field("repository", &self.repository.name())
            .field("executor", &self.executor.name())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
