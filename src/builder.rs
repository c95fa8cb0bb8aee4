//! ScenarioBuilder for configuring and constructing runtimes
//!
//! ## Table of Contents
//! - **ScenarioBuilder**: Builder pattern for ScenarioRuntime

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::calculators::ScenarioInputs;
use crate::config::ScenarioConfig;
use crate::error::{Result, ScenarioError};
use crate::gsim::GsimRegistry;
use crate::metrics::ScenarioMetrics;
use crate::parallel::{RayonExecutor, TaskExecutor};
use crate::runtime::ScenarioRuntime;
use crate::storage::{BoxedRepository, FileRepository, MemoryRepository};

/// Builder for constructing ScenarioRuntime instances
pub struct ScenarioBuilder {
    config: Option<ScenarioConfig>,
    config_path: Option<PathBuf>,
    repository: Option<BoxedRepository>,
    registry: Option<Arc<GsimRegistry>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    num_threads: Option<usize>,
    metrics_enabled: bool,
}

impl ScenarioBuilder {
    /// Create a new builder with metrics enabled and no job
    pub fn new() -> Self {
        Self {
            config: None,
            config_path: None,
            repository: None,
            registry: None,
            executor: None,
            num_threads: None,
            metrics_enabled: true,
        }
    }

    /// Set the job configuration
    pub fn with_config(mut self, config: ScenarioConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the job configuration from a TOML or JSON file at build time
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set a custom repository
    pub fn with_repository(mut self, repository: BoxedRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Serve inputs from memory
    pub fn with_inputs(self, inputs: ScenarioInputs) -> Self {
        self.with_repository(Arc::new(MemoryRepository::new(inputs)))
    }

    /// Read an inputs bundle and write documents under `output_dir`
    pub fn with_files(self, inputs: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let repo = FileRepository::open(inputs.into(), output_dir.into())?;
        Ok(self.with_repository(Arc::new(repo)))
    }

    /// Set the GSIM registry
    pub fn with_registry(mut self, registry: GsimRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Set a custom task executor
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Size of the default rayon pool
    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Enable or disable metrics
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Build the runtime
    pub fn build(self) -> Result<ScenarioRuntime> {
        let config = match (self.config, &self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => ScenarioConfig::load(path)?,
            (None, None) => return Err(ScenarioError::config("no job configuration given")),
        };
        config.validate()?;

        let repository = self
            .repository
            .ok_or_else(|| ScenarioError::config("no repository or inputs given"))?;

        let metrics = if self.metrics_enabled {
            Some(Arc::new(ScenarioMetrics::new()?))
        } else {
            None
        };

        let executor: Arc<dyn TaskExecutor> = match self.executor {
            Some(e) => e,
            None => {
                let threads = self.num_threads.unwrap_or_else(rayon::current_num_threads);
                let pool = match &metrics {
                    Some(m) => RayonExecutor::with_metrics(threads, Arc::clone(m))?,
                    None => RayonExecutor::new(threads)?,
                };
                Arc::new(pool)
            }
        };

        let registry = self.registry.unwrap_or_else(|| Arc::new(GsimRegistry::builtin()));

        info!(
            mode = %config.calculation_mode,
            gsim = %config.gsim,
            repository = repository.name(),
            executor = executor.name(),
            "Building scenario runtime"
        );

        Ok(ScenarioRuntime::new(config, repository, registry, executor, metrics))
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::InlineExecutor;
    use crate::site::{Location, Site, SiteCollection};
    use crate::source::Rupture;

    fn config() -> ScenarioConfig {
        ScenarioConfig::new("scenario_damage", 50.0, vec!["PGA"], "LinearAttenuation")
    }

    fn inputs() -> ScenarioInputs {
        ScenarioInputs::new(
            SiteCollection::new(vec![Site::new(1, 0.0, 0.0)]).unwrap(),
            Vec::new(),
            Rupture::point(5.0, 0.0, Location::with_depth(0.0, 0.0, 5.0)).unwrap(),
            None,
        )
    }

    #[test]
    fn test_builder_default_executor() {
        let runtime = ScenarioBuilder::new()
            .with_config(config())
            .with_inputs(inputs())
            .with_threads(2)
            .build()
            .unwrap();
        assert_eq!(runtime.executor().name(), "rayon");
        assert!(runtime.metrics().is_some());
    }

    #[test]
    fn test_builder_custom_executor_without_metrics() {
        let runtime = ScenarioBuilder::new()
            .with_config(config())
            .with_inputs(inputs())
            .with_executor(Arc::new(InlineExecutor::new()))
            .with_metrics(false)
            .build()
            .unwrap();
        assert_eq!(runtime.executor().name(), "inline");
        assert!(runtime.metrics().is_none());
    }

    #[test]
    fn test_builder_requires_config_and_repository() {
        assert!(ScenarioBuilder::new().with_inputs(inputs()).build().unwrap_err().is_config());
        assert!(ScenarioBuilder::new().with_config(config()).build().unwrap_err().is_config());
    }

    #[test]
    fn test_builder_loads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(
            &path,
            "calculation_mode = \"scenario_damage\"\nmaximum_distance = 80.0\n\
             intensity_measure_types = [\"PGA\"]\ngsim = \"LinearAttenuation\"\n",
        )
        .unwrap();

        let runtime = ScenarioBuilder::new()
            .with_config_path(&path)
            .with_inputs(inputs())
            .build()
            .unwrap();
        assert_eq!(runtime.config().maximum_distance, 80.0);
    }
}
