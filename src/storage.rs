//! Repositories for scenario inputs and results
//!
//! ## Table of Contents
//! - **ScenarioRepository**: Trait for input/result backends
//! - **MemoryRepository**: In-memory repository (tests, embedding)
//! - **FileRepository**: JSON inputs bundle in, JSON documents out
//! - **ResultDocument / GmfDocument**: Stored result shapes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calculators::ScenarioInputs;
use crate::config::ScenarioConfig;
use crate::error::{Result, ScenarioError};
use crate::gmf::GmfRecord;
use crate::result_map::{OutcomeRecord, ScenarioOutcome};

/// Trait for input/result backends
#[async_trait]
pub trait ScenarioRepository: Send + Sync {
    /// Load the inputs of a job
    async fn load_inputs(&self, config: &ScenarioConfig) -> Result<ScenarioInputs>;

    /// Persist the outcome of a calculation
    async fn store_results(&self, calc_id: Uuid, outcome: &ScenarioOutcome) -> Result<()>;

    /// Persist ground-motion fields
    async fn store_gmfs(&self, calc_id: Uuid, gmfs: &[GmfRecord]) -> Result<()>;

    /// Repository name for logging
    fn name(&self) -> &str;
}

/// Stored calculation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// Calculation id
    pub calc_id: Uuid,
    /// `scenario_risk` or `scenario_damage`
    pub mode: String,
    /// When the document was written
    pub created_at: DateTime<Utc>,
    /// Flattened outcome
    pub records: Vec<OutcomeRecord>,
}

impl ResultDocument {
    fn new(calc_id: Uuid, outcome: &ScenarioOutcome) -> Self {
        Self {
            calc_id,
            mode: outcome.mode().to_string(),
            created_at: Utc::now(),
            records: outcome.to_records(),
        }
    }
}

/// Stored ground-motion fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmfDocument {
    /// Calculation id
    pub calc_id: Uuid,
    /// When the document was written
    pub created_at: DateTime<Utc>,
    /// One record per (IMT, site)
    pub records: Vec<GmfRecord>,
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inputs: Option<ScenarioInputs>,
    results: RwLock<HashMap<Uuid, ResultDocument>>,
    gmfs: RwLock<HashMap<Uuid, GmfDocument>>,
}

impl MemoryRepository {
    /// Repository serving the given inputs
    pub fn new(inputs: ScenarioInputs) -> Self {
        Self {
            inputs: Some(inputs),
            ..Self::default()
        }
    }

    /// Stored outcome of a calculation
    pub fn results(&self, calc_id: &Uuid) -> Option<ResultDocument> {
        self.results.read().get(calc_id).cloned()
    }

    /// Stored fields of a calculation
    pub fn gmfs(&self, calc_id: &Uuid) -> Option<GmfDocument> {
        self.gmfs.read().get(calc_id).cloned()
    }
}

#[async_trait]
impl ScenarioRepository for MemoryRepository {
    async fn load_inputs(&self, config: &ScenarioConfig) -> Result<ScenarioInputs> {
        debug!(description = %config.description, "Loading inputs from memory");
        self.inputs
            .clone()
            .ok_or_else(|| ScenarioError::storage("memory repository holds no inputs"))
    }

    async fn store_results(&self, calc_id: Uuid, outcome: &ScenarioOutcome) -> Result<()> {
        self.results.write().insert(calc_id, ResultDocument::new(calc_id, outcome));
        Ok(())
    }

    async fn store_gmfs(&self, calc_id: Uuid, gmfs: &[GmfRecord]) -> Result<()> {
        let doc = GmfDocument {
            calc_id,
            created_at: Utc::now(),
            records: gmfs.to_vec(),
        };
        self.gmfs.write().insert(calc_id, doc);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// File-based repository
///
/// Inputs come from one JSON bundle. Results are written under
/// `<output_dir>/<calc_id>/`.
#[derive(Debug, Clone)]
pub struct FileRepository {
    inputs_path: PathBuf,
    output_dir: PathBuf,
}

impl FileRepository {
    /// Open a repository; the output directory is created on first write
    pub fn open(inputs_path: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<Self> {
        let inputs_path = inputs_path.as_ref().to_path_buf();
        if !inputs_path.is_file() {
            return Err(ScenarioError::storage(format!(
                "inputs bundle {} not found",
                inputs_path.display()
            )));
        }
        let output_dir = output_dir.as_ref().to_path_buf();
        info!(inputs = %inputs_path.display(), output = %output_dir.display(), "File repository opened");
        Ok(Self {
            inputs_path,
            output_dir,
        })
    }

    /// Directory holding the documents of a calculation
    pub fn calc_dir(&self, calc_id: Uuid) -> PathBuf {
        self.output_dir.join(calc_id.to_string())
    }

    /// Path of the outcome document
    pub fn results_path(&self, calc_id: Uuid) -> PathBuf {
        self.calc_dir(calc_id).join("outcome.json")
    }

    /// Path of the GMF document
    pub fn gmfs_path(&self, calc_id: Uuid) -> PathBuf {
        self.calc_dir(calc_id).join("gmfs.json")
    }

    async fn write_json<T: Serialize + Sync>(&self, path: PathBuf, value: &T) -> Result<()> {
        let contents = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScenarioError::storage(format!("Failed to create dir: {}", e)))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| ScenarioError::storage(format!("Failed to write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Document written");
        Ok(())
    }
}

#[async_trait]
impl ScenarioRepository for FileRepository {
    async fn load_inputs(&self, config: &ScenarioConfig) -> Result<ScenarioInputs> {
        let bytes = tokio::fs::read(&self.inputs_path)
            .await
            .map_err(|e| ScenarioError::storage(format!("Failed to read inputs: {}", e)))?;
        let inputs: ScenarioInputs = serde_json::from_slice(&bytes)?;
        info!(
            description = %config.description,
            sites = inputs.sites.len(),
            assets = inputs.assets.len(),
            sources = inputs.sources.len(),
            "Inputs loaded"
        );
        Ok(inputs)
    }

    async fn store_results(&self, calc_id: Uuid, outcome: &ScenarioOutcome) -> Result<()> {
        self.write_json(self.results_path(calc_id), &ResultDocument::new(calc_id, outcome))
            .await
    }

    async fn store_gmfs(&self, calc_id: Uuid, gmfs: &[GmfRecord]) -> Result<()> {
        let doc = GmfDocument {
            calc_id,
            created_at: Utc::now(),
            records: gmfs.to_vec(),
        };
        self.write_json(self.gmfs_path(calc_id), &doc).await
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Type alias for a shared repository
pub type BoxedRepository = Arc<dyn ScenarioRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imt::Imt;
    use crate::result_map::ResultMap;
    use crate::riskmodel::{FragilityFunction, FragilityModel, RiskModelSpec};
    use crate::site::{Location, Site, SiteCollection};
    use crate::source::{PointSource, Rupture};
    use crate::exposure::Asset;

    fn inputs() -> ScenarioInputs {
        let sites = SiteCollection::new(vec![Site::new(1, 0.0, 0.1)]).unwrap();
        let rupture = Rupture::point(6.0, 90.0, Location::with_depth(0.0, 0.0, 5.0)).unwrap();
        let model = FragilityModel::new(vec!["none".into(), "collapse".into()]).with_function(
            "RC",
            FragilityFunction::new(Imt::Pga, vec![0.1, 1.0], vec![vec![0.1, 0.9]]).unwrap(),
        );
        let mut inputs = ScenarioInputs::new(
            sites,
            vec![Asset::new("a1", "RC", 4.0, 1)],
            rupture,
            Some(RiskModelSpec::Fragility(model)),
        );
        inputs.sources.push(PointSource::new("p1", Location::new(0.5, 0.5), vec![5.0, 6.0]));
        inputs
    }

    fn config() -> ScenarioConfig {
        ScenarioConfig::new("scenario_damage", 100.0, vec!["PGA"], "LinearAttenuation")
    }

    fn outcome() -> ScenarioOutcome {
        let mut map = ResultMap::new();
        map.add("RC".to_string(), Some(vec![1.0, 3.0].into())).unwrap();
        ScenarioOutcome::Damage(map)
    }

    #[tokio::test]
    async fn test_memory_repository_round_trip() {
        let repo = MemoryRepository::new(inputs());
        assert_eq!(repo.load_inputs(&config()).await.unwrap(), inputs());

        let calc_id = Uuid::new_v4();
        repo.store_results(calc_id, &outcome()).await.unwrap();
        let doc = repo.results(&calc_id).unwrap();
        assert_eq!(doc.mode, "scenario_damage");
        assert_eq!(doc.records, outcome().to_records());
        assert!(repo.results(&Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_empty_memory_repository_is_storage_error() {
        let repo = MemoryRepository::default();
        let err = repo.load_inputs(&config()).await.unwrap_err();
        assert!(matches!(err, ScenarioError::Storage(_)));
    }

    #[tokio::test]
    async fn test_file_repository_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("inputs.json");
        std::fs::write(&bundle, serde_json::to_vec(&inputs()).unwrap()).unwrap();

        let repo = FileRepository::open(&bundle, dir.path().join("out")).unwrap();
        let loaded = repo.load_inputs(&config()).await.unwrap();
        assert_eq!(loaded.sites, inputs().sites);
        assert_eq!(loaded.assets, inputs().assets);
        assert_eq!(loaded.sources.len(), 1);

        let calc_id = Uuid::new_v4();
        repo.store_results(calc_id, &outcome()).await.unwrap();
        let text = std::fs::read_to_string(repo.results_path(calc_id)).unwrap();
        let doc: ResultDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.calc_id, calc_id);
        assert_eq!(doc.records, outcome().to_records());

        let record = GmfRecord {
            imt: "PGA".into(),
            sa_period: None,
            sa_damping: None,
            site_id: 1,
            lon: 0.0,
            lat: 0.1,
            gmvs: vec![0.2, 0.3],
        };
        repo.store_gmfs(calc_id, std::slice::from_ref(&record)).await.unwrap();
        let doc: GmfDocument = serde_json::from_slice(&std::fs::read(repo.gmfs_path(calc_id)).unwrap()).unwrap();
        assert_eq!(doc.records, vec![record]);
    }

    #[test]
    fn test_missing_bundle_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileRepository::open(dir.path().join("nope.json"), dir.path()).unwrap_err();
        assert!(matches!(err, ScenarioError::Storage(_)));
    }
}
