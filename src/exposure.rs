//! Exposure: assets and their grouping by site

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::epsilons::EpsilonRow;
use crate::error::{Result, ScenarioError};
use crate::site::{SiteCollection, SiteId};

/// Insurance terms, as fractions of the asset value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Insurance {
    /// Deductible fraction
    pub deductible: f64,
    /// Insured limit fraction
    pub limit: f64,
}

/// An exposed asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset identifier
    pub id: String,
    /// Building typology
    pub taxonomy: String,
    /// Number of units (buildings, people, ...)
    #[serde(default = "default_number")]
    pub number: f64,
    /// Site the asset is located at
    pub site_id: SiteId,
    /// Value per loss type
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Insurance terms
    #[serde(default)]
    pub insurance: Option<Insurance>,
    /// Row of the taxonomy's epsilon matrix, attached in risk mode
    #[serde(skip)]
    pub epsilons: Option<EpsilonRow>,
}

fn default_number() -> f64 {
    1.0
}

impl Asset {
    /// Create an asset with no values
    pub fn new(id: impl Into<String>, taxonomy: impl Into<String>, number: f64, site_id: SiteId) -> Self {
        Self {
            id: id.into(),
            taxonomy: taxonomy.into(),
            number,
            site_id,
            values: BTreeMap::new(),
            insurance: None,
            epsilons: None,
        }
    }

    /// Set the value for a loss type
    pub fn with_value(mut self, loss_type: impl Into<String>, value: f64) -> Self {
        self.values.insert(loss_type.into(), value);
        self
    }

    /// Set insurance terms
    pub fn with_insurance(mut self, deductible: f64, limit: f64) -> Self {
        self.insurance = Some(Insurance { deductible, limit });
        self
    }

    /// Value for a loss type
    pub fn value(&self, loss_type: &str) -> Option<f64> {
        self.values.get(loss_type).copied()
    }
}

/// Assets grouped by site id; within a site, input order is kept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetsBySite {
    by_site: BTreeMap<SiteId, Vec<Asset>>,
}

impl AssetsBySite {
    /// Group a flat list of assets
    pub fn from_assets(assets: impl IntoIterator<Item = Asset>) -> Self {
        let mut by_site: BTreeMap<SiteId, Vec<Asset>> = BTreeMap::new();
        for asset in assets {
            by_site.entry(asset.site_id).or_default().push(asset);
        }
        Self { by_site }
    }

    /// Build from lists aligned with the rows of a site collection
    pub fn from_aligned(sites: &SiteCollection, lists: Vec<Vec<Asset>>) -> Result<Self> {
        if lists.len() != sites.len() {
            return Err(ScenarioError::shape("assets by site", (sites.len(), 1), (lists.len(), 1)));
        }
        let mut by_site = BTreeMap::new();
        for (site, mut assets) in sites.iter().zip(lists) {
            if assets.is_empty() {
                continue;
            }
            for asset in &mut assets {
                asset.site_id = site.id;
            }
            by_site.insert(site.id, assets);
        }
        Ok(Self { by_site })
    }

    /// Assets at a site (empty slice when there are none)
    pub fn get(&self, site_id: SiteId) -> &[Asset] {
        self.by_site.get(&site_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sites and their assets, by increasing site id
    pub fn iter(&self) -> impl Iterator<Item = (SiteId, &[Asset])> {
        self.by_site.iter().map(|(id, assets)| (*id, assets.as_slice()))
    }

    /// Every asset, mutably, in iteration order
    pub fn assets_mut(&mut self) -> impl Iterator<Item = &mut Asset> {
        self.by_site.values_mut().flatten()
    }

    /// Every asset in iteration order
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.by_site.values().flatten()
    }

    /// Number of sites with at least one asset
    pub fn num_sites(&self) -> usize {
        self.by_site.len()
    }

    /// Total number of assets
    pub fn num_assets(&self) -> usize {
        self.by_site.values().map(Vec::len).sum()
    }

    /// Whether there are no assets
    pub fn is_empty(&self) -> bool {
        self.by_site.is_empty()
    }
}
