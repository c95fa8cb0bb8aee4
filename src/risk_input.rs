//! Units of work for the risk and damage calculators

use tracing::debug;

use crate::error::{Result, ScenarioError};
use crate::exposure::{Asset, AssetsBySite};
use crate::gmf::GroundMotionFields;
use crate::imt::Imt;
use crate::site::SiteId;

/// Ground motion at one site for one IMT, with the assets located there
#[derive(Debug, Clone, PartialEq)]
pub struct RiskInput {
    /// Intensity measure type of `gmvs`
    pub imt: Imt,
    /// Site identifier
    pub site_id: SiteId,
    /// One ground-motion value per realization
    pub gmvs: Vec<f64>,
    /// Assets at the site
    pub assets: Vec<Asset>,
    /// Load-balancing weight; positive and finite
    pub weight: f64,
}

impl RiskInput {
    /// Create a risk input, rejecting unusable weights
    pub fn new(imt: Imt, site_id: SiteId, gmvs: Vec<f64>, assets: Vec<Asset>, weight: f64) -> Result<Self> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(ScenarioError::InvalidWeight {
                item: format!("{}@site {}", imt, site_id),
                weight,
            });
        }
        Ok(Self {
            imt,
            site_id,
            gmvs,
            assets,
            weight,
        })
    }

    /// Number of assets
    pub fn num_assets(&self) -> usize {
        self.assets.len()
    }
}

/// Default weight: the number of assets
pub fn asset_count_weight(assets: &[Asset]) -> f64 {
    assets.len() as f64
}

/// One risk input per (IMT, site) where the site has assets and the
/// ground motion is not identically zero. IMTs in sorted order, sites in
/// collection order.
pub fn build_risk_inputs<W>(gmfs: &GroundMotionFields, assets_by_site: &AssetsBySite, weight: W) -> Result<Vec<RiskInput>>
where
    W: Fn(&[Asset]) -> f64,
{
    let mut inputs = Vec::new();
    for (imt, matrix) in gmfs.iter() {
        for (row, site) in gmfs.sites().iter().enumerate() {
            let assets = assets_by_site.get(site.id);
            if assets.is_empty() {
                continue;
            }
            let gmvs: Vec<f64> = matrix.row(row).iter().copied().collect();
            if gmvs.iter().all(|v| *v == 0.0) {
                continue;
            }
            inputs.push(RiskInput::new(*imt, site.id, gmvs, assets.to_vec(), weight(assets))?);
        }
    }

    debug!(
        risk_inputs = inputs.len(),
        total_weight = inputs.iter().map(|ri| ri.weight).sum::<f64>(),
        "Built risk inputs"
    );
    Ok(inputs)
}
