//! # Ground-motion models
//!
//! Table of Contents:
//! 1. GroundMotionModel: trait consumed by the GMF simulator
//! 2. GsimRegistry: immutable name → model lookup, built once
//! 3. LinearAttenuation: reference log-linear model
//!
//! Models return means in natural-log units and the inter/intra-event
//! standard deviations separately, so the simulator can correlate the
//! intra-event part across sites.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;

use crate::error::{Result, ScenarioError};
use crate::imt::Imt;
use crate::site::SiteCollection;
use crate::source::Rupture;

// ─────────────────────────────────────────────
// 1. GroundMotionModel
// ─────────────────────────────────────────────

/// Per-site log-mean and standard deviations for one IMT
#[derive(Debug, Clone, PartialEq)]
pub struct GsimOutput {
    /// Mean of ln(ground motion)
    pub mean: DVector<f64>,
    /// Inter-event standard deviation (tau)
    pub inter: DVector<f64>,
    /// Intra-event standard deviation (phi)
    pub intra: DVector<f64>,
}

impl GsimOutput {
    /// Total standard deviation per site
    pub fn total(&self) -> DVector<f64> {
        self.inter.zip_map(&self.intra, |t, p| (t * t + p * p).sqrt())
    }
}

/// A ground-motion prediction equation
pub trait GroundMotionModel: Send + Sync + fmt::Debug {
    /// Registry name
    fn name(&self) -> &str;

    /// Whether the model defines this IMT
    fn supports(&self, imt: &Imt) -> bool;

    /// Log-mean and standard deviations at every site
    fn mean_and_stddevs(&self, rupture: &Rupture, sites: &SiteCollection, imt: &Imt) -> Result<GsimOutput>;
}

// ─────────────────────────────────────────────
// 2. GsimRegistry
// ─────────────────────────────────────────────

type GsimFactory = fn() -> Arc<dyn GroundMotionModel>;

/// Immutable lookup from model name to model constructor.
/// Build once at start-up and share by reference.
#[derive(Clone)]
pub struct GsimRegistry {
    factories: BTreeMap<String, GsimFactory>,
}

impl GsimRegistry {
    /// Start an empty registry builder
    pub fn builder() -> GsimRegistryBuilder {
        GsimRegistryBuilder {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the models shipped in this crate
    pub fn builtin() -> Self {
        Self::builder()
            .register(LinearAttenuation::NAME, || Arc::new(LinearAttenuation))
            .build()
    }

    /// Instantiate a model by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn GroundMotionModel>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| {
                ScenarioError::config(format!(
                    "unknown ground motion model '{}' (available: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    /// Whether a model is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for GsimRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GsimRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Builder for [`GsimRegistry`]
pub struct GsimRegistryBuilder {
    factories: BTreeMap<String, GsimFactory>,
}

impl GsimRegistryBuilder {
    /// Register a model constructor
    pub fn register(mut self, name: impl Into<String>, factory: GsimFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Freeze the registry
    pub fn build(self) -> GsimRegistry {
        GsimRegistry {
            factories: self.factories,
        }
    }
}

// ─────────────────────────────────────────────
// 3. LinearAttenuation
// ─────────────────────────────────────────────

/// Reference model:
/// `ln Y = c1 + c2 (M - 6) - c3 ln(sqrt(R² + h²)) + c4 ln(vs30 / 760)`
/// with constant tau and phi per IMT. Spectral coefficients are
/// interpolated in ln(T) between 0.1 s and 3 s, and linearly in T below 0.1 s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearAttenuation;

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    c1: f64,
    c2: f64,
    c3: f64,
    c4: f64,
    h: f64,
    tau: f64,
    phi: f64,
}

impl Coefficients {
    const fn new(c1: f64, c2: f64, c3: f64, c4: f64, h: f64, tau: f64, phi: f64) -> Self {
        Self { c1, c2, c3, c4, h, tau, phi }
    }

    fn lerp(&self, other: &Self, w: f64) -> Self {
        let mix = |a: f64, b: f64| a + (b - a) * w;
        Self {
            c1: mix(self.c1, other.c1),
            c2: mix(self.c2, other.c2),
            c3: mix(self.c3, other.c3),
            c4: mix(self.c4, other.c4),
            h: mix(self.h, other.h),
            tau: mix(self.tau, other.tau),
            phi: mix(self.phi, other.phi),
        }
    }
}

const PGA: Coefficients = Coefficients::new(0.85, 0.55, 1.00, -0.40, 6.0, 0.35, 0.55);
const PGV: Coefficients = Coefficients::new(3.90, 0.90, 1.00, -0.60, 6.0, 0.30, 0.55);
const PGD: Coefficients = Coefficients::new(1.90, 1.30, 1.00, -0.70, 6.0, 0.40, 0.65);

/// (period, coefficients) for spectral acceleration
const SA_TABLE: [(f64, Coefficients); 4] = [
    (0.1, Coefficients::new(1.35, 0.50, 1.05, -0.35, 6.0, 0.37, 0.58)),
    (0.3, Coefficients::new(1.25, 0.60, 0.98, -0.50, 6.0, 0.36, 0.60)),
    (1.0, Coefficients::new(0.05, 0.85, 0.92, -0.70, 6.0, 0.38, 0.63)),
    (3.0, Coefficients::new(-1.45, 1.10, 0.88, -0.75, 6.0, 0.40, 0.65)),
];

impl LinearAttenuation {
    /// Registry name
    pub const NAME: &'static str = "LinearAttenuation";

    fn coefficients(imt: &Imt) -> Option<Coefficients> {
        match imt {
            Imt::Pga => Some(PGA),
            Imt::Pgv => Some(PGV),
            Imt::Pgd => Some(PGD),
            Imt::Sa { period, .. } => {
                let t = *period;
                let (t_min, first) = SA_TABLE[0];
                if t < t_min {
                    return Some(PGA.lerp(&first, t / t_min));
                }
                SA_TABLE.windows(2).find_map(|pair| {
                    let (t0, c0) = pair[0];
                    let (t1, c1) = pair[1];
                    (t >= t0 && t <= t1).then(|| c0.lerp(&c1, (t.ln() - t0.ln()) / (t1.ln() - t0.ln())))
                })
            }
        }
    }
}

impl GroundMotionModel for LinearAttenuation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, imt: &Imt) -> bool {
        Self::coefficients(imt).is_some()
    }

    fn mean_and_stddevs(&self, rupture: &Rupture, sites: &SiteCollection, imt: &Imt) -> Result<GsimOutput> {
        let c = Self::coefficients(imt).ok_or_else(|| {
            ScenarioError::config(format!("{} does not support {}", Self::NAME, imt))
        })?;

        let distances = rupture.distances(sites);
        let magnitude_term = c.c1 + c.c2 * (rupture.magnitude() - 6.0);
        let mean = DVector::from_iterator(
            sites.len(),
            sites.iter().zip(&distances).map(|(site, r)| {
                magnitude_term - c.c3 * (r * r + c.h * c.h).sqrt().ln() + c.c4 * (site.vs30 / 760.0).ln()
            }),
        );

        Ok(GsimOutput {
            mean,
            inter: DVector::from_element(sites.len(), c.tau),
            intra: DVector::from_element(sites.len(), c.phi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{Location, Site};

    fn two_sites() -> SiteCollection {
        SiteCollection::new(vec![Site::new(0, 0.0, 0.1), Site::new(1, 0.0, 0.5)]).unwrap()
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GsimRegistry::builtin();
        assert!(registry.contains("LinearAttenuation"));
        let gsim = registry.get("LinearAttenuation").unwrap();
        assert_eq!(gsim.name(), "LinearAttenuation");
    }

    #[test]
    fn test_unknown_gsim_is_config_error() {
        let err = GsimRegistry::builtin().get("BooreAtkinson2008").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_motion_decays_with_distance() {
        let rupture = Rupture::point(6.5, 0.0, Location::with_depth(0.0, 0.0, 10.0)).unwrap();
        let out = LinearAttenuation
            .mean_and_stddevs(&rupture, &two_sites(), &Imt::Pga)
            .unwrap();
        assert!(out.mean[0] > out.mean[1]);
        assert_eq!(out.inter.len(), 2);
        assert!((out.total()[0] - (0.35f64.powi(2) + 0.55f64.powi(2)).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_spectral_support_range() {
        assert!(LinearAttenuation.supports(&Imt::sa(0.05)));
        assert!(LinearAttenuation.supports(&Imt::sa(0.3)));
        assert!(LinearAttenuation.supports(&Imt::sa(3.0)));
        assert!(!LinearAttenuation.supports(&Imt::sa(5.0)));
    }

    #[test]
    fn test_interpolation_hits_table_nodes() {
        let c = LinearAttenuation::coefficients(&Imt::sa(1.0)).unwrap();
        assert!((c.c1 - 0.05).abs() < 1e-12);
    }
}
