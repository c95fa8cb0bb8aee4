//! # Seismic sources and ruptures
//!
//! Table of Contents:
//! 1. Mesh: rupture surface discretisation
//! 2. Rupture: one earthquake realization
//! 3. SeismicSource: trait for rupture generators
//! 4. RuptureSetSource: source with a fixed list of ruptures
//! 5. PointSource: lazy point ruptures over a magnitude set

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScenarioError};
use crate::site::{Location, SiteCollection};

// ─────────────────────────────────────────────
// 1. Mesh
// ─────────────────────────────────────────────

/// Points discretising a rupture surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mesh {
    points: Vec<Location>,
}

impl Mesh {
    /// Build a mesh; degenerate (empty) or invalid meshes are rejected
    pub fn new(points: Vec<Location>) -> Result<Self> {
        if points.is_empty() {
            return Err(ScenarioError::geometry("rupture mesh has no points"));
        }
        for p in &points {
            p.validate()?;
        }
        Ok(Self { points })
    }

    /// Mesh points
    pub fn points(&self) -> &[Location] {
        &self.points
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a validated mesh
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ─────────────────────────────────────────────
// 2. Rupture
// ─────────────────────────────────────────────

/// A single earthquake rupture. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRupture", into = "RawRupture")]
pub struct Rupture {
    magnitude: f64,
    rake: f64,
    hypocenter: Location,
    surface: Mesh,
}

#[derive(Serialize, Deserialize)]
struct RawRupture {
    magnitude: f64,
    #[serde(default)]
    rake: f64,
    hypocenter: Location,
    #[serde(default)]
    surface: Vec<Location>,
}

impl Rupture {
    /// Build a rupture from its surface mesh
    pub fn new(magnitude: f64, rake: f64, hypocenter: Location, surface: Mesh) -> Result<Self> {
        if !(magnitude.is_finite() && magnitude > 0.0) {
            return Err(ScenarioError::geometry(format!("invalid magnitude {}", magnitude)));
        }
        if !rake.is_finite() {
            return Err(ScenarioError::geometry(format!("invalid rake {}", rake)));
        }
        hypocenter.validate()?;
        Ok(Self {
            magnitude,
            rake,
            hypocenter,
            surface,
        })
    }

    /// Point rupture: the surface is the hypocentre itself
    pub fn point(magnitude: f64, rake: f64, hypocenter: Location) -> Result<Self> {
        let surface = Mesh::new(vec![hypocenter])?;
        Self::new(magnitude, rake, hypocenter, surface)
    }

    /// Moment magnitude
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Rake angle in degrees
    pub fn rake(&self) -> f64 {
        self.rake
    }

    /// Hypocentre
    pub fn hypocenter(&self) -> &Location {
        &self.hypocenter
    }

    /// Surface mesh
    pub fn surface(&self) -> &Mesh {
        &self.surface
    }

    /// Closest distance (km) from each site to the rupture surface
    pub fn distances(&self, sites: &SiteCollection) -> Vec<f64> {
        sites.min_distances(self.surface.points())
    }
}

impl TryFrom<RawRupture> for Rupture {
    type Error = ScenarioError;

    fn try_from(raw: RawRupture) -> Result<Self> {
        let surface = if raw.surface.is_empty() {
            Mesh::new(vec![raw.hypocenter])?
        } else {
            Mesh::new(raw.surface)?
        };
        Self::new(raw.magnitude, raw.rake, raw.hypocenter, surface)
    }
}

impl From<Rupture> for RawRupture {
    fn from(r: Rupture) -> Self {
        Self {
            magnitude: r.magnitude,
            rake: r.rake,
            hypocenter: r.hypocenter,
            surface: r.surface.points,
        }
    }
}

// ─────────────────────────────────────────────
// 3. SeismicSource
// ─────────────────────────────────────────────

/// Boxed lazy rupture sequence
pub type RuptureIter<'a> = Box<dyn Iterator<Item = Result<Rupture>> + Send + 'a>;

/// A seismic source capable of producing ruptures
pub trait SeismicSource: Send + Sync + fmt::Debug {
    /// Source identifier
    fn source_id(&self) -> &str;

    /// Points approximating the region any rupture of this source can occupy
    fn rough_geometry(&self) -> &[Location];

    /// Cheap filter: sites within `max_distance` km of the rough geometry
    fn filter_sites_by_distance_to_source(
        &self,
        max_distance: f64,
        sites: &SiteCollection,
    ) -> Result<Option<SiteCollection>> {
        Ok(sites.filter_by_distance(self.rough_geometry(), max_distance))
    }

    /// Lazily generate the source's ruptures
    fn iter_ruptures(&self) -> RuptureIter<'_>;
}

// ─────────────────────────────────────────────
// 4. RuptureSetSource
// ─────────────────────────────────────────────

/// A source wrapping an explicit list of ruptures
#[derive(Debug, Clone)]
pub struct RuptureSetSource {
    id: String,
    ruptures: Vec<Rupture>,
    outline: Vec<Location>,
}

impl RuptureSetSource {
    /// Create a source from its ruptures
    pub fn new(id: impl Into<String>, ruptures: Vec<Rupture>) -> Self {
        let outline = ruptures
            .iter()
            .flat_map(|r| r.surface().points().iter().copied())
            .collect();
        Self {
            id: id.into(),
            ruptures,
            outline,
        }
    }
}

impl SeismicSource for RuptureSetSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn rough_geometry(&self) -> &[Location] {
        &self.outline
    }

    fn iter_ruptures(&self) -> RuptureIter<'_> {
        Box::new(self.ruptures.iter().cloned().map(Ok))
    }
}

// ─────────────────────────────────────────────
// 5. PointSource
// ─────────────────────────────────────────────

/// A point source producing one point rupture per magnitude
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSource {
    /// Source identifier
    pub id: String,
    /// Hypocentre shared by every rupture
    pub location: Location,
    /// Magnitudes to generate, in order
    pub magnitudes: Vec<f64>,
    /// Rake of the generated ruptures
    #[serde(default)]
    pub rake: f64,
    #[serde(skip)]
    outline: Vec<Location>,
}

impl PointSource {
    /// Create a point source
    pub fn new(id: impl Into<String>, location: Location, magnitudes: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            location,
            magnitudes,
            rake: 0.0,
            outline: vec![location],
        }
    }
}

impl SeismicSource for PointSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn rough_geometry(&self) -> &[Location] {
        if self.outline.is_empty() {
            std::slice::from_ref(&self.location)
        } else {
            &self.outline
        }
    }

    fn iter_ruptures(&self) -> RuptureIter<'_> {
        Box::new(
            self.magnitudes
                .iter()
                .map(move |&m| Rupture::point(m, self.rake, self.location)),
        )
    }
}
