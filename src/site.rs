//! # Sites
//!
//! Table of Contents:
//! 1. Location: geographic point with depth
//! 2. Site: location plus site parameters
//! 3. SiteCollection: ordered sites with an R-tree for distance queries
//!
//! Distances are great-circle distances in kilometres. Distance queries do a
//! bounding-box pass on the R-tree first, then an exact haversine check.

use geo::{Distance, Haversine, Point};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScenarioError};

/// Kilometres per degree of latitude on the mean-radius sphere
const KM_PER_DEGREE: f64 = 111.194_926_644_558_73;

// ─────────────────────────────────────────────
// 1. Location
// ─────────────────────────────────────────────

/// A point on the earth (WGS84 degrees) with depth in km (positive down)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Longitude in degrees
    pub lon: f64,
    /// Latitude in degrees
    pub lat: f64,
    /// Depth in km
    #[serde(default)]
    pub depth: f64,
}

impl Location {
    /// Surface location
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat, depth: 0.0 }
    }

    /// Location at depth
    pub fn with_depth(lon: f64, lat: f64, depth: f64) -> Self {
        Self { lon, lat, depth }
    }

    /// Reject non-finite or out-of-range coordinates
    pub fn validate(&self) -> Result<()> {
        if !(self.lon.is_finite() && self.lat.is_finite() && self.depth.is_finite()) {
            return Err(ScenarioError::geometry(format!("non-finite coordinates {:?}", self)));
        }
        if self.lat.abs() > 90.0 || self.lon.abs() > 180.0 {
            return Err(ScenarioError::geometry(format!(
                "coordinates out of range: lon={}, lat={}",
                self.lon, self.lat
            )));
        }
        Ok(())
    }

    /// Great-circle distance to another location, ignoring depth (km)
    pub fn epicentral_distance(&self, other: &Location) -> f64 {
        let a = Point::new(self.lon, self.lat);
        let b = Point::new(other.lon, other.lat);
        Haversine::distance(a, b) / 1000.0
    }

    /// Straight-line distance including the depth difference (km)
    pub fn distance(&self, other: &Location) -> f64 {
        let horizontal = self.epicentral_distance(other);
        let vertical = self.depth - other.depth;
        (horizontal * horizontal + vertical * vertical).sqrt()
    }
}

// ─────────────────────────────────────────────
// 2. Site
// ─────────────────────────────────────────────

/// Site identifier, stable across filtering
pub type SiteId = u32;

/// A site of interest for ground-motion computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Site identifier
    pub id: SiteId,
    /// Site location (surface)
    pub location: Location,
    /// Average shear-wave velocity in the top 30 m (m/s)
    #[serde(default = "default_vs30")]
    pub vs30: f64,
}

fn default_vs30() -> f64 {
    760.0
}

impl Site {
    /// Create a site with the reference vs30
    pub fn new(id: SiteId, lon: f64, lat: f64) -> Self {
        Self {
            id,
            location: Location::new(lon, lat),
            vs30: default_vs30(),
        }
    }

    /// Set vs30
    pub fn with_vs30(mut self, vs30: f64) -> Self {
        self.vs30 = vs30;
        self
    }
}

// ─────────────────────────────────────────────
// 3. SiteCollection
// ─────────────────────────────────────────────

type IndexedSite = GeomWithData<[f64; 2], usize>;

/// Ordered collection of sites. Order is preserved by every filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<Site>", into = "Vec<Site>")]
pub struct SiteCollection {
    sites: Vec<Site>,
    index: RTree<IndexedSite>,
}

impl SiteCollection {
    /// Build a collection, validating every site
    pub fn new(sites: Vec<Site>) -> Result<Self> {
        for site in &sites {
            site.location.validate()?;
            if !(site.vs30.is_finite() && site.vs30 > 0.0) {
                return Err(ScenarioError::geometry(format!(
                    "site {} has invalid vs30 {}",
                    site.id, site.vs30
                )));
            }
        }
        Ok(Self::from_valid(sites))
    }

    fn from_valid(sites: Vec<Site>) -> Self {
        let entries = sites
            .iter()
            .enumerate()
            .map(|(i, s)| GeomWithData::new([s.location.lon, s.location.lat], i))
            .collect();
        Self {
            index: RTree::bulk_load(entries),
            sites,
        }
    }

    /// Number of sites
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Iterate in collection order
    pub fn iter(&self) -> std::slice::Iter<'_, Site> {
        self.sites.iter()
    }

    /// Site at a row position
    pub fn get(&self, row: usize) -> Option<&Site> {
        self.sites.get(row)
    }

    /// Sites as a slice
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Site ids in collection order
    pub fn ids(&self) -> Vec<SiteId> {
        self.sites.iter().map(|s| s.id).collect()
    }

    /// Keep the sites whose mask entry is true; `None` if nothing survives
    pub fn filter(&self, mask: &[bool]) -> Option<SiteCollection> {
        let kept: Vec<Site> = self
            .sites
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(s, _)| s.clone())
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(Self::from_valid(kept))
        }
    }

    /// Mask of sites lying within `max_distance` km of any of `points`
    pub fn within_distance_mask(&self, points: &[Location], max_distance: f64) -> Vec<bool> {
        let mut mask = vec![false; self.sites.len()];
        for point in points {
            for candidate in self.index.locate_in_envelope(&search_envelope(point, max_distance)) {
                let row = candidate.data;
                if !mask[row] && point.distance(&self.sites[row].location) <= max_distance {
                    mask[row] = true;
                }
            }
        }
        mask
    }

    /// Sites within `max_distance` km of any of `points`, in collection order
    pub fn filter_by_distance(&self, points: &[Location], max_distance: f64) -> Option<SiteCollection> {
        if points.is_empty() {
            return None;
        }
        self.filter(&self.within_distance_mask(points, max_distance))
    }

    /// Shortest distance (km) from each site to the nearest of `points`
    pub fn min_distances(&self, points: &[Location]) -> Vec<f64> {
        self.sites
            .iter()
            .map(|site| {
                points
                    .iter()
                    .map(|p| p.distance(&site.location))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }
}

/// Degree-space box guaranteed to contain every point within `radius_km`.
/// Depth only increases distance, so the surface box is conservative.
fn search_envelope(center: &Location, radius_km: f64) -> AABB<[f64; 2]> {
    let dlat = radius_km / KM_PER_DEGREE;
    let min_lat = (center.lat - dlat).max(-90.0);
    let max_lat = (center.lat + dlat).min(90.0);

    let widest = min_lat.abs().max(max_lat.abs());
    let cos_lat = widest.to_radians().cos();
    let (min_lon, max_lon) = if cos_lat <= 1e-6 || dlat / cos_lat >= 180.0 {
        (-180.0, 180.0)
    } else {
        let dlon = dlat / cos_lat;
        if center.lon - dlon < -180.0 || center.lon + dlon > 180.0 {
            // wraps the antimeridian
            (-180.0, 180.0)
        } else {
            (center.lon - dlon, center.lon + dlon)
        }
    };

    AABB::from_corners([min_lon, min_lat], [max_lon, max_lat])
}

impl Default for SiteCollection {
    fn default() -> Self {
        Self::from_valid(Vec::new())
    }
}

impl PartialEq for SiteCollection {
    fn eq(&self, other: &Self) -> bool {
        self.sites == other.sites
    }
}

impl TryFrom<Vec<Site>> for SiteCollection {
    type Error = ScenarioError;

    fn try_from(sites: Vec<Site>) -> Result<Self> {
        Self::new(sites)
    }
}

impl From<SiteCollection> for Vec<Site> {
    fn from(collection: SiteCollection) -> Self {
        collection.sites
    }
}

impl<'a> IntoIterator for &'a SiteCollection {
    type Item = &'a Site;
    type IntoIter = std::slice::Iter<'a, Site>;

    fn into_iter(self) -> Self::IntoIter {
        self.sites.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line_of_sites() -> SiteCollection {
        // roughly 11 km apart along the equator
        SiteCollection::new((0..10).map(|i| Site::new(i, i as f64 * 0.1, 0.0)).collect()).unwrap()
    }

    #[test]
    fn test_distance_one_degree() {
        let a = Location::new(0.0, 0.0);
        let b = Location::new(0.0, 1.0);
        assert_relative_eq!(a.epicentral_distance(&b), KM_PER_DEGREE, max_relative = 1e-3);
    }

    #[test]
    fn test_depth_increases_distance() {
        let a = Location::new(0.0, 0.0);
        let b = Location::with_depth(0.0, 0.0, 10.0);
        assert_relative_eq!(a.distance(&b), 10.0);
    }

    #[test]
    fn test_invalid_location_is_geometry_error() {
        let err = SiteCollection::new(vec![Site::new(1, 0.0, 95.0)]).unwrap_err();
        assert!(matches!(err, ScenarioError::Geometry(_)));
    }

    #[test]
    fn test_filter_preserves_order() {
        let sites = line_of_sites();
        let filtered = sites
            .filter_by_distance(&[Location::new(0.45, 0.0)], 20.0)
            .unwrap();
        assert_eq!(filtered.ids(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_filter_empty_is_none() {
        let sites = line_of_sites();
        assert!(sites.filter_by_distance(&[Location::new(50.0, 50.0)], 10.0).is_none());
        assert!(sites.filter(&[false; 10]).is_none());
    }

    #[test]
    fn test_envelope_matches_brute_force() {
        let sites = SiteCollection::new(
            (0..50)
                .map(|i| Site::new(i, -179.5 + (i as f64) * 0.02, 60.0 + (i as f64) * 0.01))
                .collect(),
        )
        .unwrap();
        let center = Location::new(-179.9, 60.2);
        let mask = sites.within_distance_mask(&[center], 40.0);
        for (site, hit) in sites.iter().zip(&mask) {
            assert_eq!(*hit, center.distance(&site.location) <= 40.0, "site {}", site.id);
        }
    }

    #[test]
    fn test_serde_round_trip_rebuilds_index() {
        let sites = line_of_sites();
        let json = serde_json::to_string(&sites).unwrap();
        let back: SiteCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sites);
        assert_eq!(back.filter_by_distance(&[Location::new(0.0, 0.0)], 5.0).unwrap().len(), 1);
    }
}
