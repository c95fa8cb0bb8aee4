//! # Ground-motion field simulation
//!
//! Table of Contents:
//! 1. GmfRequest: everything needed to simulate one rupture
//! 2. GmfComputer: per-IMT model terms and seeded sampling
//! 3. Bulk mode: `ground_motion_fields`, one RNG for all realizations
//! 4. Streaming mode: `calc_gmfs_streaming`, one seed per realization
//! 5. GroundMotionFields / GmfRecord: shape-checked results
//!
//! Draw order within one sampling pass: IMTs in sorted order; per IMT the
//! intra-event (or total) residuals column by column, then the inter-event
//! residuals. Both modes are bit-reproducible for identical inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::correlation::CorrelationModel;
use crate::error::{Result, ScenarioError};
use crate::filters::RuptureSiteDistanceFilter;
use crate::gsim::{GroundMotionModel, GsimOutput};
use crate::imt::Imt;
use crate::site::{SiteCollection, SiteId};
use crate::source::Rupture;

/// Upper bound (inclusive) of the per-realization seeds drawn in streaming mode
pub const MAX_REALIZATION_SEED: u64 = (1 << 31) - 1;

// ─────────────────────────────────────────────
// 1. GmfRequest
// ─────────────────────────────────────────────

/// Inputs of a scenario ground-motion simulation
#[derive(Debug, Clone)]
pub struct GmfRequest<'a> {
    /// The scenario rupture
    pub rupture: &'a Rupture,
    /// Sites of interest
    pub sites: &'a SiteCollection,
    /// Intensity measure types
    pub imts: &'a [Imt],
    /// Ground-motion model
    pub gsim: Arc<dyn GroundMotionModel>,
    /// Residual truncation in standard deviations; `None` is unbounded
    pub truncation_level: Option<f64>,
    /// Number of realizations (matrix columns)
    pub realizations: usize,
    /// Spatial correlation of intra-event residuals
    pub correlation: Option<Arc<dyn CorrelationModel>>,
    /// Seed of the simulation
    pub seed: u64,
}

impl GmfRequest<'_> {
    fn validate(&self) -> Result<()> {
        if self.realizations == 0 {
            return Err(ScenarioError::config("number of ground motion fields must be at least 1"));
        }
        if self.imts.is_empty() {
            return Err(ScenarioError::config("no intensity measure types given"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// 2. GmfComputer
// ─────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ImtTerms {
    gsim: GsimOutput,
    total: DVector<f64>,
    lower: Option<DMatrix<f64>>,
}

/// Precomputed model terms for one rupture and site collection
#[derive(Debug, Clone)]
pub struct GmfComputer {
    sites: SiteCollection,
    truncation_level: Option<f64>,
    terms: BTreeMap<Imt, ImtTerms>,
}

impl GmfComputer {
    /// Evaluate the model (and correlation factor) once per IMT
    pub fn new(
        rupture: &Rupture,
        sites: SiteCollection,
        imts: &[Imt],
        gsim: &dyn GroundMotionModel,
        truncation_level: Option<f64>,
        correlation: Option<&dyn CorrelationModel>,
    ) -> Result<Self> {
        if let Some(t) = truncation_level {
            if !(t.is_finite() && t >= 0.0) {
                return Err(ScenarioError::config(format!("invalid truncation level {}", t)));
            }
        }

        let mut terms = BTreeMap::new();
        for imt in imts {
            if !gsim.supports(imt) {
                return Err(ScenarioError::config(format!("{} does not support {}", gsim.name(), imt)));
            }
            let output = gsim.mean_and_stddevs(rupture, &sites, imt)?;
            for (what, v) in [("mean", &output.mean), ("inter", &output.inter), ("intra", &output.intra)] {
                if v.len() != sites.len() {
                    return Err(ScenarioError::shape(format!("{} {}", what, imt), (sites.len(), 1), (v.len(), 1)));
                }
            }
            let lower = match correlation {
                Some(model) if !sites.is_empty() => Some(model.lower_triangular(&sites, imt)?),
                _ => None,
            };
            terms.insert(
                *imt,
                ImtTerms {
                    total: output.total(),
                    gsim: output,
                    lower,
                },
            );
        }

        Ok(Self {
            sites,
            truncation_level,
            terms,
        })
    }

    /// Sites the rows refer to
    pub fn sites(&self) -> &SiteCollection {
        &self.sites
    }

    /// IMTs in sampling order
    pub fn imts(&self) -> Vec<Imt> {
        self.terms.keys().copied().collect()
    }

    /// One realization from its own seed
    pub fn compute(&self, seed: u64) -> Result<BTreeMap<Imt, DVector<f64>>> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.sample(&mut rng, 1)?
            .into_iter()
            .map(|(imt, m)| Ok((imt, m.column(0).into_owned())))
            .collect()
    }

    /// `realizations` columns per IMT from a single RNG
    pub fn sample(&self, rng: &mut StdRng, realizations: usize) -> Result<BTreeMap<Imt, DMatrix<f64>>> {
        let n = self.sites.len();
        let mut out = BTreeMap::new();

        for (imt, terms) in &self.terms {
            let mean = &terms.gsim.mean;
            let residuals = match &terms.lower {
                None => {
                    let eps = self.standard_normals(rng, n, realizations);
                    DMatrix::from_fn(n, realizations, |i, j| terms.total[i] * eps[(i, j)])
                }
                Some(lower) => {
                    let intra = lower * self.standard_normals(rng, n, realizations);
                    let inter = self.standard_normals(rng, 1, realizations);
                    DMatrix::from_fn(n, realizations, |i, j| {
                        terms.gsim.intra[i] * intra[(i, j)] + terms.gsim.inter[i] * inter[(0, j)]
                    })
                }
            };
            let gmvs = DMatrix::from_fn(n, realizations, |i, j| (mean[i] + residuals[(i, j)]).exp());
            check_shape(&format!("gmf[{}]", imt), &gmvs, (n, realizations))?;
            out.insert(*imt, gmvs);
        }

        Ok(out)
    }

    /// Column-major matrix of (possibly truncated) standard normal draws
    fn standard_normals(&self, rng: &mut StdRng, rows: usize, cols: usize) -> DMatrix<f64> {
        let data: Vec<f64> = (0..rows * cols)
            .map(|_| truncated_normal(rng, self.truncation_level))
            .collect();
        DMatrix::from_vec(rows, cols, data)
    }
}

/// Below this truncation level draws come from a uniform proposal on [-t, t]
const UNIFORM_PROPOSAL_BELOW: f64 = 0.5;

/// Standard normal draw; `Some(0)` is the median, `Some(t)` is restricted to
/// |x| <= t. Narrow bounds sample a uniform proposal weighted by the normal
/// density, so the acceptance rate stays above exp(-t²/2).
fn truncated_normal(rng: &mut StdRng, truncation_level: Option<f64>) -> f64 {
    match truncation_level {
        None => rng.sample(StandardNormal),
        Some(t) if t == 0.0 => 0.0,
        Some(t) if t < UNIFORM_PROPOSAL_BELOW => loop {
            let x = rng.gen_range(-t..=t);
            let u: f64 = rng.gen();
            if u <= (-0.5 * x * x).exp() {
                return x;
            }
        },
        Some(t) => loop {
            let x: f64 = rng.sample(StandardNormal);
            if x.abs() <= t {
                return x;
            }
        },
    }
}

fn check_shape(what: &str, matrix: &DMatrix<f64>, expected: (usize, usize)) -> Result<()> {
    if matrix.shape() != expected {
        return Err(ScenarioError::shape(what, expected, matrix.shape()));
    }
    Ok(())
}

// ─────────────────────────────────────────────
// 3. Bulk mode
// ─────────────────────────────────────────────

/// Compute every realization in one pass from a single RNG seeded with
/// `request.seed`. With a filter, rows refer to the surviving sites only;
/// when none survive the result has zero rows.
pub fn ground_motion_fields(
    request: &GmfRequest<'_>,
    filter: Option<&RuptureSiteDistanceFilter>,
) -> Result<GroundMotionFields> {
    request.validate()?;

    let sites = match filter {
        Some(f) => match f.apply(request.rupture, request.sites) {
            Some(kept) => kept,
            None => {
                debug!(sites = request.sites.len(), "No site within range of the rupture");
                return Ok(GroundMotionFields::empty(request.imts, request.realizations));
            }
        },
        None => request.sites.clone(),
    };

    debug!(
        sites = sites.len(),
        imts = request.imts.len(),
        realizations = request.realizations,
        seed = request.seed,
        "Computing ground motion fields (bulk)"
    );

    let computer = GmfComputer::new(
        request.rupture,
        sites,
        request.imts,
        request.gsim.as_ref(),
        request.truncation_level,
        request.correlation.as_deref(),
    )?;
    let mut rng = StdRng::seed_from_u64(request.seed);
    let fields = computer.sample(&mut rng, request.realizations)?;

    GroundMotionFields::new(computer.sites, fields, request.realizations)
}

// ─────────────────────────────────────────────
// 4. Streaming mode
// ─────────────────────────────────────────────

/// Draw one seed per realization from a master RNG and compute each
/// realization independently; rows are the full site collection
pub fn calc_gmfs_streaming(request: &GmfRequest<'_>) -> Result<GroundMotionFields> {
    request.validate()?;

    let computer = GmfComputer::new(
        request.rupture,
        request.sites.clone(),
        request.imts,
        request.gsim.as_ref(),
        request.truncation_level,
        request.correlation.as_deref(),
    )?;

    let mut master = StdRng::seed_from_u64(request.seed);
    let seeds: Vec<u64> = (0..request.realizations)
        .map(|_| master.gen_range(0..=MAX_REALIZATION_SEED))
        .collect();

    debug!(
        sites = request.sites.len(),
        realizations = seeds.len(),
        seed = request.seed,
        "Computing ground motion fields (streaming)"
    );

    let mut columns: BTreeMap<Imt, Vec<DVector<f64>>> = BTreeMap::new();
    for seed in seeds {
        for (imt, gmvs) in computer.compute(seed)? {
            columns.entry(imt).or_default().push(gmvs);
        }
    }

    let n = computer.sites.len();
    let fields = columns
        .into_iter()
        .map(|(imt, cols)| {
            let matrix = if cols.is_empty() {
                DMatrix::zeros(n, 0)
            } else {
                DMatrix::from_columns(&cols)
            };
            (imt, matrix)
        })
        .collect();

    GroundMotionFields::new(computer.sites, fields, request.realizations)
}

// ─────────────────────────────────────────────
// 5. GroundMotionFields / GmfRecord
// ─────────────────────────────────────────────

/// Per-IMT ground-motion matrices (sites × realizations) and the sites
/// their rows refer to
#[derive(Debug, Clone, PartialEq)]
pub struct GroundMotionFields {
    sites: SiteCollection,
    fields: BTreeMap<Imt, DMatrix<f64>>,
    realizations: usize,
}

impl GroundMotionFields {
    /// Bundle matrices with their sites; every matrix must be (sites × realizations)
    pub fn new(sites: SiteCollection, fields: BTreeMap<Imt, DMatrix<f64>>, realizations: usize) -> Result<Self> {
        let expected = (sites.len(), realizations);
        for (imt, matrix) in &fields {
            check_shape(&format!("gmf[{}]", imt), matrix, expected)?;
        }
        Ok(Self {
            sites,
            fields,
            realizations,
        })
    }

    fn empty(imts: &[Imt], realizations: usize) -> Self {
        Self {
            sites: SiteCollection::default(),
            fields: imts.iter().map(|imt| (*imt, DMatrix::zeros(0, realizations))).collect(),
            realizations,
        }
    }

    /// Sites the rows refer to
    pub fn sites(&self) -> &SiteCollection {
        &self.sites
    }

    /// Matrix for one IMT
    pub fn get(&self, imt: &Imt) -> Option<&DMatrix<f64>> {
        self.fields.get(imt)
    }

    /// IMTs and matrices in sorted IMT order
    pub fn iter(&self) -> impl Iterator<Item = (&Imt, &DMatrix<f64>)> {
        self.fields.iter()
    }

    /// Number of realizations (columns)
    pub fn realizations(&self) -> usize {
        self.realizations
    }

    /// Flatten to one record per (IMT, site)
    pub fn to_records(&self) -> Vec<GmfRecord> {
        self.fields
            .iter()
            .flat_map(|(imt, matrix)| {
                self.sites.iter().enumerate().map(move |(row, site)| GmfRecord {
                    imt: imt.name().to_string(),
                    sa_period: imt.period(),
                    sa_damping: imt.damping(),
                    site_id: site.id,
                    lon: site.location.lon,
                    lat: site.location.lat,
                    gmvs: matrix.row(row).iter().copied().collect(),
                })
            })
            .collect()
    }
}

/// Ground-motion values of one IMT at one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmfRecord {
    /// IMT short name
    pub imt: String,
    /// SA period, for spectral IMTs
    pub sa_period: Option<f64>,
    /// SA damping, for spectral IMTs
    pub sa_damping: Option<f64>,
    /// Site identifier
    pub site_id: SiteId,
    /// Site longitude
    pub lon: f64,
    /// Site latitude
    pub lat: f64,
    /// One value per realization
    pub gmvs: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::JB2009;
    use crate::filters::rupture_site_distance_filter;
    use crate::gsim::LinearAttenuation;
    use crate::site::{Location, Site};

    fn rupture() -> Rupture {
        Rupture::point(6.5, 0.0, Location::with_depth(0.0, 0.0, 10.0)).unwrap()
    }

    fn sites() -> SiteCollection {
        SiteCollection::new(vec![
            Site::new(1, 0.1, 0.0),
            Site::new(2, 0.0, 0.2),
            Site::new(3, 3.0, 3.0),
        ])
        .unwrap()
    }

    fn request<'a>(rupture: &'a Rupture, sites: &'a SiteCollection, imts: &'a [Imt], seed: u64) -> GmfRequest<'a> {
        GmfRequest {
            rupture,
            sites,
            imts,
            gsim: Arc::new(LinearAttenuation),
            truncation_level: None,
            realizations: 4,
            correlation: None,
            seed,
        }
    }

    #[test]
    fn test_bulk_is_deterministic_and_seed_sensitive() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga, Imt::sa(0.3)]);
        let a = ground_motion_fields(&request(&rup, &sites, &imts, 42), None).unwrap();
        let b = ground_motion_fields(&request(&rup, &sites, &imts, 42), None).unwrap();
        let c = ground_motion_fields(&request(&rup, &sites, &imts, 7), None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.get(&Imt::Pga), c.get(&Imt::Pga));
        assert_eq!(a.get(&Imt::Pga).unwrap().shape(), (3, 4));
    }

    #[test]
    fn test_streaming_is_deterministic() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga]);
        let a = calc_gmfs_streaming(&request(&rup, &sites, &imts, 42)).unwrap();
        let b = calc_gmfs_streaming(&request(&rup, &sites, &imts, 42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(&Imt::Pga).unwrap().shape(), (3, 4));
        assert!(a.get(&Imt::Pga).unwrap().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_streaming_column_matches_single_realization() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga]);
        let req = request(&rup, &sites, &imts, 3);
        let fields = calc_gmfs_streaming(&req).unwrap();

        let mut master = StdRng::seed_from_u64(3);
        let first_seed = master.gen_range(0..=MAX_REALIZATION_SEED);
        let computer = GmfComputer::new(&rup, sites.clone(), &imts, &LinearAttenuation, None, None).unwrap();
        let single = computer.compute(first_seed).unwrap();
        assert_eq!(fields.get(&Imt::Pga).unwrap().column(0).into_owned(), single[&Imt::Pga]);
    }

    #[test]
    fn test_bulk_filter_keeps_near_sites() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga]);
        let filter = rupture_site_distance_filter(50.0);
        let fields = ground_motion_fields(&request(&rup, &sites, &imts, 42), Some(&filter)).unwrap();
        assert_eq!(fields.sites().ids(), vec![1, 2]);
        assert_eq!(fields.get(&Imt::Pga).unwrap().shape(), (2, 4));

        let none = rupture_site_distance_filter(1.0);
        let empty = ground_motion_fields(&request(&rup, &sites, &imts, 42), Some(&none)).unwrap();
        assert!(empty.sites().is_empty());
        assert_eq!(empty.get(&Imt::Pga).unwrap().shape(), (0, 4));
    }

    #[test]
    fn test_zero_truncation_gives_median() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga]);
        let mut req = request(&rup, &sites, &imts, 42);
        req.truncation_level = Some(0.0);
        let fields = ground_motion_fields(&req, None).unwrap();
        let mean = LinearAttenuation.mean_and_stddevs(&rup, &sites, &Imt::Pga).unwrap().mean;
        let matrix = fields.get(&Imt::Pga).unwrap();
        for i in 0..3 {
            for j in 0..4 {
                assert!((matrix[(i, j)] - mean[i].exp()).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_truncated_draws_are_bounded() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..10_000).all(|_| truncated_normal(&mut rng, Some(1.5)).abs() <= 1.5));
    }

    #[test]
    fn test_narrow_truncation_terminates_and_is_centred() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..10_000).all(|_| truncated_normal(&mut rng, Some(1e-9)).abs() <= 1e-9));

        let draws: Vec<f64> = (0..20_000).map(|_| truncated_normal(&mut rng, Some(0.3))).collect();
        assert!(draws.iter().all(|x| x.abs() <= 0.3));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.01, "mean {}", mean);
        // barely curved density on [-0.3, 0.3]: variance just under 0.3²/3
        let var = draws.iter().map(|x| x * x).sum::<f64>() / draws.len() as f64;
        assert!((var - 0.0297).abs() < 0.002, "variance {}", var);
    }

    /// Zero mean, no inter-event term, unit intra-event deviation
    #[derive(Debug)]
    struct IntraOnly;

    impl GroundMotionModel for IntraOnly {
        fn name(&self) -> &str {
            "IntraOnly"
        }

        fn supports(&self, _: &Imt) -> bool {
            true
        }

        fn mean_and_stddevs(&self, _: &Rupture, sites: &SiteCollection, _: &Imt) -> Result<GsimOutput> {
            let n = sites.len();
            Ok(GsimOutput {
                mean: DVector::zeros(n),
                inter: DVector::zeros(n),
                intra: DVector::from_element(n, 1.0),
            })
        }
    }

    fn pearson(x: &[f64], y: &[f64]) -> f64 {
        let n = x.len() as f64;
        let (mx, my) = (x.iter().sum::<f64>() / n, y.iter().sum::<f64>() / n);
        let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let vx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
        let vy: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
        cov / (vx * vy).sqrt()
    }

    #[test]
    fn test_correlated_residuals_follow_jb2009() {
        // about 0, 10 and 30 km apart along the equator
        let sites = SiteCollection::new(vec![Site::new(1, 0.0, 0.0), Site::new(2, 0.09, 0.0), Site::new(3, 0.27, 0.0)])
            .unwrap();
        let model = JB2009::default();
        let expected = model.correlation_matrix(&sites, &Imt::Pga).unwrap();
        let computer = GmfComputer::new(&rupture(), sites, &[Imt::Pga], &IntraOnly, None, Some(&model as &dyn CorrelationModel)).unwrap();

        let mut rng = StdRng::seed_from_u64(2009);
        let fields = computer.sample(&mut rng, 20_000).unwrap();
        let residuals = fields[&Imt::Pga].map(f64::ln);
        let rows: Vec<Vec<f64>> = (0..3).map(|i| residuals.row(i).iter().copied().collect()).collect();

        for i in 0..3 {
            let var = rows[i].iter().map(|x| x * x).sum::<f64>() / rows[i].len() as f64;
            assert!((var - 1.0).abs() < 0.05, "site {} variance {}", i, var);
            for j in (i + 1)..3 {
                let corr = pearson(&rows[i], &rows[j]);
                assert!(
                    (corr - expected[(i, j)]).abs() < 0.03,
                    "sites {} and {}: {} vs {}",
                    i,
                    j,
                    corr,
                    expected[(i, j)]
                );
            }
        }
        // nearer pairs are more correlated
        assert!(expected[(0, 1)] > expected[(0, 2)] + 0.2);
    }

    #[test]
    fn test_correlated_fields_have_expected_shape() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga]);
        let mut req = request(&rup, &sites, &imts, 42);
        req.correlation = Some(Arc::new(JB2009::default()));
        let a = ground_motion_fields(&req, None).unwrap();
        let b = ground_motion_fields(&req, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(&Imt::Pga).unwrap().shape(), (3, 4));
    }

    #[test]
    fn test_zero_realizations_is_config_error() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga]);
        let mut req = request(&rup, &sites, &imts, 42);
        req.realizations = 0;
        assert!(calc_gmfs_streaming(&req).unwrap_err().is_config());
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let mut fields = BTreeMap::new();
        fields.insert(Imt::Pga, DMatrix::zeros(3, 2));
        let err = GroundMotionFields::new(sites(), fields, 3).unwrap_err();
        assert!(matches!(err, ScenarioError::NumericShape { expected: (3, 3), found: (3, 2), .. }));
    }

    #[test]
    fn test_records_one_per_imt_and_site() {
        let (rup, sites, imts) = (rupture(), sites(), [Imt::Pga, Imt::sa(1.0)]);
        let fields = ground_motion_fields(&request(&rup, &sites, &imts, 42), None).unwrap();
        let records = fields.to_records();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0].imt, "PGA");
        assert_eq!(records[0].sa_period, None);
        assert_eq!(records[3].imt, "SA");
        assert_eq!(records[3].sa_period, Some(1.0));
        assert_eq!(records[3].gmvs.len(), 4);
    }
}
