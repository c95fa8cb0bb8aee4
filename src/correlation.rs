//! Spatial correlation of intra-event residuals
//!
//! ## Table of Contents
//! - **CorrelationModel**: trait producing site-to-site correlation matrices
//! - **JB2009**: Jayaram & Baker (2009) exponential model
//! - **from_config**: resolve a model name from the job configuration

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{Result, ScenarioError};
use crate::imt::Imt;
use crate::site::SiteCollection;

/// Diagonal jitter tried once when coincident sites make the matrix singular
const CHOLESKY_JITTER: f64 = 1e-10;

/// A model of the correlation between intra-event residuals at two sites
pub trait CorrelationModel: Send + Sync + fmt::Debug {
    /// Configuration name
    fn name(&self) -> &str;

    /// Symmetric (n × n) correlation matrix for the sites
    fn correlation_matrix(&self, sites: &SiteCollection, imt: &Imt) -> Result<DMatrix<f64>>;

    /// Lower Cholesky factor of the correlation matrix
    fn lower_triangular(&self, sites: &SiteCollection, imt: &Imt) -> Result<DMatrix<f64>> {
        let corr = self.correlation_matrix(sites, imt)?;
        let n = corr.nrows();
        if let Some(chol) = corr.clone().cholesky() {
            return Ok(chol.l());
        }
        debug!(model = self.name(), sites = n, "Correlation matrix singular, adding jitter");
        let jittered = corr + DMatrix::identity(n, n) * CHOLESKY_JITTER;
        jittered.cholesky().map(|c| c.l()).ok_or_else(|| {
            ScenarioError::config(format!(
                "{} correlation matrix for {} is not positive definite",
                self.name(),
                imt
            ))
        })
    }
}

/// Jayaram & Baker (2009): `rho(h) = exp(-3h / b(T))` with h the
/// epicentral distance in km
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JB2009 {
    /// Use the range for clustered vs30 values
    pub vs30_clustering: bool,
}

impl JB2009 {
    /// Configuration name
    pub const NAME: &'static str = "JB2009";

    /// Create the model
    pub fn new(vs30_clustering: bool) -> Self {
        Self { vs30_clustering }
    }

    /// Correlation range b(T) in km
    pub fn range(&self, imt: &Imt) -> Result<f64> {
        let period = match imt {
            Imt::Pga => 0.0,
            Imt::Sa { period, .. } => *period,
            other => {
                return Err(ScenarioError::config(format!(
                    "{} correlation is only defined for PGA and SA, not {}",
                    Self::NAME,
                    other
                )))
            }
        };
        Ok(if period < 1.0 {
            if self.vs30_clustering {
                8.5 + 17.2 * period
            } else {
                40.7 - 15.0 * period
            }
        } else {
            22.0 + 3.7 * period
        })
    }
}

impl CorrelationModel for JB2009 {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn correlation_matrix(&self, sites: &SiteCollection, imt: &Imt) -> Result<DMatrix<f64>> {
        let b = self.range(imt)?;
        let locations: Vec<_> = sites.iter().map(|s| s.location).collect();
        let n = locations.len();
        Ok(DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                1.0
            } else {
                (-3.0 * locations[i].epicentral_distance(&locations[j]) / b).exp()
            }
        }))
    }
}

/// Resolve `ground_motion_correlation_model`; `None` means uncorrelated
pub fn from_config(name: Option<&str>, vs30_clustering: bool) -> Result<Option<Arc<dyn CorrelationModel>>> {
    match name {
        None => Ok(None),
        Some(JB2009::NAME) => Ok(Some(Arc::new(JB2009::new(vs30_clustering)))),
        Some(other) => Err(ScenarioError::config(format!(
            "unknown ground motion correlation model '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Site;
    use approx::assert_relative_eq;

    fn sites() -> SiteCollection {
        SiteCollection::new(vec![
            Site::new(0, 0.0, 0.0),
            Site::new(1, 0.1, 0.0),
            Site::new(2, 0.5, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_range_branches() {
        let plain = JB2009::new(false);
        let clustered = JB2009::new(true);
        assert_relative_eq!(plain.range(&Imt::Pga).unwrap(), 40.7);
        assert_relative_eq!(clustered.range(&Imt::Pga).unwrap(), 8.5);
        assert_relative_eq!(plain.range(&Imt::sa(2.0)).unwrap(), 29.4);
        assert!(plain.range(&Imt::Pgv).unwrap_err().is_config());
    }

    #[test]
    fn test_matrix_is_symmetric_with_unit_diagonal() {
        let m = JB2009::default().correlation_matrix(&sites(), &Imt::Pga).unwrap();
        assert_eq!(m.shape(), (3, 3));
        for i in 0..3 {
            assert_eq!(m[(i, i)], 1.0);
            for j in 0..3 {
                assert_relative_eq!(m[(i, j)], m[(j, i)]);
            }
        }
        // correlation falls off with distance
        assert!(m[(0, 1)] > m[(0, 2)]);
        assert!(m[(0, 2)] > 0.0);
    }

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let model = JB2009::default();
        let corr = model.correlation_matrix(&sites(), &Imt::sa(0.3)).unwrap();
        let l = model.lower_triangular(&sites(), &Imt::sa(0.3)).unwrap();
        let back = &l * l.transpose();
        for (a, b) in back.iter().zip(corr.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_coincident_sites_still_factor() {
        let twins = SiteCollection::new(vec![Site::new(0, 1.0, 1.0), Site::new(1, 1.0, 1.0)]).unwrap();
        assert!(JB2009::default().lower_triangular(&twins, &Imt::Pga).is_ok());
    }

    #[test]
    fn test_from_config() {
        assert!(from_config(None, false).unwrap().is_none());
        assert_eq!(from_config(Some("JB2009"), true).unwrap().unwrap().name(), "JB2009");
        assert!(from_config(Some("XYZ"), false).unwrap_err().is_config());
    }
}
