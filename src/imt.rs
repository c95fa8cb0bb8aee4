//! Intensity measure types
//!
//! An [`Imt`] names a ground-shaking metric and is used as a map key for
//! ground-motion fields and risk inputs, so it is totally ordered and hashable
//! even though spectral variants carry floating-point parameters.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ScenarioError};

/// Default damping (percent) for spectral acceleration
pub const DEFAULT_DAMPING: f64 = 5.0;

/// Intensity measure type
#[derive(Debug, Clone, Copy)]
pub enum Imt {
    /// Peak ground acceleration (g)
    Pga,
    /// Peak ground velocity (cm/s)
    Pgv,
    /// Peak ground displacement (cm)
    Pgd,
    /// Spectral acceleration (g) at a period (s) and damping (%)
    Sa {
        /// Oscillator period in seconds
        period: f64,
        /// Damping in percent
        damping: f64,
    },
}

impl Imt {
    /// Spectral acceleration with the default 5% damping
    pub fn sa(period: f64) -> Self {
        Self::Sa {
            period,
            damping: DEFAULT_DAMPING,
        }
    }

    /// Short name without parameters ("PGA", "SA", ...)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pga => "PGA",
            Self::Pgv => "PGV",
            Self::Pgd => "PGD",
            Self::Sa { .. } => "SA",
        }
    }

    /// Spectral period, if any
    pub fn period(&self) -> Option<f64> {
        match self {
            Self::Sa { period, .. } => Some(*period),
            _ => None,
        }
    }

    /// Spectral damping, if any
    pub fn damping(&self) -> Option<f64> {
        match self {
            Self::Sa { damping, .. } => Some(*damping),
            _ => None,
        }
    }

    /// Period used by period-dependent models; PGA behaves as T = 0
    pub fn effective_period(&self) -> f64 {
        self.period().unwrap_or(0.0)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pga => 0,
            Self::Pgv => 1,
            Self::Pgd => 2,
            Self::Sa { .. } => 3,
        }
    }
}

impl PartialEq for Imt {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Imt {}

impl PartialOrd for Imt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Imt {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Sa { period: p1, damping: d1 },
                Self::Sa { period: p2, damping: d2 },
            ) => p1.total_cmp(p2).then(d1.total_cmp(d2)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Imt {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        if let Self::Sa { period, damping } = self {
            period.to_bits().hash(state);
            damping.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Imt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sa { period, damping } if *damping != DEFAULT_DAMPING => {
                write!(f, "SA({}, {})", period, damping)
            }
            Self::Sa { period, .. } => write!(f, "SA({})", period),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Imt {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "PGA" => return Ok(Self::Pga),
            "PGV" => return Ok(Self::Pgv),
            "PGD" => return Ok(Self::Pgd),
            _ => {}
        }

        let inner = s
            .strip_prefix("SA(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| ScenarioError::config(format!("unknown intensity measure type '{}'", s)))?;

        let mut parts = inner.split(',').map(str::trim);
        let parse = |part: Option<&str>, what: &str| -> Result<Option<f64>> {
            match part {
                None => Ok(None),
                Some(p) => p
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ScenarioError::config(format!("invalid SA {} in '{}'", what, s))),
            }
        };

        let period = parse(parts.next(), "period")?
            .ok_or_else(|| ScenarioError::config(format!("missing SA period in '{}'", s)))?;
        let damping = parse(parts.next(), "damping")?.unwrap_or(DEFAULT_DAMPING);
        if parts.next().is_some() {
            return Err(ScenarioError::config(format!("too many SA parameters in '{}'", s)));
        }
        if !(period.is_finite() && period > 0.0) {
            return Err(ScenarioError::config(format!("SA period must be positive in '{}'", s)));
        }
        if !(damping.is_finite() && damping > 0.0) {
            return Err(ScenarioError::config(format!("SA damping must be positive in '{}'", s)));
        }

        Ok(Self::Sa { period, damping })
    }
}

impl Serialize for Imt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Imt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
