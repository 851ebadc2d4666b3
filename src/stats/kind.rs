//! Statistic kinds and their parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("invalid statistic kind '{0}' (expected one of raw, mean, gramian, variance, covariance)")]
    InvalidKind(String),

    #[error("descriptor length mismatch: target has {expected} values, source produced {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// Which summary of an activation tensor is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticKind {
    /// Activation itself (used for content).
    Raw,
    /// Per-filter mean.
    Mean,
    /// Normalized second moment `(M+s)(M+s)ᵀ / (F·N)`.
    Gramian,
    /// Per-filter unbiased variance, divided by F.
    Variance,
    /// Centered second moment, divided by F.
    Covariance,
}

impl StatisticKind {
    pub const ALL: [StatisticKind; 5] = [
        StatisticKind::Raw,
        StatisticKind::Mean,
        StatisticKind::Gramian,
        StatisticKind::Variance,
        StatisticKind::Covariance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatisticKind::Raw => "raw",
            StatisticKind::Mean => "mean",
            StatisticKind::Gramian => "gramian",
            StatisticKind::Variance => "variance",
            StatisticKind::Covariance => "covariance",
        }
    }

    /// Whether the activation shift parameter affects this kind.
    pub fn uses_shift(self) -> bool {
        matches!(self, StatisticKind::Gramian)
    }
}

impl fmt::Display for StatisticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StatisticKind {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatisticKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| StatsError::InvalidKind(s.to_string()))
    }
}

/// A statistic kind bound to its parameters.
///
/// `shift` is added to every activation before the Gramian outer product and
/// is ignored by the other kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub kind: StatisticKind,
    #[serde(default)]
    pub shift: f32,
}

impl Statistic {
    pub fn new(kind: StatisticKind, shift: f32) -> Self {
        Self { kind, shift }
    }

    pub fn raw() -> Self {
        Self::new(StatisticKind::Raw, 0.0)
    }

    pub fn gramian(shift: f32) -> Self {
        Self::new(StatisticKind::Gramian, shift)
    }

    /// Parse a kind by name and bind it to `shift`.
    pub fn parse(kind: &str, shift: f32) -> Result<Self, StatsError> {
        Ok(Self::new(kind.parse()?, shift))
    }

    /// Shift actually applied by the transform (zero for kinds that ignore it).
    pub fn effective_shift(&self) -> f32 {
        if self.kind.uses_shift() {
            self.shift
        } else {
            0.0
        }
    }
}

impl Default for Statistic {
    fn default() -> Self {
        Self::gramian(0.0)
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.uses_shift() {
            write!(f, "{}(shift={})", self.kind, self.shift)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        for kind in StatisticKind::ALL {
            assert_eq!(kind.name().parse::<StatisticKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        assert_eq!(
            "skewness".parse::<StatisticKind>().unwrap_err(),
            StatsError::InvalidKind("skewness".to_string())
        );
        assert!(Statistic::parse("Gramian", 0.0).is_err());
    }

    #[test]
    fn test_shift_only_applies_to_gramian() {
        assert_eq!(Statistic::gramian(-300.0).effective_shift(), -300.0);
        assert_eq!(Statistic::new(StatisticKind::Mean, 5.0).effective_shift(), 0.0);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Statistic::gramian(100.0)).unwrap();
        assert_eq!(json, r#"{"kind":"gramian","shift":100.0}"#);
        let back: Statistic = serde_json::from_str(r#"{"kind":"covariance"}"#).unwrap();
        assert_eq!(back, Statistic::new(StatisticKind::Covariance, 0.0));
    }
}
