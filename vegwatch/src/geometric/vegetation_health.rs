use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VegwatchError;
use crate::geo_core::Coordinate;

/// Vegetation health bucket derived from a mean NDVI value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthLabel {
    Healthy,
    Moderate,
    Unhealthy,
    NoData,
}

impl HealthLabel {
    pub const ALL: [HealthLabel; 4] = [
        HealthLabel::Healthy,
        HealthLabel::Moderate,
        HealthLabel::Unhealthy,
        HealthLabel::NoData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLabel::Healthy => "HEALTHY",
            HealthLabel::Moderate => "MODERATE",
            HealthLabel::Unhealthy => "UNHEALTHY",
            HealthLabel::NoData => "NO_DATA",
        }
    }

    /// Marker color on the map
    pub fn color(&self) -> &'static str {
        match self {
            HealthLabel::Healthy => "green",
            HealthLabel::Moderate => "orange",
            HealthLabel::Unhealthy => "red",
            HealthLabel::NoData => "gray",
        }
    }

    /// Sentence shown to the user for a single-point query
    pub fn message(&self) -> &'static str {
        match self {
            HealthLabel::Healthy => "Healthy vegetation",
            HealthLabel::Moderate => "Moderately healthy vegetation",
            HealthLabel::Unhealthy => "Unhealthy vegetation",
            HealthLabel::NoData => "No NDVI data available for this location and date range.",
        }
    }

    /// Ordering of the health buckets; NO_DATA is outside the scale
    pub fn rank(&self) -> Option<u8> {
        match self {
            HealthLabel::Unhealthy => Some(0),
            HealthLabel::Moderate => Some(1),
            HealthLabel::Healthy => Some(2),
            HealthLabel::NoData => None,
        }
    }
}

impl fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HealthLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("Unknown health status: {}", s))
    }
}

/// Named threshold sets seen across deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPreset {
    /// 0.5 / 0.2
    #[default]
    Standard,
    /// 0.4 / 0.2
    Lenient,
    /// 0.6 / 0.3
    Strict,
}

impl ThresholdPreset {
    pub fn thresholds(&self) -> Thresholds {
        match self {
            ThresholdPreset::Standard => Thresholds {
                healthy: 0.5,
                moderate: 0.2,
            },
            ThresholdPreset::Lenient => Thresholds {
                healthy: 0.4,
                moderate: 0.2,
            },
            ThresholdPreset::Strict => Thresholds {
                healthy: 0.6,
                moderate: 0.3,
            },
        }
    }
}

/// Cut points for classification, both exclusive lower bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub healthy: f64,
    pub moderate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        ThresholdPreset::Standard.thresholds()
    }
}

impl Thresholds {
    pub fn new(healthy: f64, moderate: f64) -> Result<Self, VegwatchError> {
        if !healthy.is_finite() || !moderate.is_finite() || healthy < moderate {
            return Err(VegwatchError::InvalidThresholds { healthy, moderate });
        }
        Ok(Thresholds { healthy, moderate })
    }

    /// Ordered comparison, first match wins:
    /// absent -> NO_DATA, > healthy -> HEALTHY, > moderate -> MODERATE, else UNHEALTHY
    pub fn classify(&self, ndvi: Option<f64>) -> HealthLabel {
        match ndvi {
            None => HealthLabel::NoData,
            Some(value) if value > self.healthy => HealthLabel::Healthy,
            Some(value) if value > self.moderate => HealthLabel::Moderate,
            Some(_) => HealthLabel::Unhealthy,
        }
    }
}

/// One output line per input coordinate, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub coordinate: Coordinate,
    pub ndvi: Option<f64>,
    pub status: HealthLabel,
}

/// Decimal places kept for a reported NDVI
pub const NDVI_DECIMALS: i32 = 3;

fn round_ndvi(value: f64) -> f64 {
    let factor = 10f64.powi(NDVI_DECIMALS);
    (value * factor).round() / factor
}

impl ResultRow {
    /// Classify on the full-precision value, then keep the reported precision
    pub fn classified(coordinate: Coordinate, ndvi: Option<f64>, thresholds: &Thresholds) -> Self {
        ResultRow {
            coordinate,
            ndvi: ndvi.map(round_ndvi),
            status: thresholds.classify(ndvi),
        }
    }

    /// NDVI with 3 decimals, or `N/A` when absent
    pub fn ndvi_display(&self) -> String {
        match self.ndvi {
            Some(value) => format!("{:.3}", value),
            None => "N/A".to_string(),
        }
    }
}
