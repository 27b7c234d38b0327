use serde::{Deserialize, Serialize};

use crate::geo_core::{Coordinate, DateRange};

/// How the filtered scenes are turned into one image before reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    /// Per-pixel median of NDVI over every matching scene
    #[default]
    Median,
    /// Only the scene with the lowest cloud percentage
    LowestCloud,
}

/// Tunables shared by every query of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParameters {
    /// Scenes must have a cloud percentage strictly below this value
    pub cloud_cover_max: f64,
    /// Radius in meters of the disc NDVI is averaged over
    pub buffer_radius_m: f64,
    /// Sampling resolution of the reduction, in meters
    pub scale_m: f64,
    pub strategy: CompositeStrategy,
}

impl Default for QueryParameters {
    fn default() -> Self {
        QueryParameters {
            cloud_cover_max: 10.0,
            buffer_radius_m: 30.0,
            scale_m: 10.0,
            strategy: CompositeStrategy::Median,
        }
    }
}

/// Everything needed to ask the remote service for the mean NDVI around one point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexQuery {
    pub coordinate: Coordinate,
    pub date_range: DateRange,
    pub parameters: QueryParameters,
}

impl IndexQuery {
    pub fn new(coordinate: Coordinate, date_range: DateRange, parameters: QueryParameters) -> Self {
        IndexQuery {
            coordinate,
            date_range,
            parameters,
        }
    }
}

/// Request for a map-tile layer of the composite index image over a set of points
#[derive(Debug, Clone, PartialEq)]
pub struct LayerQuery {
    pub coordinates: Vec<Coordinate>,
    pub date_range: DateRange,
    pub parameters: QueryParameters,
}

/// XYZ tile layer served by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileLayer {
    pub name: String,
    /// Template with `{z}`, `{x}` and `{y}` placeholders
    pub url_template: String,
    pub attribution: String,
}
