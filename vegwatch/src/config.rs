use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::collect::global_variables::{
    EE_API_BASE, EE_DEFAULT_PROJECT, GOOGLE_TOKEN_URL, SENTINEL2_CLOUD_PROPERTY, SENTINEL2_NIR,
    SENTINEL2_RED, SENTINEL2_SR,
};
use crate::error::VegwatchError;
use crate::geometric::index_query::QueryParameters;
use crate::geometric::vegetation_health::{ThresholdPreset, Thresholds};

/// Config file looked up (any supported extension) when no path is given
pub const DEFAULT_CONFIG_NAME: &str = "vegwatch";
/// Prefix of environment overrides, e.g. `VEGWATCH__QUERY__BUFFER_RADIUS_M=50`
pub const ENV_PREFIX: &str = "VEGWATCH";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VegwatchConfig {
    pub earth_engine: EarthEngineConfig,
    pub query: QueryParameters,
    pub batch: BatchConfig,
    pub classification: ClassificationConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EarthEngineConfig {
    pub project: String,
    pub api_base: String,
    pub token_url: String,
    pub collection: String,
    pub nir_band: String,
    pub red_band: String,
    pub cloud_property: String,
    pub request_timeout_secs: u64,
}

impl Default for EarthEngineConfig {
    fn default() -> Self {
        EarthEngineConfig {
            project: EE_DEFAULT_PROJECT.to_string(),
            api_base: EE_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            collection: SENTINEL2_SR.to_string(),
            nir_band: SENTINEL2_NIR.to_string(),
            red_band: SENTINEL2_RED.to_string(),
            cloud_property: SENTINEL2_CLOUD_PROPERTY.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl EarthEngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    /// Queries in flight at once; 1 keeps the strictly sequential behavior
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig { max_concurrency: 1 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ClassificationConfig {
    pub preset: ThresholdPreset,
    /// Overrides the preset's healthy cut point
    pub healthy: Option<f64>,
    /// Overrides the preset's moderate cut point
    pub moderate: Option<f64>,
}

impl ClassificationConfig {
    pub fn thresholds(&self) -> Result<Thresholds, VegwatchError> {
        let base = self.preset.thresholds();
        Thresholds::new(
            self.healthy.unwrap_or(base.healthy),
            self.moderate.unwrap_or(base.moderate),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub title: String,
    /// Request and draw the NDVI tile layer
    pub index_layer: bool,
    pub single_point_zoom: u8,
    pub map_height_px: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            title: "Vegetation Health Dashboard (NDVI)".to_string(),
            index_layer: true,
            single_point_zoom: 12,
            map_height_px: 600,
        }
    }
}

/// Load configuration from an optional file, then environment overrides
/// An explicit path must exist; the default `vegwatch.*` file is optional
pub fn load_config(path: Option<&Path>) -> Result<VegwatchConfig> {
    let mut builder = config::Config::builder();
    builder = match path {
        Some(path) => builder.add_source(config::File::from(path)),
        None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
    };
    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read vegwatch configuration")?;

    let config: VegwatchConfig = settings
        .try_deserialize()
        .context("Invalid vegwatch configuration")?;

    // Fail early rather than at the first classification
    config.classification.thresholds()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::index_query::CompositeStrategy;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VegwatchConfig::default();
        assert_eq!(config.earth_engine.collection, "COPERNICUS/S2_SR");
        assert_eq!(config.batch.max_concurrency, 1);
        assert_eq!(config.classification.thresholds().unwrap(), Thresholds::default());
        assert!(config.render.index_layer);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[query]
buffer_radius_m = 50.0
strategy = "lowest_cloud"

[classification]
preset = "strict"
moderate = 0.25

[batch]
max_concurrency = 4
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.query.buffer_radius_m, 50.0);
        assert_eq!(config.query.scale_m, 10.0);
        assert_eq!(config.query.strategy, CompositeStrategy::LowestCloud);
        assert_eq!(config.batch.max_concurrency, 4);
        let t = config.classification.thresholds().unwrap();
        assert_eq!(t.healthy, 0.6);
        assert_eq!(t.moderate, 0.25);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[classification]\nhealthy = 0.1\nmoderate = 0.3").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VegwatchError>(),
            Some(VegwatchError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/vegwatch.toml"))).is_err());
    }
}
