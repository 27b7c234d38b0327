use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::collect::earth_engine::auth::{Credentials, TokenSource};
use crate::collect::earth_engine::expression::{mean_ndvi_expression, ndvi_layer_expression};
use crate::collect::global_variables::{NDVI_BAND, NDVI_PALETTE};
use crate::collect::provider::{sanitize_index, IndexProvider};
use crate::config::EarthEngineConfig;
use crate::error::VegwatchError;
use crate::geometric::index_query::{IndexQuery, LayerQuery, TileLayer};

/// `value:compute` response body
#[derive(Debug, Deserialize)]
struct ComputeValueResponse {
    #[serde(default)]
    result: Value,
}

/// `maps` response body
#[derive(Debug, Deserialize)]
struct MapResponse {
    name: String,
}

/// Google API error envelope
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Earth Engine REST client
/// Authenticates once on `connect`, then answers index queries with blocking calls
pub struct EarthEngineCollect {
    client: Client,
    tokens: TokenSource,
    settings: EarthEngineConfig,
    api_base: Url,
}

impl EarthEngineCollect {
    /// Build the client and obtain a first access token
    /// An authentication failure here is fatal for the session
    pub fn connect(credentials: Credentials, settings: EarthEngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        let mut base = settings.api_base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let api_base =
            Url::parse(&base).with_context(|| format!("Invalid Earth Engine API base: {}", base))?;

        let tokens = TokenSource::new(credentials, settings.token_url.clone());
        tokens.bearer(&client)?;
        tracing::info!(project = %settings.project, collection = %settings.collection, "connected to Earth Engine");

        Ok(EarthEngineCollect {
            client,
            tokens,
            settings,
            api_base,
        })
    }

    pub fn settings(&self) -> &EarthEngineConfig {
        &self.settings
    }

    fn endpoint(&self, method: &str) -> Result<Url> {
        self.api_base
            .join(&format!("projects/{}/{}", self.settings.project, method))
            .with_context(|| format!("Failed to build Earth Engine URL for {}", method))
    }

    fn post_json(&self, url: Url, body: &Value) -> Result<Value> {
        let token = self.tokens.bearer(&self.client)?;
        tracing::debug!(%url, "Earth Engine request");

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(token)
            .json(body)
            .send()
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = api_error_message(&body);
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                return Err(VegwatchError::Authentication(format!("{}: {}", status, message)).into());
            }
            anyhow::bail!("Earth Engine returned error {}: {}", status, message);
        }

        response
            .json()
            .context("Failed to parse Earth Engine response")
    }

    /// Evaluate an expression and return its JSON result
    pub fn compute_value(&self, expression: Value) -> Result<Value> {
        let url = self.endpoint("value:compute")?;
        let response = self.post_json(url, &json!({ "expression": expression }))?;
        let parsed: ComputeValueResponse =
            serde_json::from_value(response).context("Unexpected value:compute response")?;
        Ok(parsed.result)
    }

    /// Register a visualized image and return its tile URL template
    pub fn create_map(&self, expression: Value) -> Result<String> {
        let url = self.endpoint("maps")?;
        let body = json!({
            "expression": expression,
            "fileFormat": "PNG",
            "bandIds": [NDVI_BAND],
            "visualizationOptions": {
                "ranges": [{ "min": -1.0, "max": 1.0 }],
                "paletteColors": NDVI_PALETTE,
            },
        });
        let response = self.post_json(url, &body)?;
        let map: MapResponse =
            serde_json::from_value(response).context("Unexpected maps response")?;
        tile_url_template(&self.api_base, &map.name)
    }
}

impl IndexProvider for EarthEngineCollect {
    fn mean_index(&self, query: &IndexQuery) -> Result<Option<f64>> {
        let expression = mean_ndvi_expression(
            &self.settings,
            &query.coordinate,
            &query.date_range,
            &query.parameters,
        );
        let result = self.compute_value(expression)?;
        Ok(extract_index(&result))
    }

    fn index_layer(&self, query: &LayerQuery) -> Result<Option<TileLayer>> {
        if query.coordinates.is_empty() {
            return Ok(None);
        }
        let expression = ndvi_layer_expression(
            &self.settings,
            &query.coordinates,
            &query.date_range,
            &query.parameters,
        );
        let url_template = self.create_map(expression)?;
        Ok(Some(TileLayer {
            name: NDVI_BAND.to_string(),
            url_template,
            attribution: "Google Earth Engine, Copernicus Sentinel-2".to_string(),
        }))
    }
}

/// NDVI entry of a reduceRegion dictionary; absent or null means no imagery
fn extract_index(result: &Value) -> Option<f64> {
    sanitize_index(result.get(NDVI_BAND).and_then(Value::as_f64))
}

fn tile_url_template(api_base: &Url, map_name: &str) -> Result<String> {
    let map_url = api_base
        .join(map_name)
        .with_context(|| format!("Invalid map name: {}", map_name))?;
    Ok(format!(
        "{}/tiles/{{z}}/{{x}}/{{y}}",
        map_url.as_str().trim_end_matches('/')
    ))
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.status.is_empty() => {
            format!("{} ({})", envelope.error.message, envelope.error.status)
        }
        Ok(envelope) => envelope.error.message,
        Err(_) => body.to_string(),
    }
}
