use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::collect::global_variables::EE_SCOPE;
use crate::error::VegwatchError;

/// Environment variable holding a pre-issued OAuth access token (interactive flow)
pub const ACCESS_TOKEN_ENV: &str = "VEGWATCH_ACCESS_TOKEN";
/// Streamlit-style secrets file checked when no path is given
pub const DEFAULT_SECRETS_PATH: &str = ".streamlit/secrets.toml";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;
/// Lifetime requested for the signed assertion (Google's maximum)
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Service-account identity as found in a Google key file or in `[google_earth_engine]`
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Keys pasted into TOML single-quoted strings keep literal `\n` sequences
    fn private_key_pem(&self) -> String {
        if self.private_key.contains("\\n") && !self.private_key.contains('\n') {
            self.private_key.replace("\\n", "\n")
        } else {
            self.private_key.clone()
        }
    }
}

/// Streamlit secrets layout
#[derive(Debug, Deserialize)]
struct StreamlitSecrets {
    google_earth_engine: ServiceAccountKey,
}

#[derive(Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AccessToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
        }
    }
}

/// Resolve credentials: access token from the environment first,
/// then the given secrets file (TOML secrets or JSON key), then the default secrets file
pub fn load_credentials(secrets_path: Option<&Path>) -> Result<Credentials> {
    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        if !token.trim().is_empty() {
            tracing::debug!("using access token from {}", ACCESS_TOKEN_ENV);
            return Ok(Credentials::AccessToken(token.trim().to_string()));
        }
    }

    let path = match secrets_path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_SECRETS_PATH);
            if !default.exists() {
                return Err(VegwatchError::MissingCredentials(format!(
                    "set {} or provide a secrets file ({} not found)",
                    ACCESS_TOKEN_ENV, DEFAULT_SECRETS_PATH
                ))
                .into());
            }
            default
        }
    };

    load_service_account(&path).map(Credentials::ServiceAccount)
}

/// Read a service account from a `.json` key file or a secrets TOML with a `[google_earth_engine]` table
pub fn load_service_account(path: &Path) -> Result<ServiceAccountKey> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .with_context(|| format!("Failed to read secrets file: {:?}", path))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let key = if is_json {
        settings
            .try_deserialize::<ServiceAccountKey>()
            .with_context(|| format!("Not a service-account key file: {:?}", path))?
    } else {
        settings
            .try_deserialize::<StreamlitSecrets>()
            .with_context(|| format!("No [google_earth_engine] section in {:?}", path))?
            .google_earth_engine
    };
    Ok(key)
}

/// JWT bearer assertion claims
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_MARGIN_SECS) < expires_at,
            None => true,
        }
    }
}

/// Hands out bearer tokens, exchanging a fresh assertion when the cached one runs out
pub struct TokenSource {
    credentials: Credentials,
    token_url: String,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    pub fn new(credentials: Credentials, token_url: impl Into<String>) -> Self {
        let cached = match &credentials {
            Credentials::AccessToken(token) => Some(AccessToken {
                value: token.clone(),
                expires_at: None,
            }),
            Credentials::ServiceAccount(_) => None,
        };
        TokenSource {
            credentials,
            token_url: token_url.into(),
            cached: Mutex::new(cached),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Valid bearer token; any failure is an `Authentication` error
    pub fn bearer(&self, client: &Client) -> Result<String> {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let key = match &self.credentials {
            Credentials::ServiceAccount(key) => key,
            // Pre-issued tokens never expire from our point of view
            Credentials::AccessToken(token) => return Ok(token.clone()),
        };

        let token = self
            .exchange(client, key)
            .map_err(|e| VegwatchError::Authentication(format!("{:#}", e)))?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn exchange(&self, client: &Client, key: &ServiceAccountKey) -> Result<AccessToken> {
        let assertion = sign_assertion(key, &self.token_url, Utc::now())?;
        tracing::debug!(client_email = %key.client_email, "requesting Earth Engine access token");

        let response = client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .context("Failed to reach the OAuth token endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("token endpoint returned {}: {}", status, body);
        }

        let token: TokenResponse = response
            .json()
            .context("Failed to parse OAuth token response")?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }
}

/// RS256-signed assertion for the JWT bearer grant
fn sign_assertion(key: &ServiceAccountKey, audience: &str, now: DateTime<Utc>) -> Result<String> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key_pem().as_bytes())
        .context("Service-account private key is not a valid RSA PEM key")?;
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: EE_SCOPE,
        aud: audience,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .context("Failed to sign service-account assertion")
}
