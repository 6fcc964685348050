//! REST backend configuration.
//!
//! A deployment is described by two service URLs (document tree and blob
//! store) plus an optional API key. Operators usually paste the whole
//! thing as one opaque connection string from the backend console, either
//! raw JSON or URL-safe base64-encoded JSON.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::{AdminError, Result};

/// Environment variable holding the connection string.
pub const CONNECTION_ENV: &str = "VIRTUDECOR_CONNECTION";

/// Default timeout applied to every REST call (15 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub database_url: String,
    pub storage_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(database_url: &str, storage_url: &str) -> Self {
        Self {
            database_url: normalize_database_url(database_url),
            storage_url: normalize_service_url(storage_url),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Decodes a connection string: raw JSON, or URL-safe base64 JSON
    /// with the keys `databaseUrl`/`database_url`, `storageUrl`/
    /// `storage_url`, `apiKey`/`api_key`.
    pub fn from_connection_string(raw: &str) -> Result<Self> {
        let payload = decode_connection_payload(raw).ok_or_else(|| {
            AdminError::validation("Connection string is not valid JSON or base64 JSON")
        })?;
        let database_url = string_field(&payload, &["databaseUrl", "database_url"])
            .ok_or_else(|| {
                AdminError::validation("Connection string is missing the database URL")
            })?;
        let storage_url = string_field(&payload, &["storageUrl", "storage_url"])
            .ok_or_else(|| {
                AdminError::validation("Connection string is missing the storage URL")
            })?;

        let mut config = Self::new(&database_url, &storage_url);
        config.api_key = string_field(&payload, &["apiKey", "api_key"]);
        Ok(config)
    }

    /// Reads the connection string from [`CONNECTION_ENV`].
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(CONNECTION_ENV)
            .map_err(|_| AdminError::validation(format!("{CONNECTION_ENV} is not set")))?;
        Self::from_connection_string(&raw)
    }
}

/// Normalise a database URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/.json` left over from a pasted root reference
pub fn normalize_database_url(url: &str) -> String {
    let mut url = normalize_service_url(url);
    if url.ends_with("/.json") {
        url.truncate(url.len() - "/.json".len());
    }
    while url.ends_with('/') {
        url.pop();
    }
    url
}

fn normalize_service_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn decode_connection_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    // URL-safe alphabet with the padding usually stripped.
    let standard = compact.replace('-', "+").replace('_', "/");
    let padding = (4 - standard.len() % 4) % 4;
    let padded = format!("{standard}{}", "=".repeat(padding));
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
