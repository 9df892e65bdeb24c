//! Configuration loading and validation for the gateway.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.
//! Nested keys use a double underscore, e.g. `TABLES__STAFF=Employees`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::registry::TableKind;
use crate::store::http::StoreSettings;

/// Largest page the remote store serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Validated gateway configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Base URL of the remote store API. **Required.**
    pub store_base_url: String,

    /// Bearer token for the remote store. **Required.**
    pub store_api_token: String,

    /// Document (base) identifier holding every table. **Required.**
    pub store_document_id: String,

    /// Records requested per list call.
    #[serde(default = "default_page_size")]
    pub store_page_size: u32,

    /// Key material: 64 hex chars, base64, or a passphrase. Absent means
    /// values are written in plaintext.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Comma-separated field names added to the plaintext whitelist.
    #[serde(default)]
    pub plaintext_fields: String,

    /// Remote table-name overrides keyed by logical table.
    #[serde(default)]
    pub tables: HashMap<String, String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint. Spans are only exported when set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store_base_url", &self.store_base_url)
            .field("store_api_token", &"[REDACTED]")
            .field("store_document_id", &self.store_document_id)
            .field("store_page_size", &self.store_page_size)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("plaintext_fields", &self.plaintext_fields)
            .field("tables", &self.tables)
            .field("log_level", &self.log_level)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .finish()
    }
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::default().separator("__"))
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Extra plaintext field names, trimmed, blanks dropped.
    pub fn plaintext_fields(&self) -> Vec<String> {
        self.plaintext_fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            base_url: self.store_base_url.trim().to_owned(),
            api_token: self.store_api_token.trim().to_owned(),
            document_id: self.store_document_id.trim().to_owned(),
            page_size: self.store_page_size,
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.store_base_url, "STORE_BASE_URL")?;
        ensure_non_empty(&self.store_api_token, "STORE_API_TOKEN")?;
        ensure_non_empty(&self.store_document_id, "STORE_DOCUMENT_ID")?;

        reqwest::Url::parse(self.store_base_url.trim()).with_context(|| {
            format!("STORE_BASE_URL is not a valid URL: {}", self.store_base_url)
        })?;

        if !(1..=MAX_PAGE_SIZE).contains(&self.store_page_size) {
            anyhow::bail!("STORE_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}");
        }
        for key in self.tables.keys() {
            if TableKind::parse(key).is_none() {
                anyhow::bail!("TABLES__{} does not name a known table", key.to_uppercase());
            }
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
