//! Environment-derived configuration.
//!
//! Everything is read once at startup into [`Config`] and handed to the
//! components that need it, so tests can build a config from a map instead of
//! mutating the process environment.
use anyhow::{anyhow, Context, Result};
#[cfg(test)]
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_PROJECT_ID: &str = "healthcaretestcasegeneration";
pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_BUCKET: &str = "hackathon-assets-team1-healthcaretestcasegeneration";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKERS: usize = 4;

/// Warehouse dataset holding trace and compliance tables.
pub const QA_DATASET: &str = "qa_metrics";

/// How outbound calls to managed services authenticate.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Direct key-based calls to the public generative API.
    ApiKey(String),
    /// Passthrough OAuth access token for managed endpoints.
    Bearer(String),
    None,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "ApiKey(<redacted>)"),
            Self::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            Self::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub location: String,
}

#[derive(Clone)]
pub struct Config {
    pub project_id: String,
    /// Bucket named by `ASSETS_BUCKET`/`BUCKET_NAME`, if any.
    pub bucket: Option<String>,
    pub model: ModelConfig,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub app_url: Option<String>,
    pub port: u16,
    pub workers: usize,
    pub lm_command: Option<String>,
    pub lm_log: Option<PathBuf>,
    pub local_root: Option<PathBuf>,
}

impl Config {
    /// Load `.env` when present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("load .env");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[cfg(test)]
    pub fn from_map(vars: &BTreeMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let region = get(&["REGION", "GOOGLE_CLOUD_REGION"]).unwrap_or_else(|| DEFAULT_REGION.into());
        let port = match get(&["PORT"]) {
            Some(raw) => raw.parse().with_context(|| format!("parse PORT {raw:?}"))?,
            None => DEFAULT_PORT,
        };
        let workers = match get(&["MEDREQ_WORKERS"]) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("parse MEDREQ_WORKERS {raw:?}"))?,
            None => DEFAULT_WORKERS,
        };
        if workers == 0 {
            return Err(anyhow!("MEDREQ_WORKERS must be at least 1"));
        }

        Ok(Self {
            project_id: get(&["PROJECT_ID", "GOOGLE_CLOUD_PROJECT"])
                .unwrap_or_else(|| DEFAULT_PROJECT_ID.into()),
            bucket: get(&["ASSETS_BUCKET", "BUCKET_NAME"]),
            model: ModelConfig {
                name: get(&["LLM_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.into()),
                location: get(&["LLM_LOCATION"]).unwrap_or(region),
            },
            api_key: get(&["GOOGLE_API_KEY", "GENAI_API_KEY"]),
            access_token: get(&["GOOGLE_OAUTH_ACCESS_TOKEN"]),
            app_url: get(&["APP_URL"]).map(|url| url.trim_end_matches('/').to_string()),
            port,
            workers,
            lm_command: get(&["MEDREQ_LM_COMMAND"]),
            lm_log: get(&["MEDREQ_LM_LOG"]).map(PathBuf::from),
            local_root: get(&["MEDREQ_LOCAL_ROOT"]).map(PathBuf::from),
        })
    }

    /// Configured bucket, falling back to the shared assets bucket.
    pub fn bucket_or_default(&self) -> &str {
        self.bucket.as_deref().unwrap_or(DEFAULT_BUCKET)
    }

    /// Credential for the generative endpoint; an API key takes precedence.
    pub fn genai_credential(&self) -> Credential {
        if let Some(key) = &self.api_key {
            return Credential::ApiKey(key.clone());
        }
        self.service_credential()
    }

    /// Credential for storage and warehouse calls.
    pub fn service_credential(&self) -> Credential {
        match &self.access_token {
            Some(token) => Credential::Bearer(token.clone()),
            None => Credential::None,
        }
    }
}
