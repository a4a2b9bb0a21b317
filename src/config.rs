//! Settings for both pipeline stages, read from the environment.
//!
//! A `.env` file is honoured when present. Every setting is passed into the
//! component that needs it at construction; nothing is read from process-wide
//! state after startup.

use std::{env, time::Duration};

use crate::error::{EtlError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_MARKET: &str = "MY";
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_base: String,
    pub token_url: String,
    pub market: Option<String>,
    pub page_size: usize,
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            market: Some(DEFAULT_MARKET.to_string()),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Where the pipeline keeps its objects: `s3://bucket`, `memory://`, or a
/// local directory (optionally written as `file:///path`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub root: String,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub credentials: Credentials,
    pub api: ApiSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub storage: StorageSettings,
}

impl ExtractionConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// All missing required variables are reported together.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let client_id = get("SPOTIFY_CLIENT_ID");
        let client_secret = get("SPOTIFY_CLIENT_SECRET");
        let refresh_token = get("SPOTIFY_REFRESH_TOKEN");
        let storage = storage_root(&get);

        let missing: Vec<&str> = [
            ("SPOTIFY_CLIENT_ID", client_id.is_none()),
            ("SPOTIFY_CLIENT_SECRET", client_secret.is_none()),
            ("SPOTIFY_REFRESH_TOKEN", refresh_token.is_none()),
            ("STORAGE_ROOT", storage.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        let (Some(client_id), Some(client_secret), Some(refresh_token), Some(storage)) =
            (client_id, client_secret, refresh_token, storage)
        else {
            return Err(EtlError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        };

        let defaults = ApiSettings::default();
        let api = ApiSettings {
            api_base: get("SPOTIFY_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            token_url: get("SPOTIFY_TOKEN_URL").unwrap_or(defaults.token_url),
            market: get("SPOTIFY_MARKET").or(defaults.market),
            page_size: parse_var(&get, "PAGE_SIZE")?.unwrap_or(defaults.page_size),
            request_timeout: parse_var(&get, "REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };
        if api.page_size == 0 {
            return Err(EtlError::Config("PAGE_SIZE must be positive".into()));
        }

        Ok(Self {
            credentials: Credentials {
                client_id,
                client_secret,
                refresh_token,
            },
            api,
            storage,
        })
    }
}

impl TransformConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let storage = storage_root(&get).ok_or_else(|| {
            EtlError::Config("missing required environment variables: STORAGE_ROOT".into())
        })?;
        Ok(Self { storage })
    }
}

// `S3_BUCKET_NAME` is accepted for deployments that only name a bucket.
fn storage_root(get: &impl Fn(&str) -> Option<String>) -> Option<StorageSettings> {
    get("STORAGE_ROOT")
        .or_else(|| get("S3_BUCKET_NAME").map(|bucket| format!("s3://{bucket}")))
        .map(|root| StorageSettings { root })
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| EtlError::Config(format!("{key} must be a number, got {raw:?}")))
        })
        .transpose()
}
