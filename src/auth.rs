use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::{EtlError, Result};

/// Short-lived bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Exchanges the long-lived refresh credential for a bearer token.
pub struct TokenProvider {
    client: Client,
    token_url: String,
    credentials: Credentials,
}

impl TokenProvider {
    pub fn new(client: Client, token_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            credentials,
        }
    }

    /// One round trip, no retry. Any failure is fatal for the run.
    pub async fn access_token(&self) -> Result<AccessToken> {
        debug!(url = %self.token_url, "Exchanging refresh token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&params)
            .send()
            .await
            .map_err(|e| EtlError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token refresh rejected");
            return Err(EtlError::Auth(format!("token refresh failed ({status}): {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EtlError::Auth(format!("unreadable token response: {e}")))?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EtlError::Auth("token response has no access_token".into()))?;

        info!(expires_in = ?token.expires_in, "Obtained access token");
        Ok(AccessToken(access_token))
    }
}
