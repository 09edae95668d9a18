//! # Credential Cache
//!
//! Holds the aggregator API key obtained from the client id/secret exchange.
//! The key is handed out until it reaches its local expiry, which is set below
//! the provider's own lifetime. Refresh is single-flight: the lock is held
//! across the exchange, so concurrent misses wait for one exchange and share
//! its result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::error::{AuthError, snippet};
use super::types::{AuthRequest, AuthResponse};
use crate::config::AggregatorConfig;

/// Time source for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct CredentialCache {
    http: reqwest::Client,
    auth_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(http: reqwest::Client, config: &AggregatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            auth_url: format!("{}/auth", config.api_base.trim_end_matches('/')),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            ttl: to_chrono(config.credential_ttl()),
            clock,
            current: Mutex::new(None),
        }
    }

    /// Returns a valid API key, exchanging credentials when none is cached or
    /// the cached one has expired.
    #[instrument(skip_all)]
    pub async fn api_key(&self) -> Result<String, AuthError> {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref()
            && self.clock.now() < credential.expires_at
        {
            return Ok(credential.token.clone());
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }

    /// Drops the cached key if it is still `stale_token`. A key already
    /// replaced by another caller is left alone.
    pub async fn invalidate(&self, stale_token: &str) {
        let mut current = self.current.lock().await;
        if current
            .as_ref()
            .is_some_and(|credential| credential.token == stale_token)
        {
            debug!("Discarding rejected aggregator API key");
            *current = None;
        }
    }

    async fn exchange(&self) -> Result<Credential, AuthError> {
        let (Some(client_id), Some(client_secret)) =
            (self.client_id.as_deref(), self.client_secret.as_deref())
        else {
            warn!("Aggregator credentials are not configured");
            return Err(AuthError::MissingCredentials);
        };

        counter!("aggregator_auth_exchanges_total").increment(1);

        let response = self
            .http
            .post(&self.auth_url)
            .json(&AuthRequest {
                client_id,
                client_secret,
            })
            .send()
            .await
            .map_err(|err| {
                counter!("aggregator_auth_failures_total").increment(1);
                AuthError::Transport {
                    details: err.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            counter!("aggregator_auth_failures_total").increment(1);
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Aggregator rejected credential exchange");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: snippet(body),
            });
        }

        let body: AuthResponse = response.json().await.map_err(|err| {
            counter!("aggregator_auth_failures_total").increment(1);
            AuthError::Malformed {
                details: err.to_string(),
            }
        })?;

        let expires_at = self.clock.now() + self.ttl;
        info!(expires_at = %expires_at, "Obtained aggregator API key");

        Ok(Credential {
            token: body.api_key,
            expires_at,
        })
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
