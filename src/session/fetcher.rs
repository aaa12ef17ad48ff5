//! Session endpoint client
//!
//! The store talks to the backend only through the [`SessionFetcher`] seam,
//! so tests and alternate transports can substitute their own
//! implementation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EndpointConfig;
use crate::error::{Result, TidepoolError};
use crate::session::types::AuthSession;

/// Trait for fetching and invalidating the backend session.
#[async_trait]
pub trait SessionFetcher: Send + Sync {
    /// Fetch the current session.
    ///
    /// Returns `Ok(None)` when the backend answers success with no session,
    /// `Err(Unauthenticated)` on 401, `Err(Network)` on transport failures
    /// or any other non-2xx status.
    async fn fetch_session(&self) -> Result<Option<AuthSession>>;

    /// Invalidate the server-side session.
    async fn sign_out(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    session: Option<AuthSession>,
}

/// HTTP implementation over the configured session endpoints.
pub struct HttpSessionFetcher {
    client: reqwest::Client,
    endpoints: EndpointConfig,
}

impl HttpSessionFetcher {
    pub fn new(endpoints: EndpointConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn with_client(client: reqwest::Client, endpoints: EndpointConfig) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl SessionFetcher for HttpSessionFetcher {
    async fn fetch_session(&self) -> Result<Option<AuthSession>> {
        let response = self
            .client
            .get(&self.endpoints.session_url)
            .header("cache-control", "no-store")
            .send()
            .await
            .map_err(|e| TidepoolError::network(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED => Err(TidepoolError::Unauthenticated),
            reqwest::StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let payload: SessionResponse = response
                    .json()
                    .await
                    .map_err(|e| TidepoolError::network(format!("invalid session payload: {e}")))?;
                Ok(payload.session)
            }
            status => Err(TidepoolError::network(format!(
                "unexpected session response ({status})"
            ))),
        }
    }

    async fn sign_out(&self) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoints.sign_out_url)
            .header("cache-control", "no-store")
            .send()
            .await
            .map_err(|e| TidepoolError::network(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(TidepoolError::network(format!(
                "sign out failed with status {status}"
            )))
        }
    }
}
