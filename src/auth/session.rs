//! Short-lived console socket credentials
//!
//! The panel hands out a websocket URL plus a JWT that expires after a few
//! minutes. The provider only fetches; deciding when to re-fetch belongs to
//! the connection state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("panel request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("panel returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("malformed websocket details: {0}")]
    Malformed(String),
}

impl AuthError {
    /// Rejections count towards the bounded retry budget; everything else is
    /// treated like a transport hiccup.
    pub fn is_rejection(&self) -> bool {
        match self {
            AuthError::Status { code, .. } => matches!(code, 401 | 403 | 404),
            AuthError::Malformed(_) => true,
            AuthError::Http(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub socket_url: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(socket_url: String, token: String, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(600));
        Self {
            socket_url,
            token,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn expires_within(&self, margin: Duration) -> bool {
        self.remaining() <= margin
    }

    /// Time left before the token enters the refresh margin
    pub fn refresh_in(&self, margin: Duration) -> Duration {
        self.remaining().saturating_sub(margin)
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn acquire(&self) -> Result<Credentials, AuthError>;
}

#[derive(Debug, Deserialize)]
struct WebsocketDetails {
    data: Option<WebsocketData>,
}

#[derive(Debug, Deserialize)]
struct WebsocketData {
    socket: String,
    token: String,
}

pub struct PanelSessionProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    token_ttl: Duration,
}

impl PanelSessionProvider {
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/client/servers/{}/websocket",
                config.panel_base(),
                config.panel.server_id
            ),
            api_key: config.panel.api_key.clone(),
            token_ttl: config.websocket.token_ttl(),
        })
    }

    fn parse_details(&self, body: &str) -> Result<Credentials, AuthError> {
        let details: WebsocketDetails =
            serde_json::from_str(body).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let data = details
            .data
            .ok_or_else(|| AuthError::Malformed("response has no data object".to_string()))?;

        if data.socket.is_empty() || data.token.is_empty() {
            return Err(AuthError::Malformed("empty socket url or token".to_string()));
        }

        Ok(Credentials::new(data.socket, data.token, self.token_ttl))
    }
}

#[async_trait]
impl CredentialSource for PanelSessionProvider {
    async fn acquire(&self) -> Result<Credentials, AuthError> {
        tracing::debug!("Requesting websocket details from {}", self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::Status {
                code: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let credentials = self.parse_details(&body)?;
        tracing::info!("Got websocket details, token valid until {}", credentials.expires_at);
        Ok(credentials)
    }
}
