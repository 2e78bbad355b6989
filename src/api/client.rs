//! # Game API Client
//!
//! Signed HTTP transport to the remote game service.
//!
//! ## Endpoints
//!
//! - **Player lookup** (login): two equivalent hosts, picked by the
//!   [`RateLimiter`](crate::api::rate_limiter::RateLimiter)
//! - **Captcha**: returns a base64 challenge image
//! - **Gift code**: submits a code with the solved challenge
//!
//! Every request is a form-encoded POST carrying a `sign` field
//! (see [`crate::common::signing`]) and the configured `origin` header.
//!
//! ## Sessions
//!
//! The provider tracks the login through cookies, so every successful login
//! returns a [`Session`] that owns its own cookie jar. Challenge fetches and
//! submissions for that account reuse it.

use async_trait::async_trait;
use base64::Engine;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::common::config::ApiConfig;
use crate::common::error::ApiError;
use crate::common::messages::AccountId;
use crate::common::signing::signed_form;

/// Message returned by the captcha endpoint when challenges are requested too fast.
const CAPTCHA_TOO_FREQUENT: &str = "CAPTCHA GET TOO FREQUENT.";

/// One of the two equivalent player lookup hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Primary,
    Secondary,
}

impl Endpoint {
    pub fn other(self) -> Self {
        match self {
            Endpoint::Primary => Endpoint::Secondary,
            Endpoint::Secondary => Endpoint::Primary,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Primary => f.write_str("primary"),
            Endpoint::Secondary => f.write_str("secondary"),
        }
    }
}

/// A logged-in account.
#[derive(Debug, Clone)]
pub struct Session {
    pub account: AccountId,
    pub nickname: String,
    client: Option<reqwest::Client>,
}

impl Session {
    /// A session without a transport of its own (used by in-process fakes).
    pub fn detached(account: AccountId, nickname: impl Into<String>) -> Self {
        Self {
            account,
            nickname: nickname.into(),
            client: None,
        }
    }
}

/// Result of a challenge fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Raw (decoded) image bytes
    Image(Vec<u8>),
    /// The provider refused to issue a challenge right now
    TooFrequent,
}

/// Raw answer of the gift-code endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReply {
    pub msg: String,
    pub err_code: Option<i64>,
}

/// Operations the redemption core needs from the game service.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Look up the player on `endpoint` and open a session for it.
    async fn login(&self, endpoint: Endpoint, account: AccountId) -> Result<Session, ApiError>;

    async fn fetch_challenge(&self, session: &Session) -> Result<Challenge, ApiError>;

    async fn submit_code(
        &self,
        session: &Session,
        code: &str,
        answer: &str,
    ) -> Result<SubmitReply, ApiError>;

    /// Reachability check: HTTP 200 or 429 means the endpoint answers.
    async fn probe(&self, endpoint: Endpoint, account: AccountId) -> bool;
}

// ============================================================================
// RESPONSE ENVELOPE
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    err_code: Value,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn msg(&self) -> &str {
        self.msg.as_deref().unwrap_or_default()
    }

    /// `err_code` arrives as a number, a numeric string or an empty string.
    fn err_code(&self) -> Option<i64> {
        match &self.err_code {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn rejected(&self) -> ApiError {
        ApiError::Rejected {
            message: self.msg().to_string(),
            err_code: self.err_code(),
        }
    }
}

/// Strip an optional `data:image/...;base64,` prefix and decode.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, ApiError> {
    let data = if payload.starts_with("data:image") {
        payload
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ApiError::Decode("data URI without payload".to_string()))?
    } else {
        payload
    };

    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::Decode(format!("challenge image: {}", e)))
}

fn now_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

fn now_secs() -> String {
    chrono::Utc::now().timestamp().to_string()
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

/// [`GameApi`] over `reqwest`.
pub struct HttpGameApi {
    config: ApiConfig,
    /// Transport for requests that do not belong to a session (probes)
    client: reqwest::Client,
}

impl HttpGameApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Self::build_client(&config)?;
        Ok(Self { config, client })
    }

    fn build_client(config: &ApiConfig) -> Result<reqwest::Client, ApiError> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .cookie_store(true)
            .build()?)
    }

    fn player_url(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Primary => &self.config.primary_player_url,
            Endpoint::Secondary => &self.config.secondary_player_url,
        }
    }

    async fn post(
        &self,
        client: &reqwest::Client,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, ApiError> {
        let form = signed_form(params, &self.config.secret);
        let response = client
            .post(url)
            .header("accept", "application/json, text/plain, */*")
            .header("origin", &self.config.origin)
            .form(&form)
            .send()
            .await?;
        Ok(response)
    }

    async fn post_json(
        &self,
        client: &reqwest::Client,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Envelope, ApiError> {
        let response = self.post(client, url, params).await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        debug!("📨 {} -> {}", url, body);
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn session_client<'a>(&'a self, session: &'a Session) -> &'a reqwest::Client {
        session.client.as_ref().unwrap_or(&self.client)
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn login(&self, endpoint: Endpoint, account: AccountId) -> Result<Session, ApiError> {
        let client = Self::build_client(&self.config)?;
        let params = [("fid", account.to_string()), ("time", now_secs())];
        let envelope = self
            .post_json(&client, self.player_url(endpoint), &params)
            .await?;

        if envelope.msg() != "success" {
            return Err(envelope.rejected());
        }

        let nickname = envelope
            .data
            .get("nickname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Session {
            account,
            nickname,
            client: Some(client),
        })
    }

    async fn fetch_challenge(&self, session: &Session) -> Result<Challenge, ApiError> {
        let params = [
            ("fid", session.account.to_string()),
            ("time", now_millis()),
            ("init", "0".to_string()),
        ];
        let envelope = self
            .post_json(self.session_client(session), &self.config.captcha_url, &params)
            .await?;

        if envelope.code == Some(1) && envelope.msg() == CAPTCHA_TOO_FREQUENT {
            return Ok(Challenge::TooFrequent);
        }

        match envelope.data.get("img").and_then(Value::as_str) {
            Some(img) if !img.is_empty() => Ok(Challenge::Image(decode_image(img)?)),
            _ => {
                warn!(
                    "⚠️  No challenge image for {} (msg '{}')",
                    session.account,
                    envelope.msg()
                );
                Err(envelope.rejected())
            }
        }
    }

    async fn submit_code(
        &self,
        session: &Session,
        code: &str,
        answer: &str,
    ) -> Result<SubmitReply, ApiError> {
        let params = [
            ("fid", session.account.to_string()),
            ("cdk", code.to_string()),
            ("captcha_code", answer.to_string()),
            ("time", now_millis()),
        ];
        let envelope = self
            .post_json(self.session_client(session), &self.config.gift_code_url, &params)
            .await?;

        Ok(SubmitReply {
            msg: envelope.msg().to_string(),
            err_code: envelope.err_code(),
        })
    }

    async fn probe(&self, endpoint: Endpoint, account: AccountId) -> bool {
        let params = [("fid", account.to_string()), ("time", now_secs())];
        match self.post(&self.client, self.player_url(endpoint), &params).await {
            Ok(response) => {
                let status = response.status();
                status == StatusCode::OK || status == StatusCode::TOO_MANY_REQUESTS
            }
            Err(e) => {
                warn!("⚠️  Probe of {} endpoint failed: {}", endpoint, e);
                false
            }
        }
    }
}
