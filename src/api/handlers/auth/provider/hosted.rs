//! Hosted OTP provider (Sendmator-compatible HTTP API).
//!
//! The provider owns code generation and delivery; we keep only its session token.
//! Every failure mode is reported as a value so the chain can demote to local codes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, time::Duration};
use tracing::debug;

use crate::APP_USER_AGENT;
use crate::api::handlers::auth::identifier::Channel;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.sendmator.com/api/v1/otp";
pub const DEFAULT_COUNTRY_CODE: &str = "+91";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const VERIFICATION_PURPOSE: &str = "pinmate_verification";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostedSend {
    Sent {
        session_token: String,
        /// Only returned by the provider in sandbox mode.
        sandbox_otp: Option<String>,
    },
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostedCheck {
    Approved,
    Rejected,
    /// The provider could not answer; callers may fall back to a stored code.
    Unavailable(String),
}

#[async_trait]
pub trait HostedOtpProvider: Send + Sync {
    async fn send(&self, channel: Channel, recipient: &str, sandbox: bool) -> HostedSend;

    async fn verify(&self, session_token: &str, channel: Channel, code: &str) -> HostedCheck;
}

#[derive(Clone, Debug)]
pub struct HostedProviderConfig {
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    country_code: String,
}

impl HostedProviderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_country_code(mut self, country_code: String) -> Self {
        self.country_code = country_code;
        self
    }
}

impl Default for HostedProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Debug)]
struct SendResponse {
    session_token: Option<String>,
    #[serde(default)]
    sandbox_otps: HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct VerifyResponse {
    #[serde(default)]
    verified: bool,
    session_verified: Option<bool>,
    attempts_remaining: Option<i64>,
}

pub struct SendmatorClient {
    client: reqwest::Client,
    config: HostedProviderConfig,
}

impl SendmatorClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: HostedProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("failed to build hosted OTP provider client")?;
        Ok(Self { client, config })
    }

    fn recipient(&self, channel: Channel, recipient: &str) -> String {
        match channel {
            Channel::Sms if !recipient.starts_with('+') => {
                format!("{}{recipient}", self.config.country_code)
            }
            _ => recipient.to_string(),
        }
    }

    fn post(&self, path: &str, api_key: &SecretString) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{path}", self.config.base_url))
            .header("X-API-Key", api_key.expose_secret())
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

#[async_trait]
impl HostedOtpProvider for SendmatorClient {
    async fn send(&self, channel: Channel, recipient: &str, sandbox: bool) -> HostedSend {
        let Some(api_key) = &self.config.api_key else {
            return HostedSend::Failed("hosted OTP provider is not configured".to_string());
        };

        let key = channel.as_str();
        let payload = json!({
            "channels": [key],
            "recipients": { key: self.recipient(channel, recipient) },
            "metadata": { "purpose": VERIFICATION_PURPOSE },
            "sandbox_mode": sandbox,
        });

        let response = match self.post("send", api_key).json(&payload).send().await {
            Ok(response) => response,
            Err(err) => return HostedSend::Failed(describe(&err)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return HostedSend::Failed(format!("HTTP {}: {body}", status.as_u16()));
        }

        match response.json::<SendResponse>().await {
            Ok(SendResponse {
                session_token: Some(session_token),
                mut sandbox_otps,
            }) => HostedSend::Sent {
                session_token,
                sandbox_otp: sandbox_otps.remove(key),
            },
            Ok(_) => HostedSend::Failed("response did not include a session token".to_string()),
            Err(err) => HostedSend::Failed(format!("invalid response: {err}")),
        }
    }

    async fn verify(&self, session_token: &str, channel: Channel, code: &str) -> HostedCheck {
        let Some(api_key) = &self.config.api_key else {
            return HostedCheck::Unavailable("hosted OTP provider is not configured".to_string());
        };

        let payload = json!({
            "session_token": session_token,
            "otps": { channel.as_str(): code },
        });

        let response = match self.post("verify", api_key).json(&payload).send().await {
            Ok(response) => response,
            Err(err) => return HostedCheck::Unavailable(describe(&err)),
        };

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return HostedCheck::Unavailable(format!("HTTP {}", status.as_u16()));
        }
        if !status.is_success() {
            return HostedCheck::Rejected;
        }

        match response.json::<VerifyResponse>().await {
            Ok(body) => {
                debug!(
                    session_verified = ?body.session_verified,
                    attempts_remaining = ?body.attempts_remaining,
                    "hosted OTP verification answered"
                );
                // A code match alone is not enough; the session must be closed too.
                if body.verified && body.session_verified.unwrap_or(false) {
                    HostedCheck::Approved
                } else {
                    HostedCheck::Rejected
                }
            }
            Err(err) => HostedCheck::Unavailable(format!("invalid response: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::post,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::{net::TcpListener, sync::Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        send: Arc<Mutex<Option<Value>>>,
        api_key: Arc<Mutex<Option<String>>>,
    }

    async fn send_ok(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        *captured.api_key.lock().await = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *captured.send.lock().await = Some(body);
        Json(json!({
            "session_token": "sess-1",
            "sandbox_otps": { "email": "654321", "sms": "112233" }
        }))
    }

    async fn verify_by_code(Json(body): Json<Value>) -> impl IntoResponse {
        let code = body["otps"]["email"].as_str().unwrap_or_default().to_string();
        match code.as_str() {
            "654321" => (
                AxumStatus::OK,
                Json(json!({"verified": true, "session_verified": true})),
            ),
            "500500" => (AxumStatus::BAD_GATEWAY, Json(json!({"error": "upstream"}))),
            "777777" => (
                AxumStatus::OK,
                Json(json!({"verified": true, "session_verified": false})),
            ),
            "888888" => (AxumStatus::OK, Json(json!({"verified": true}))),
            _ => (
                AxumStatus::BAD_REQUEST,
                Json(json!({"verified": false, "attempts_remaining": 2})),
            ),
        }
    }

    async fn serve(router: Router) -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(format!("http://{addr}"))
    }

    fn client(base_url: String) -> anyhow::Result<SendmatorClient> {
        SendmatorClient::new(
            HostedProviderConfig::new()
                .with_base_url(base_url)
                .with_api_key(Some(SecretString::from("test-key".to_string())))
                .with_timeout(Duration::from_millis(300)),
        )
    }

    #[tokio::test]
    async fn send_returns_session_and_sandbox_code() -> anyhow::Result<()> {
        let captured = Captured::default();
        let router = Router::new()
            .route("/send", post(send_ok))
            .with_state(captured.clone());
        let client = client(serve(router).await?)?;

        let result = client.send(Channel::Email, "alice@example.com", true).await;
        assert_eq!(
            result,
            HostedSend::Sent {
                session_token: "sess-1".to_string(),
                sandbox_otp: Some("654321".to_string()),
            }
        );

        let payload = captured.send.lock().await.clone().unwrap_or_default();
        assert_eq!(payload["channels"], json!(["email"]));
        assert_eq!(payload["recipients"]["email"], "alice@example.com");
        assert_eq!(payload["metadata"]["purpose"], VERIFICATION_PURPOSE);
        assert_eq!(payload["sandbox_mode"], true);
        assert_eq!(
            captured.api_key.lock().await.as_deref(),
            Some("test-key")
        );
        Ok(())
    }

    #[tokio::test]
    async fn sms_recipients_get_country_code() -> anyhow::Result<()> {
        let captured = Captured::default();
        let router = Router::new()
            .route("/send", post(send_ok))
            .with_state(captured.clone());
        let client = client(serve(router).await?)?;

        let result = client.send(Channel::Sms, "9876543210", false).await;
        assert!(matches!(result, HostedSend::Sent { .. }));

        let payload = captured.send.lock().await.clone().unwrap_or_default();
        assert_eq!(payload["recipients"]["sms"], "+919876543210");
        Ok(())
    }

    #[tokio::test]
    async fn verify_maps_responses_to_outcomes() -> anyhow::Result<()> {
        let router = Router::new().route("/verify", post(verify_by_code));
        let client = client(serve(router).await?)?;

        assert_eq!(
            client.verify("sess-1", Channel::Email, "654321").await,
            HostedCheck::Approved
        );
        assert_eq!(
            client.verify("sess-1", Channel::Email, "000000").await,
            HostedCheck::Rejected
        );
        // Matching code on a session that is still open.
        assert_eq!(
            client.verify("sess-1", Channel::Email, "777777").await,
            HostedCheck::Rejected
        );
        assert_eq!(
            client.verify("sess-1", Channel::Email, "888888").await,
            HostedCheck::Rejected
        );
        assert!(matches!(
            client.verify("sess-1", Channel::Email, "500500").await,
            HostedCheck::Unavailable(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn timeouts_are_failures() -> anyhow::Result<()> {
        let router = Router::new().route(
            "/send",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({"session_token": "late"}))
            }),
        );
        let client = client(serve(router).await?)?;

        let result = client.send(Channel::Email, "alice@example.com", true).await;
        assert_eq!(result, HostedSend::Failed("request timed out".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() -> anyhow::Result<()> {
        let client = SendmatorClient::new(
            HostedProviderConfig::new().with_base_url("http://127.0.0.1:9".to_string()),
        )?;
        assert!(matches!(
            client.send(Channel::Email, "alice@example.com", true).await,
            HostedSend::Failed(_)
        ));
        assert!(matches!(
            client.verify("sess", Channel::Email, "123456").await,
            HostedCheck::Unavailable(_)
        ));
        Ok(())
    }
}
