//! OTP provider chain.
//!
//! Order: hosted provider (sandbox or forced requests only), then a locally generated
//! code handed to direct delivery. A hosted failure demotes to the local step and
//! leaves a diagnostic note; it never fails the request.

pub mod direct;
#[cfg(test)]
pub(crate) mod fakes;
pub mod hosted;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};
use utoipa::ToSchema;

use super::identifier::{Channel, Identifier};
use super::models::OtpRecord;
pub use direct::{DeliveryStatus, OtpDelivery, OutboxDelivery, codes_match, generate_otp};
pub use hosted::{
    HostedCheck, HostedOtpProvider, HostedProviderConfig, HostedSend, SendmatorClient,
};

/// Which strategy produced the code (telemetry attribution).
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtpProvider {
    Hosted,
    Direct,
}

impl OtpProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Direct => "direct",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchRequest<'a> {
    pub identifier: &'a Identifier,
    pub sandbox: bool,
    pub forced: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpDispatch {
    /// Code to persist for local verification; `None` when only the hosted provider knows it.
    pub otp_for_storage: Option<String>,
    pub session_token: Option<String>,
    /// Code echoed to the client (sandbox, forced or failed delivery).
    pub visible_otp: Option<String>,
    pub show_otp: bool,
    pub provider: OtpProvider,
    pub note: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeCheck {
    Match,
    Mismatch,
}

#[derive(Clone)]
pub struct OtpProviderChain {
    hosted: Arc<dyn HostedOtpProvider>,
    delivery: Arc<dyn OtpDelivery>,
}

impl OtpProviderChain {
    #[must_use]
    pub fn new(hosted: Arc<dyn HostedOtpProvider>, delivery: Arc<dyn OtpDelivery>) -> Self {
        Self { hosted, delivery }
    }

    pub async fn dispatch(&self, request: DispatchRequest<'_>) -> OtpDispatch {
        let channel = request.identifier.channel();
        let recipient = request.identifier.as_str();
        let mut notes = Vec::new();

        if request.sandbox || request.forced {
            let span = info_span!(
                "otp.provider",
                provider = OtpProvider::Hosted.as_str(),
                channel = channel.as_str(),
                sandbox = request.sandbox
            );
            match self
                .hosted
                .send(channel, recipient, request.sandbox)
                .instrument(span)
                .await
            {
                HostedSend::Sent {
                    session_token,
                    sandbox_otp,
                } => {
                    info!(channel = %channel, provider = "hosted", "OTP dispatched");
                    return OtpDispatch {
                        otp_for_storage: sandbox_otp.clone(),
                        session_token: Some(session_token),
                        visible_otp: sandbox_otp,
                        show_otp: true,
                        provider: OtpProvider::Hosted,
                        note: None,
                    };
                }
                HostedSend::Failed(reason) => {
                    warn!(channel = %channel, "hosted OTP provider failed, using local code: {reason}");
                    notes.push(format!("Hosted OTP provider failed: {reason}"));
                }
            }
        }

        let code = generate_otp();
        let span = info_span!(
            "otp.provider",
            provider = OtpProvider::Direct.as_str(),
            channel = channel.as_str()
        );
        let status = self
            .delivery
            .deliver(channel, recipient, &code)
            .instrument(span)
            .await;

        let delivery_failed = match status {
            DeliveryStatus::Queued => false,
            DeliveryStatus::Failed(reason) => {
                let label = match channel {
                    Channel::Email => "Email",
                    Channel::Sms => "SMS",
                };
                notes.push(format!("{label} sending failed: {reason}"));
                true
            }
        };

        // The code stays valid even if delivery failed, so the client must see it.
        let visible = request.sandbox || request.forced || delivery_failed;
        info!(channel = %channel, provider = "direct", visible, "OTP dispatched");

        OtpDispatch {
            otp_for_storage: Some(code.clone()),
            session_token: None,
            visible_otp: visible.then_some(code),
            show_otp: true,
            provider: OtpProvider::Direct,
            note: (!notes.is_empty()).then(|| notes.join("; ")),
        }
    }

    /// Check an entered code against a stored record.
    pub async fn verify(&self, record: &OtpRecord, channel: Channel, entered: &str) -> CodeCheck {
        let local = || match record.code.as_deref() {
            Some(code) if codes_match(code, entered) => CodeCheck::Match,
            _ => CodeCheck::Mismatch,
        };

        let Some(session_token) = record.session_token.as_deref() else {
            return local();
        };

        let span = info_span!(
            "otp.provider",
            provider = OtpProvider::Hosted.as_str(),
            channel = channel.as_str()
        );
        match self
            .hosted
            .verify(session_token, channel, entered)
            .instrument(span)
            .await
        {
            HostedCheck::Approved => CodeCheck::Match,
            HostedCheck::Rejected => CodeCheck::Mismatch,
            HostedCheck::Unavailable(reason) => {
                warn!(channel = %channel, "hosted OTP verify unavailable, checking stored code: {reason}");
                local()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{RecordingDelivery, ScriptedHosted};
    use super::*;
    use crate::api::handlers::auth::identifier::normalize_identifier;
    use anyhow::Result;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn chain(hosted: &Arc<ScriptedHosted>, delivery: &Arc<RecordingDelivery>) -> OtpProviderChain {
        OtpProviderChain::new(hosted.clone(), delivery.clone())
    }

    fn record(code: Option<&str>, session_token: Option<&str>) -> OtpRecord {
        let now = Utc::now();
        OtpRecord {
            id: Uuid::now_v7(),
            identifier: "alice@example.com".to_string(),
            code: code.map(str::to_string),
            session_token: session_token.map(str::to_string),
            created_at: now,
            expires_at: now + Duration::minutes(5),
            verified: false,
        }
    }

    #[tokio::test]
    async fn production_email_uses_direct_delivery_without_echo() -> Result<()> {
        let hosted = Arc::new(ScriptedHosted::sending("sess", Some("111111")));
        let delivery = Arc::new(RecordingDelivery::queued());
        let identifier = normalize_identifier("alice@example.com")?;

        let dispatch = chain(&hosted, &delivery)
            .dispatch(DispatchRequest {
                identifier: &identifier,
                sandbox: false,
                forced: false,
            })
            .await;

        assert_eq!(dispatch.provider, OtpProvider::Direct);
        assert!(dispatch.show_otp);
        assert!(dispatch.visible_otp.is_none());
        assert!(dispatch.note.is_none());
        assert_eq!(hosted.send_calls(), 0);

        let sent = delivery.deliveries().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(Some(sent[0].2.clone()), dispatch.otp_for_storage);
        Ok(())
    }

    #[tokio::test]
    async fn sandbox_uses_hosted_provider_and_echoes_code() -> Result<()> {
        let hosted = Arc::new(ScriptedHosted::sending("sess-9", Some("654321")));
        let delivery = Arc::new(RecordingDelivery::queued());
        let identifier = normalize_identifier("alice@example.com")?;

        let dispatch = chain(&hosted, &delivery)
            .dispatch(DispatchRequest {
                identifier: &identifier,
                sandbox: true,
                forced: false,
            })
            .await;

        assert_eq!(dispatch.provider, OtpProvider::Hosted);
        assert_eq!(dispatch.session_token.as_deref(), Some("sess-9"));
        assert_eq!(dispatch.visible_otp.as_deref(), Some("654321"));
        assert!(delivery.deliveries().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn hosted_failure_demotes_to_local_code_with_note() -> Result<()> {
        let hosted = Arc::new(ScriptedHosted::failing("HTTP 503: maintenance"));
        let delivery = Arc::new(RecordingDelivery::queued());
        let identifier = normalize_identifier("98765-43210")?;

        let dispatch = chain(&hosted, &delivery)
            .dispatch(DispatchRequest {
                identifier: &identifier,
                sandbox: false,
                forced: true,
            })
            .await;

        assert_eq!(dispatch.provider, OtpProvider::Direct);
        assert!(dispatch.session_token.is_none());
        assert!(dispatch.visible_otp.is_some());
        assert_eq!(dispatch.visible_otp, dispatch.otp_for_storage);
        assert!(
            dispatch
                .note
                .as_deref()
                .is_some_and(|note| note.contains("Hosted OTP provider failed"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn delivery_failure_keeps_code_valid_and_visible() -> Result<()> {
        let hosted = Arc::new(ScriptedHosted::failing("unused"));
        let delivery = Arc::new(RecordingDelivery::failing("smtp down"));
        let identifier = normalize_identifier("alice@example.com")?;

        let dispatch = chain(&hosted, &delivery)
            .dispatch(DispatchRequest {
                identifier: &identifier,
                sandbox: false,
                forced: false,
            })
            .await;

        assert!(dispatch.otp_for_storage.is_some());
        assert_eq!(dispatch.visible_otp, dispatch.otp_for_storage);
        assert_eq!(
            dispatch.note.as_deref(),
            Some("Email sending failed: smtp down")
        );
        Ok(())
    }

    #[tokio::test]
    async fn verify_prefers_hosted_answer_when_session_exists() {
        let hosted = Arc::new(ScriptedHosted::checking(HostedCheck::Rejected));
        let delivery = Arc::new(RecordingDelivery::queued());
        let chain = chain(&hosted, &delivery);

        // Stored code matches, but the provider owns the session and said no.
        let check = chain
            .verify(&record(Some("123456"), Some("sess")), Channel::Email, "123456")
            .await;
        assert_eq!(check, CodeCheck::Mismatch);
    }

    #[tokio::test]
    async fn verify_falls_back_to_stored_code_when_provider_unavailable() {
        let hosted = Arc::new(ScriptedHosted::checking(HostedCheck::Unavailable(
            "request timed out".to_string(),
        )));
        let delivery = Arc::new(RecordingDelivery::queued());
        let chain = chain(&hosted, &delivery);

        let with_code = record(Some("123456"), Some("sess"));
        assert_eq!(
            chain.verify(&with_code, Channel::Email, "123456").await,
            CodeCheck::Match
        );

        let without_code = record(None, Some("sess"));
        assert_eq!(
            chain.verify(&without_code, Channel::Email, "123456").await,
            CodeCheck::Mismatch
        );
    }

    #[tokio::test]
    async fn local_verify_is_exact_match() {
        let hosted = Arc::new(ScriptedHosted::checking(HostedCheck::Approved));
        let delivery = Arc::new(RecordingDelivery::queued());
        let chain = chain(&hosted, &delivery);

        let stored = record(Some("123456"), None);
        assert_eq!(
            chain.verify(&stored, Channel::Email, "123456").await,
            CodeCheck::Match
        );
        assert_eq!(
            chain.verify(&stored, Channel::Email, "123457").await,
            CodeCheck::Mismatch
        );
        assert_eq!(hosted.verify_calls(), 0);
    }
}
