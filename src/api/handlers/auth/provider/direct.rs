//! Locally generated codes delivered through the message outbox.

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use crate::api::handlers::auth::identifier::Channel;
use crate::api::handlers::auth::models::OutboundMessage;
use crate::api::handlers::auth::storage::AuthStore;

pub const OTP_TEMPLATE: &str = "otp_code";

/// Six-digit numeric code.
#[must_use]
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000_u32..1_000_000).to_string()
}

/// Constant-time comparison for codes and shared secrets.
#[must_use]
pub fn codes_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Queued,
    Failed(String),
}

#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, channel: Channel, recipient: &str, code: &str) -> DeliveryStatus;
}

/// Enqueue the code for the outbox worker; the request never waits on SMTP.
pub struct OutboxDelivery {
    store: Arc<dyn AuthStore>,
    ttl_minutes: i64,
}

impl OutboxDelivery {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, ttl_minutes: i64) -> Self {
        Self { store, ttl_minutes }
    }
}

#[async_trait]
impl OtpDelivery for OutboxDelivery {
    async fn deliver(&self, channel: Channel, recipient: &str, code: &str) -> DeliveryStatus {
        let message = OutboundMessage {
            channel,
            recipient: recipient.to_string(),
            template: OTP_TEMPLATE.to_string(),
            payload_json: json!({
                "code": code,
                "expires_in_minutes": self.ttl_minutes,
            }),
        };

        match self.store.enqueue_outbound(&message).await {
            Ok(()) => {
                debug!(channel = %channel, "OTP queued for delivery");
                DeliveryStatus::Queued
            }
            Err(err) => {
                error!(channel = %channel, "failed to queue OTP delivery: {err:#}");
                DeliveryStatus::Failed(err.to_string())
            }
        }
    }
}
