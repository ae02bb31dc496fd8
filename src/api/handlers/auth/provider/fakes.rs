//! Scripted provider doubles shared by auth tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{DeliveryStatus, HostedCheck, HostedOtpProvider, HostedSend, OtpDelivery};
use crate::api::handlers::auth::identifier::Channel;

pub(crate) struct ScriptedHosted {
    send: HostedSend,
    check: HostedCheck,
    send_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl ScriptedHosted {
    fn new(send: HostedSend, check: HostedCheck) -> Self {
        Self {
            send,
            check,
            send_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn sending(session_token: &str, sandbox_otp: Option<&str>) -> Self {
        Self::new(
            HostedSend::Sent {
                session_token: session_token.to_string(),
                sandbox_otp: sandbox_otp.map(str::to_string),
            },
            HostedCheck::Approved,
        )
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self::new(
            HostedSend::Failed(reason.to_string()),
            HostedCheck::Unavailable(reason.to_string()),
        )
    }

    pub(crate) fn checking(check: HostedCheck) -> Self {
        Self::new(HostedSend::Failed("send not scripted".to_string()), check)
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostedOtpProvider for ScriptedHosted {
    async fn send(&self, _channel: Channel, _recipient: &str, _sandbox: bool) -> HostedSend {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.send.clone()
    }

    async fn verify(&self, _session_token: &str, _channel: Channel, _code: &str) -> HostedCheck {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.check.clone()
    }
}

pub(crate) struct RecordingDelivery {
    status: DeliveryStatus,
    deliveries: Mutex<Vec<(Channel, String, String)>>,
}

impl RecordingDelivery {
    pub(crate) fn queued() -> Self {
        Self {
            status: DeliveryStatus::Queued,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            status: DeliveryStatus::Failed(reason.to_string()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn deliveries(&self) -> Vec<(Channel, String, String)> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl OtpDelivery for RecordingDelivery {
    async fn deliver(&self, channel: Channel, recipient: &str, code: &str) -> DeliveryStatus {
        self.deliveries
            .lock()
            .await
            .push((channel, recipient.to_string(), code.to_string()));
        self.status.clone()
    }
}
