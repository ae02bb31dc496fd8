//! Persistent records owned by the auth pipeline.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::identifier::Channel;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Address {
    pub pincode: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Address {
    pub(crate) fn is_complete(&self) -> bool {
        self.pincode.is_some() && self.city.is_some() && self.state.is_some() && self.country.is_some()
    }

    /// Fill the fields that are still empty from `other`.
    pub(crate) fn merge_missing(&mut self, other: Address) {
        self.pincode = self.pincode.take().or(other.pincode);
        self.city = self.city.take().or(other.city);
        self.state = self.state.take().or(other.state);
        self.country = self.country.take().or(other.country);
    }
}

/// Unverified registration payload, one per normalized identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingSignup {
    pub identifier: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub latitude: f64,
    pub longitude: f64,
    pub interests: Vec<String>,
    pub address: Address,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpRecord {
    pub id: Uuid,
    pub identifier: String,
    pub code: Option<String>,
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
}

impl OtpRecord {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Parameters for issuing a fresh OTP record.
#[derive(Clone, Copy, Debug)]
pub struct OtpIssue<'a> {
    pub identifier: &'a str,
    pub code: Option<&'a str>,
    pub session_token: Option<&'a str>,
    pub ttl: Duration,
}

/// A materialized identity. `id` never changes; `user_id` is the external id and
/// changes when a guest is upgraded.
#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub user_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub is_guest: bool,
    pub device_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Address,
    pub interests: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct GuestResolution {
    pub account: Account,
    pub created: bool,
}

#[derive(Debug)]
pub enum MaterializeOutcome {
    Created(Account),
    Upgraded(Account),
    /// The pending signup was already consumed (or swept) before this call.
    SignupMissing,
    Conflict,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub recipient: String,
    pub template: String,
    pub payload_json: Value,
}

#[derive(Clone, Copy, Debug)]
pub struct PurgeCutoffs {
    pub otp_expired_before: DateTime<Utc>,
    pub pending_created_before: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub otp_records: u64,
    pub pending_signups: u64,
}

const GUEST_ID_PREFIX: &str = "guest_";

pub(crate) fn guest_user_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{GUEST_ID_PREFIX}{}", &hex[..8])
}

/// External id for a new account: email local-part, else phone digits.
pub(crate) fn base_user_id(pending: &PendingSignup) -> String {
    let from_email = pending.email.as_deref().and_then(|email| {
        let local = email.split('@').next()?;
        let cleaned: String = local
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
            .collect();
        (!cleaned.is_empty()).then_some(cleaned)
    });

    from_email
        .or_else(|| pending.phone.clone())
        .unwrap_or_else(|| pending.identifier.clone())
}

/// Collision fallback: append the first 8 hex chars of the surrogate key.
pub(crate) fn suffixed_user_id(base: &str, id: Uuid) -> String {
    let hex = id.simple().to_string();
    format!("{base}_{}", &hex[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(email: Option<&str>, phone: Option<&str>) -> PendingSignup {
        PendingSignup {
            identifier: email.or(phone).unwrap_or_default().to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            password_hash: "hash".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            interests: Vec::new(),
            address: Address::default(),
            device_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn user_id_prefers_email_local_part() {
        assert_eq!(
            base_user_id(&pending(Some("alice.w+promo@example.com"), Some("9876543210"))),
            "alice.wpromo"
        );
        assert_eq!(base_user_id(&pending(None, Some("9876543210"))), "9876543210");
    }

    #[test]
    fn suffixed_user_id_uses_surrogate_prefix() {
        let id = Uuid::nil();
        assert_eq!(suffixed_user_id("alice", id), "alice_00000000");
    }

    #[test]
    fn guest_ids_have_prefix_and_eight_hex_chars() {
        let id = guest_user_id();
        let suffix = id.strip_prefix(GUEST_ID_PREFIX);
        assert!(suffix.is_some_and(|s| s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let now = Utc::now();
        let record = OtpRecord {
            id: Uuid::now_v7(),
            identifier: "alice@example.com".to_string(),
            code: Some("123456".to_string()),
            session_token: None,
            created_at: now,
            expires_at: now,
            verified: false,
        };
        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(now + Duration::milliseconds(1)));
    }

    #[test]
    fn merge_missing_keeps_client_values() {
        let mut address = Address {
            pincode: Some("110001".to_string()),
            ..Address::default()
        };
        address.merge_missing(Address {
            pincode: Some("999999".to_string()),
            city: Some("New Delhi".to_string()),
            state: None,
            country: Some("India".to_string()),
        });
        assert_eq!(address.pincode.as_deref(), Some("110001"));
        assert_eq!(address.city.as_deref(), Some("New Delhi"));
        assert!(!address.is_complete());
    }
}
