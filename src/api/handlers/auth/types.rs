//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::models::Account;
use super::policy::PolicyFlags;
use super::provider::OtpProvider;
use super::tokens::TokenPair;

/// Registration payload. Either `email` or `phone` is required.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct SignupRequest {
    #[serde(default, alias = "email_id")]
    pub email: Option<String>,
    #[serde(default, alias = "phone_number")]
    pub phone: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude")]
    pub long: Option<f64>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub pincode: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub skip_otp: bool,
    #[serde(default)]
    pub force_alt_provider: bool,
}

impl SignupRequest {
    pub(super) fn flags(&self) -> PolicyFlags {
        PolicyFlags {
            debug: self.debug,
            skip_otp: self.skip_otp,
            force_alt_provider: self.force_alt_provider,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct VerifyOtpRequest {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub entered_otp: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub skip_otp: bool,
}

impl VerifyOtpRequest {
    pub(super) fn flags(&self) -> PolicyFlags {
        PolicyFlags {
            debug: self.debug,
            skip_otp: self.skip_otp,
            force_alt_provider: false,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ResendOtpRequest {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub force_alt_provider: bool,
}

impl ResendOtpRequest {
    pub(super) fn flags(&self) -> PolicyFlags {
        PolicyFlags {
            debug: self.debug,
            skip_otp: false,
            force_alt_provider: self.force_alt_provider,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DebugOtpRequest {
    pub identifier: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

/// Public view of an account.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct UserSummary {
    pub user_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_guest: bool,
    pub pincode: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub interests: Vec<String>,
}

impl From<&Account> for UserSummary {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.clone(),
            email: account.email.clone(),
            phone: account.phone.clone(),
            is_guest: account.is_guest,
            pincode: account.address.pincode.clone(),
            city: account.address.city.clone(),
            state: account.address.state.clone(),
            country: account.address.country.clone(),
            interests: account.interests.clone(),
        }
    }
}

/// Returned when an OTP was issued (or, on resend, bypassed).
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpChallengeResponse {
    pub show_otp: bool,
    pub message: String,
    pub identifier: String,
    /// Present only for sandbox, forced-provider or failed-delivery dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<OtpProvider>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegistrationResponse {
    pub message: String,
    pub user: UserSummary,
    pub tokens: TokenPair,
    /// True when an existing guest account was upgraded in place.
    pub upgraded: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user: UserSummary,
    pub tokens: TokenPair,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GuestResponse {
    pub user: UserSummary,
    pub tokens: TokenPair,
    pub created: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DebugOtpResponse {
    pub identifier: String,
    pub otp: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub via_hosted_provider: bool,
}
