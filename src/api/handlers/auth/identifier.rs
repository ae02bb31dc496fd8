//! Identifier normalization and the shared input validators.
//!
//! Every read and write path keys pending signups and OTP records by the normalized
//! identifier, so all entry points go through [`normalize_identifier`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::error::AuthError;

pub(crate) const PHONE_DIGITS: usize = 10;
pub(crate) const PASSWORD_MIN_CHARS: usize = 6;
pub(crate) const PASSWORD_MAX_CHARS: usize = 128;
const PINCODE_DIGITS: usize = 6;

/// Delivery channel implied by an identifier.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    /// `@` marks an email, anything else is treated as a phone number.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        if raw.contains('@') {
            Self::Email
        } else {
            Self::Sms
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized identifier together with its channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identifier {
    value: String,
    channel: Channel,
}

impl Identifier {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub(crate) fn email(email: String) -> Self {
        Self {
            value: email,
            channel: Channel::Email,
        }
    }

    pub(crate) fn phone(phone: String) -> Self {
        Self {
            value: phone,
            channel: Channel::Sms,
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Keep only ASCII digits; the result must be exactly 10 digits long.
pub(crate) fn normalize_phone(phone: &str) -> Result<String, AuthError> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == PHONE_DIGITS {
        Ok(digits)
    } else {
        Err(AuthError::InvalidPhoneFormat)
    }
}

/// Normalize a raw identifier and reject malformed emails.
///
/// # Errors
/// Returns a validation error for blank input or a malformed email and
/// `InvalidPhoneFormat` for phones that do not reduce to 10 digits.
pub fn normalize_identifier(raw: &str) -> Result<Identifier, AuthError> {
    if raw.trim().is_empty() {
        return Err(AuthError::validation("identifier is required"));
    }

    match Channel::classify(raw) {
        Channel::Email => {
            let email = normalize_email(raw);
            if !valid_email(&email) {
                return Err(AuthError::validation("Invalid email format"));
            }
            Ok(Identifier::email(email))
        }
        Channel::Sms => normalize_phone(raw).map(Identifier::phone),
    }
}

pub(crate) fn validate_password(password: &str) -> Result<(), AuthError> {
    let chars = password.chars().count();
    if chars < PASSWORD_MIN_CHARS {
        return Err(AuthError::validation(format!(
            "Password must be at least {PASSWORD_MIN_CHARS} characters"
        )));
    }
    if chars > PASSWORD_MAX_CHARS {
        return Err(AuthError::validation(format!(
            "Password must be at most {PASSWORD_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AuthError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(AuthError::validation("lat must be between -90 and 90"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(AuthError::validation("long must be between -180 and 180"));
    }
    Ok(())
}

pub(crate) fn validate_pincode(pincode: &str) -> Result<(), AuthError> {
    if pincode.len() == PINCODE_DIGITS && pincode.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AuthError::validation("pincode must be 6 digits"))
    }
}
