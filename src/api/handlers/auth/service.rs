//! Signup, verification and login orchestration.
//!
//! Handlers validate headers into a [`RequestContext`] and hand the decoded body to
//! these functions; everything here is independent of HTTP.

use anyhow::anyhow;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use tracing::{debug, info};

use super::error::AuthError;
use super::identifier::{
    Channel, Identifier, normalize_email, normalize_identifier, normalize_phone, valid_email,
    validate_coordinates, validate_password, validate_pincode,
};
use super::models::{Account, Address, GuestResolution, MaterializeOutcome, OtpIssue, PendingSignup};
use super::policy::{OtpRequirement, Policy, RequestContext};
use super::provider::{CodeCheck, DispatchRequest, codes_match};
use super::state::AuthState;
use super::tokens::TokenPair;
use super::types::{
    DebugOtpResponse, LoginRequest, OtpChallengeResponse, ResendOtpRequest, SignupRequest,
    VerifyOtpRequest,
};

/// A materialized account together with its fresh tokens.
#[derive(Debug)]
pub(super) struct Registration {
    pub account: Account,
    pub tokens: TokenPair,
    pub upgraded: bool,
}

#[derive(Debug)]
pub(super) enum SignupOutcome {
    Registered(Registration),
    Challenge(OtpChallengeResponse),
}

pub(super) async fn signup(
    state: &AuthState,
    ctx: &RequestContext,
    request: SignupRequest,
) -> Result<SignupOutcome, AuthError> {
    let password = request.password.as_deref().unwrap_or_default();
    validate_password(password)?;

    let (Some(latitude), Some(longitude)) = (request.lat, request.long) else {
        return Err(AuthError::validation("lat and long are required"));
    };
    validate_coordinates(latitude, longitude)?;

    let raw_email = non_blank(request.email.as_deref());
    let raw_phone = non_blank(request.phone.as_deref());
    if raw_email.is_none() && raw_phone.is_none() {
        return Err(AuthError::validation("email or phone is required"));
    }

    let email = raw_email
        .map(|raw| {
            let email = normalize_email(raw);
            if valid_email(&email) {
                Ok(email)
            } else {
                Err(AuthError::validation("Invalid email format"))
            }
        })
        .transpose()?;
    let phone = raw_phone.map(normalize_phone).transpose()?;

    let pincode = non_blank(request.pincode.as_deref()).map(str::to_string);
    if let Some(pincode) = pincode.as_deref() {
        validate_pincode(pincode)?;
    }

    // Email is the identifier of record when both are supplied.
    let identifier = email
        .clone()
        .map(Identifier::email)
        .or_else(|| phone.clone().map(Identifier::phone))
        .ok_or_else(|| AuthError::validation("email or phone is required"))?;

    match state
        .store()
        .registered_conflict(email.as_deref(), phone.as_deref())
        .await?
    {
        Some(Channel::Email) => return Err(AuthError::conflict("Email already registered")),
        Some(Channel::Sms) => {
            return Err(AuthError::conflict("Phone number already registered"));
        }
        None => {}
    }

    if signup_pending(state, &identifier).await? {
        return Err(AuthError::conflict("Signup already pending verification"));
    }

    let password_hash = hash_password(password)?;

    let mut address = Address {
        pincode,
        city: non_blank(request.city.as_deref()).map(str::to_string),
        state: non_blank(request.state.as_deref()).map(str::to_string),
        country: non_blank(request.country.as_deref()).map(str::to_string),
    };
    if !address.is_complete() {
        address.merge_missing(state.addresses().lookup(latitude, longitude).await);
    }

    let pending = PendingSignup {
        identifier: identifier.as_str().to_string(),
        email,
        phone,
        password_hash,
        latitude,
        longitude,
        interests: clean_interests(&request.interests),
        address,
        device_id: Some(ctx.device_id().to_string()),
        created_at: Utc::now(),
    };
    state.store().replace_pending_signup(&pending).await?;

    let policy = Policy::resolve(ctx, request.flags(), state.config().bypass_policy());
    if let OtpRequirement::Bypass(reason) = policy.requirement() {
        info!(
            identifier = %identifier.as_str(),
            app_mode = %ctx.app_mode(),
            ?reason,
            "OTP bypassed, materializing account"
        );
        let registration = complete_registration(state, &pending, ctx.device_id()).await?;
        return Ok(SignupOutcome::Registered(registration));
    }

    let challenge = issue_challenge(state, &identifier, &policy, false).await?;
    Ok(SignupOutcome::Challenge(challenge))
}

pub(super) async fn verify_otp(
    state: &AuthState,
    ctx: &RequestContext,
    request: VerifyOtpRequest,
) -> Result<Registration, AuthError> {
    let identifier = normalize_identifier(request.identifier.as_deref().unwrap_or_default())?;
    let policy = Policy::resolve(ctx, request.flags(), state.config().bypass_policy());

    let pending = state
        .store()
        .pending_signup(identifier.as_str())
        .await?
        .ok_or(AuthError::SignupDataMissing)?;

    if policy.bypasses_otp() {
        info!(identifier = %identifier.as_str(), "OTP verification bypassed");
    } else {
        let entered = non_blank(request.entered_otp.as_deref())
            .ok_or_else(|| AuthError::validation("entered_otp is required"))?;

        let record = state
            .store()
            .latest_unverified_otp(identifier.as_str())
            .await?
            .ok_or(AuthError::NoOtpFound)?;

        if record.is_expired() {
            return Err(AuthError::OtpExpired);
        }

        let debug_code =
            policy.debug_code_accepted() && codes_match(state.config().debug_otp_code(), entered);
        if debug_code {
            info!(identifier = %identifier.as_str(), "debug OTP code accepted");
        } else if state
            .providers()
            .verify(&record, identifier.channel(), entered)
            .await
            == CodeCheck::Mismatch
        {
            return Err(AuthError::InvalidOtp);
        }

        state.store().mark_otp_verified(record.id).await?;
    }

    complete_registration(state, &pending, ctx.device_id()).await
}

pub(super) async fn resend_otp(
    state: &AuthState,
    ctx: &RequestContext,
    request: ResendOtpRequest,
) -> Result<OtpChallengeResponse, AuthError> {
    let identifier = normalize_identifier(request.identifier.as_deref().unwrap_or_default())?;
    let policy = Policy::resolve(ctx, request.flags(), state.config().bypass_policy());

    if policy.bypasses_otp() {
        return Ok(OtpChallengeResponse {
            show_otp: false,
            message: "OTP bypassed".to_string(),
            identifier: identifier.as_str().to_string(),
            otp: None,
            note: None,
            provider: None,
        });
    }

    issue_challenge(state, &identifier, &policy, true).await
}

pub(super) async fn debug_latest_otp(
    state: &AuthState,
    raw_identifier: &str,
) -> Result<DebugOtpResponse, AuthError> {
    let identifier = normalize_identifier(raw_identifier)?;
    let record = state
        .store()
        .latest_unverified_otp(identifier.as_str())
        .await?
        .ok_or(AuthError::NoOtpFound)?;

    Ok(DebugOtpResponse {
        identifier: record.identifier.clone(),
        expired: record.is_expired(),
        via_hosted_provider: record.session_token.is_some(),
        expires_at: record.expires_at,
        otp: record.code,
    })
}

pub(crate) async fn bootstrap_guest(
    state: &AuthState,
    ctx: &RequestContext,
) -> Result<(GuestResolution, TokenPair), AuthError> {
    let resolution = state.store().get_or_create_guest(ctx.device_id()).await?;
    let tokens = state.tokens().issue(&resolution.account)?;
    if resolution.created {
        info!(user_id = %resolution.account.user_id, "guest account created");
    }
    Ok((resolution, tokens))
}

pub(super) async fn login(
    state: &AuthState,
    request: LoginRequest,
) -> Result<(Account, TokenPair), AuthError> {
    let identifier = normalize_identifier(&request.identifier)?;
    let account = state.store().account_by_identifier(&identifier).await?;

    let Some((account, hash)) = account.and_then(|account| {
        let hash = account.password_hash.clone()?;
        Some((account, hash))
    }) else {
        // Spend comparable work on unknown identifiers.
        let _ = hash_password(&request.password);
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(&hash, &request.password) {
        debug!(user_id = %account.user_id, "password mismatch");
        return Err(AuthError::InvalidCredentials);
    }

    let tokens = state.tokens().issue(&account)?;
    Ok((account, tokens))
}

async fn complete_registration(
    state: &AuthState,
    pending: &PendingSignup,
    device_id: &str,
) -> Result<Registration, AuthError> {
    let (account, upgraded) = match state.store().materialize(pending, device_id).await? {
        MaterializeOutcome::Created(account) => (account, false),
        MaterializeOutcome::Upgraded(account) => (account, true),
        MaterializeOutcome::SignupMissing => return Err(AuthError::SignupDataMissing),
        MaterializeOutcome::Conflict => {
            return Err(AuthError::conflict(
                "Email or phone number already registered",
            ));
        }
    };

    let tokens = state.tokens().issue(&account)?;
    info!(user_id = %account.user_id, upgraded, "account materialized");

    Ok(Registration {
        account,
        tokens,
        upgraded,
    })
}

async fn issue_challenge(
    state: &AuthState,
    identifier: &Identifier,
    policy: &Policy,
    resend: bool,
) -> Result<OtpChallengeResponse, AuthError> {
    let dispatch = state
        .providers()
        .dispatch(DispatchRequest {
            identifier,
            sandbox: policy.sandbox(),
            forced: policy.forced_provider(),
        })
        .await;

    state
        .store()
        .issue_otp(OtpIssue {
            identifier: identifier.as_str(),
            code: dispatch.otp_for_storage.as_deref(),
            session_token: dispatch.session_token.as_deref(),
            ttl: state.config().otp_ttl(),
        })
        .await?;

    let destination = match identifier.channel() {
        Channel::Email => "email",
        Channel::Sms => "phone",
    };
    let verb = if resend { "resent" } else { "sent" };

    Ok(OtpChallengeResponse {
        show_otp: dispatch.show_otp,
        message: format!("OTP {verb} to your {destination}"),
        identifier: identifier.as_str().to_string(),
        otp: dispatch.visible_otp,
        note: dispatch.note,
        provider: Some(dispatch.provider),
    })
}

/// A signup is pending while its latest unverified OTP is still live.
async fn signup_pending(state: &AuthState, identifier: &Identifier) -> Result<bool, AuthError> {
    if state
        .store()
        .pending_signup(identifier.as_str())
        .await?
        .is_none()
    {
        return Ok(false);
    }

    let live = state
        .store()
        .latest_unverified_otp(identifier.as_str())
        .await?
        .is_some_and(|record| !record.is_expired());
    Ok(live)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn clean_interests(interests: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(interests.len());
    for interest in interests {
        let interest = interest.trim();
        if !interest.is_empty() && !cleaned.iter().any(|seen| seen == interest) {
            cleaned.push(interest.to_string());
        }
    }
    cleaned
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Internal(anyhow!("failed to hash password: {err}")))
}

fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn password_hash_round_trip() -> Result<()> {
        let hash = hash_password("hunter22")?;
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter22"));
        assert!(!verify_password(&hash, "hunter23"));
        assert!(!verify_password("not-a-hash", "hunter22"));
        Ok(())
    }

    #[test]
    fn interests_are_trimmed_and_deduplicated() {
        let interests = vec![
            " music ".to_string(),
            "music".to_string(),
            String::new(),
            "hiking".to_string(),
        ];
        assert_eq!(clean_interests(&interests), vec!["music", "hiking"]);
    }

    #[test]
    fn blank_values_are_treated_as_absent() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" a ")), Some("a"));
        assert_eq!(non_blank(None), None);
    }
}
