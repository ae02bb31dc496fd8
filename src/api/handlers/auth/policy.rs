//! Per-request OTP policy.
//!
//! A [`Policy`] is computed once per request from the validated headers, the
//! body override flags and the server-side [`BypassPolicy`]. Nothing downstream
//! reads deployment mode from anywhere else.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use std::{fmt, str::FromStr};
use tracing::warn;

use super::error::AuthError;

pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const APP_MODE_HEADER: &str = "x-app-mode";
pub const DEBUG_HEADER: &str = "x-debug";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppMode {
    Prod,
    Staging,
    Debug,
    Release,
}

impl AppMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Staging => "staging",
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

impl FromStr for AppMode {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" => Ok(Self::Prod),
            "staging" => Ok(Self::Staging),
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            _ => Err(AuthError::InvalidAppMode),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side gate for client-requested OTP bypass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BypassPolicy {
    Never,
    #[default]
    NonRelease,
    Always,
}

impl BypassPolicy {
    pub const VALUES: [&'static str; 3] = ["never", "non-release", "always"];

    fn allows(self, mode: AppMode) -> bool {
        match self {
            Self::Never => false,
            Self::NonRelease => mode != AppMode::Release,
            Self::Always => true,
        }
    }
}

impl FromStr for BypassPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "non-release" => Ok(Self::NonRelease),
            "always" => Ok(Self::Always),
            other => Err(format!("invalid bypass policy: {other}")),
        }
    }
}

/// Validated request headers shared by every signup/verification endpoint.
#[derive(Clone, Debug)]
pub struct RequestContext {
    device_id: String,
    app_mode: AppMode,
    bearer: Option<String>,
    debug_header: bool,
}

impl RequestContext {
    /// Validate the headers of record.
    ///
    /// # Errors
    /// `MissingDeviceId` or `InvalidAppMode` when the headers are absent or malformed,
    /// `InvalidBearer` when `Authorization` is present without the Bearer scheme.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let device_id = headers
            .get(DEVICE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingDeviceId)?
            .to_string();

        let app_mode = headers
            .get(APP_MODE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::InvalidAppMode)?
            .parse::<AppMode>()?;

        let bearer = match headers.get(AUTHORIZATION) {
            None => None,
            Some(value) => {
                let value = value.to_str().map_err(|_| AuthError::InvalidBearer)?;
                let token = value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .ok_or(AuthError::InvalidBearer)?;
                Some(token.to_string())
            }
        };

        let debug_header = headers
            .get(DEBUG_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(truthy);

        Ok(Self {
            device_id,
            app_mode,
            bearer,
            debug_header,
        })
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn app_mode(&self) -> AppMode {
        self.app_mode
    }

    /// Validated bearer token, kept for handlers that resolve the caller's account.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Body-level override flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyFlags {
    pub debug: bool,
    pub skip_otp: bool,
    pub force_alt_provider: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BypassReason {
    SkipOtp,
    Debug,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpRequirement {
    Require,
    Bypass(BypassReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    requirement: OtpRequirement,
    sandbox: bool,
    forced_provider: bool,
    debug_code_accepted: bool,
}

impl Policy {
    /// Resolve the effective policy: `skip_otp` > `debug` (header or body) > require.
    #[must_use]
    pub fn resolve(ctx: &RequestContext, flags: PolicyFlags, bypass: BypassPolicy) -> Self {
        let mode = ctx.app_mode();
        let bypass_allowed = bypass.allows(mode);
        let debug_requested = flags.debug || ctx.debug_header;

        let requirement = if flags.skip_otp && bypass_allowed {
            OtpRequirement::Bypass(BypassReason::SkipOtp)
        } else if debug_requested && bypass_allowed {
            OtpRequirement::Bypass(BypassReason::Debug)
        } else {
            if flags.skip_otp || debug_requested {
                warn!(
                    app_mode = %mode,
                    device_id = %ctx.device_id(),
                    "OTP bypass requested but refused by server policy"
                );
            }
            OtpRequirement::Require
        };

        Self {
            requirement,
            sandbox: mode == AppMode::Staging,
            forced_provider: flags.force_alt_provider,
            debug_code_accepted: bypass_allowed && mode == AppMode::Debug,
        }
    }

    #[must_use]
    pub fn requirement(&self) -> OtpRequirement {
        self.requirement
    }

    #[must_use]
    pub fn bypasses_otp(&self) -> bool {
        matches!(self.requirement, OtpRequirement::Bypass(_))
    }

    #[must_use]
    pub fn sandbox(&self) -> bool {
        self.sandbox
    }

    #[must_use]
    pub fn forced_provider(&self) -> bool {
        self.forced_provider
    }

    #[must_use]
    pub fn debug_code_accepted(&self) -> bool {
        self.debug_code_accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn context(mode: &'static str) -> Result<RequestContext, AuthError> {
        RequestContext::from_headers(&headers(&[
            (DEVICE_ID_HEADER, "device-1"),
            (APP_MODE_HEADER, mode),
        ]))
    }

    #[test]
    fn missing_device_id_is_reported_first() {
        let result = RequestContext::from_headers(&headers(&[(APP_MODE_HEADER, "bogus")]));
        assert!(matches!(result, Err(AuthError::MissingDeviceId)));

        let result = RequestContext::from_headers(&headers(&[
            (DEVICE_ID_HEADER, "   "),
            (APP_MODE_HEADER, "prod"),
        ]));
        assert!(matches!(result, Err(AuthError::MissingDeviceId)));
    }

    #[test]
    fn app_mode_must_be_enumerated() {
        let missing = RequestContext::from_headers(&headers(&[(DEVICE_ID_HEADER, "d")]));
        assert!(matches!(missing, Err(AuthError::InvalidAppMode)));
        assert!(matches!(context("qa"), Err(AuthError::InvalidAppMode)));
        assert!(context("STAGING").is_ok());
    }

    #[test]
    fn bearer_is_parsed_or_rejected() -> Result<(), AuthError> {
        let ctx = RequestContext::from_headers(&headers(&[
            (DEVICE_ID_HEADER, "d"),
            (APP_MODE_HEADER, "prod"),
            ("authorization", "Bearer abc.def"),
        ]))?;
        assert_eq!(ctx.bearer(), Some("abc.def"));

        let result = RequestContext::from_headers(&headers(&[
            (DEVICE_ID_HEADER, "d"),
            (APP_MODE_HEADER, "prod"),
            ("authorization", "Basic Zm9vOmJhcg=="),
        ]));
        assert!(matches!(result, Err(AuthError::InvalidBearer)));
        Ok(())
    }

    #[test]
    fn skip_otp_outranks_debug() -> Result<(), AuthError> {
        let ctx = context("prod")?;
        let flags = PolicyFlags {
            debug: true,
            skip_otp: true,
            force_alt_provider: false,
        };
        let policy = Policy::resolve(&ctx, flags, BypassPolicy::NonRelease);
        assert_eq!(
            policy.requirement(),
            OtpRequirement::Bypass(BypassReason::SkipOtp)
        );
        Ok(())
    }

    #[test]
    fn debug_header_bypasses_like_the_body_flag() -> Result<(), AuthError> {
        let ctx = RequestContext::from_headers(&headers(&[
            (DEVICE_ID_HEADER, "d"),
            (APP_MODE_HEADER, "staging"),
            (DEBUG_HEADER, "true"),
        ]))?;
        let policy = Policy::resolve(&ctx, PolicyFlags::default(), BypassPolicy::NonRelease);
        assert_eq!(
            policy.requirement(),
            OtpRequirement::Bypass(BypassReason::Debug)
        );
        Ok(())
    }

    #[test]
    fn release_mode_refuses_client_bypass_by_default() -> Result<(), AuthError> {
        let ctx = context("release")?;
        let flags = PolicyFlags {
            debug: true,
            skip_otp: true,
            force_alt_provider: false,
        };
        let policy = Policy::resolve(&ctx, flags, BypassPolicy::NonRelease);
        assert_eq!(policy.requirement(), OtpRequirement::Require);
        assert!(!policy.debug_code_accepted());

        let permissive = Policy::resolve(&ctx, flags, BypassPolicy::Always);
        assert!(permissive.bypasses_otp());

        let strict = Policy::resolve(&context("debug")?, flags, BypassPolicy::Never);
        assert_eq!(strict.requirement(), OtpRequirement::Require);
        Ok(())
    }

    #[test]
    fn sandbox_follows_staging() -> Result<(), AuthError> {
        let staging = Policy::resolve(
            &context("staging")?,
            PolicyFlags::default(),
            BypassPolicy::default(),
        );
        assert!(staging.sandbox());
        assert_eq!(staging.requirement(), OtpRequirement::Require);

        let prod = Policy::resolve(
            &context("prod")?,
            PolicyFlags {
                force_alt_provider: true,
                ..PolicyFlags::default()
            },
            BypassPolicy::default(),
        );
        assert!(!prod.sandbox());
        assert!(prod.forced_provider());
        Ok(())
    }

    #[test]
    fn debug_code_only_in_debug_mode() -> Result<(), AuthError> {
        let debug = Policy::resolve(
            &context("debug")?,
            PolicyFlags::default(),
            BypassPolicy::default(),
        );
        assert!(debug.debug_code_accepted());

        let prod = Policy::resolve(
            &context("prod")?,
            PolicyFlags::default(),
            BypassPolicy::default(),
        );
        assert!(!prod.debug_code_accepted());
        Ok(())
    }

    #[test]
    fn bypass_policy_parses() {
        assert_eq!("never".parse(), Ok(BypassPolicy::Never));
        assert_eq!("Non-Release".parse(), Ok(BypassPolicy::NonRelease));
        assert_eq!("always".parse(), Ok(BypassPolicy::Always));
        assert!("sometimes".parse::<BypassPolicy>().is_err());
    }
}
