//! Auth state and configuration.

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use super::address::AddressLookup;
use super::policy::BypassPolicy;
use super::provider::{OtpProviderChain, codes_match};
use super::storage::AuthStore;
use super::tokens::TokenIssuer;

pub(crate) const DEFAULT_OTP_TTL_SECONDS: i64 = 5 * 60;
pub(crate) const DEFAULT_DEBUG_OTP_CODE: &str = "123456";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    otp_ttl_seconds: i64,
    bypass_policy: BypassPolicy,
    debug_otp_code: String,
    debug_endpoints: bool,
    debug_secret: Option<SecretString>,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            bypass_policy: BypassPolicy::default(),
            debug_otp_code: DEFAULT_DEBUG_OTP_CODE.to_string(),
            debug_endpoints: false,
            debug_secret: None,
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bypass_policy(mut self, policy: BypassPolicy) -> Self {
        self.bypass_policy = policy;
        self
    }

    #[must_use]
    pub fn with_debug_otp_code(mut self, code: String) -> Self {
        self.debug_otp_code = code;
        self
    }

    #[must_use]
    pub fn with_debug_endpoints(mut self, enabled: bool) -> Self {
        self.debug_endpoints = enabled;
        self
    }

    #[must_use]
    pub fn with_debug_secret(mut self, secret: Option<SecretString>) -> Self {
        self.debug_secret = secret;
        self
    }

    #[must_use]
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl_seconds)
    }

    #[must_use]
    pub fn bypass_policy(&self) -> BypassPolicy {
        self.bypass_policy
    }

    pub(super) fn debug_otp_code(&self) -> &str {
        &self.debug_otp_code
    }

    /// The debug OTP endpoint is reachable when enabled server-wide or when the
    /// caller presents the configured shared secret.
    pub(super) fn debug_access_allowed(&self, presented_secret: Option<&str>) -> bool {
        if self.debug_endpoints {
            return true;
        }
        match (&self.debug_secret, presented_secret) {
            (Some(secret), Some(presented)) => {
                let expected = secret.expose_secret();
                !expected.is_empty() && codes_match(expected, presented)
            }
            _ => false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    providers: OtpProviderChain,
    tokens: Arc<dyn TokenIssuer>,
    addresses: Arc<dyn AddressLookup>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn AuthStore>,
        providers: OtpProviderChain,
        tokens: Arc<dyn TokenIssuer>,
        addresses: Arc<dyn AddressLookup>,
    ) -> Self {
        Self {
            config,
            store,
            providers,
            tokens,
            addresses,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    pub(super) fn providers(&self) -> &OtpProviderChain {
        &self.providers
    }

    pub(super) fn tokens(&self) -> &dyn TokenIssuer {
        self.tokens.as_ref()
    }

    pub(super) fn addresses(&self) -> &dyn AddressLookup {
        self.addresses.as_ref()
    }
}
