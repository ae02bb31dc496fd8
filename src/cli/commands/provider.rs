use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

use crate::api::handlers::auth::provider::hosted::{
    DEFAULT_COUNTRY_CODE, DEFAULT_PROVIDER_URL, HostedProviderConfig,
};

pub const ARG_OTP_PROVIDER_URL: &str = "otp-provider-url";
pub const ARG_OTP_PROVIDER_API_KEY: &str = "otp-provider-api-key";
pub const ARG_OTP_PROVIDER_TIMEOUT_SECONDS: &str = "otp-provider-timeout-seconds";
pub const ARG_OTP_PROVIDER_COUNTRY_CODE: &str = "otp-provider-country-code";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub api_key: Option<SecretString>,
    pub timeout_seconds: u64,
    pub country_code: String,
}

impl Options {
    /// Parse hosted OTP provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the provider URL is blank.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_OTP_PROVIDER_URL)
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());
        if url.is_empty() {
            anyhow::bail!("--{ARG_OTP_PROVIDER_URL} must not be empty");
        }

        Ok(Self {
            url,
            api_key: matches
                .get_one::<String>(ARG_OTP_PROVIDER_API_KEY)
                .filter(|value| !value.trim().is_empty())
                .map(|value| SecretString::from(value.clone())),
            timeout_seconds: matches
                .get_one::<u64>(ARG_OTP_PROVIDER_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
            country_code: matches
                .get_one::<String>(ARG_OTP_PROVIDER_COUNTRY_CODE)
                .cloned()
                .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string()),
        })
    }

    #[must_use]
    pub fn config(&self) -> HostedProviderConfig {
        HostedProviderConfig::new()
            .with_base_url(self.url.clone())
            .with_api_key(self.api_key.clone())
            .with_timeout(Duration::from_secs(self.timeout_seconds))
            .with_country_code(self.country_code.clone())
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_PROVIDER_URL)
                .long(ARG_OTP_PROVIDER_URL)
                .help("Hosted OTP provider base URL")
                .env("PINMATE_OTP_PROVIDER_URL")
                .default_value(DEFAULT_PROVIDER_URL),
        )
        .arg(
            Arg::new(ARG_OTP_PROVIDER_API_KEY)
                .long(ARG_OTP_PROVIDER_API_KEY)
                .help("Hosted OTP provider API key")
                .long_help(
                    "Hosted OTP provider API key, sent as X-API-Key.\n\nWithout it every hosted send fails and OTPs are generated locally.",
                )
                .env("PINMATE_OTP_PROVIDER_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_OTP_PROVIDER_TIMEOUT_SECONDS)
                .long(ARG_OTP_PROVIDER_TIMEOUT_SECONDS)
                .help("Hosted OTP provider request timeout in seconds")
                .env("PINMATE_OTP_PROVIDER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_PROVIDER_COUNTRY_CODE)
                .long(ARG_OTP_PROVIDER_COUNTRY_CODE)
                .help("Country code prefixed to SMS recipients")
                .env("PINMATE_OTP_PROVIDER_COUNTRY_CODE")
                .default_value(DEFAULT_COUNTRY_CODE),
        )
}
