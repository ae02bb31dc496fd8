//! OTP policy and debug access options.

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, builder::PossibleValuesParser};
use secrecy::SecretString;

use crate::api::handlers::auth::policy::BypassPolicy;

pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_BYPASS_POLICY: &str = "otp-bypass-policy";
pub const ARG_DEBUG_OTP_CODE: &str = "debug-otp-code";
pub const ARG_DEBUG_ENDPOINTS: &str = "debug-endpoints";
pub const ARG_DEBUG_SECRET: &str = "debug-secret";

#[derive(Debug, Clone)]
pub struct Options {
    pub otp_ttl_seconds: i64,
    pub bypass_policy: BypassPolicy,
    pub debug_otp_code: String,
    pub debug_endpoints: bool,
    pub debug_secret: Option<SecretString>,
}

impl Options {
    /// Parse OTP policy arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the bypass policy is not one of the known values.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let bypass_policy = matches
            .get_one::<String>(ARG_OTP_BYPASS_POLICY)
            .map(|value| value.parse::<BypassPolicy>())
            .transpose()
            .map_err(|err| anyhow::anyhow!(err))?
            .unwrap_or_default();

        Ok(Self {
            otp_ttl_seconds: matches
                .get_one::<i64>(ARG_OTP_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
            bypass_policy,
            debug_otp_code: matches
                .get_one::<String>(ARG_DEBUG_OTP_CODE)
                .cloned()
                .unwrap_or_else(|| "123456".to_string()),
            debug_endpoints: matches.get_flag(ARG_DEBUG_ENDPOINTS),
            debug_secret: matches
                .get_one::<String>(ARG_DEBUG_SECRET)
                .filter(|value| !value.trim().is_empty())
                .map(|value| SecretString::from(value.clone())),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("OTP lifetime in seconds")
                .env("PINMATE_OTP_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_BYPASS_POLICY)
                .long(ARG_OTP_BYPASS_POLICY)
                .help("Which app modes may skip the OTP step on client request")
                .long_help(
                    "Server-side gate for the `skip_otp`/`debug` request flags.\n\nnever: always require an OTP\nnon-release: honour the flags except when x-app-mode is release\nalways: honour the flags in every mode",
                )
                .env("PINMATE_OTP_BYPASS_POLICY")
                .default_value("non-release")
                .value_parser(PossibleValuesParser::new(BypassPolicy::VALUES)),
        )
        .arg(
            Arg::new(ARG_DEBUG_OTP_CODE)
                .long(ARG_DEBUG_OTP_CODE)
                .help("Fixed code accepted in debug mode")
                .env("PINMATE_DEBUG_OTP_CODE")
                .default_value("123456"),
        )
        .arg(
            Arg::new(ARG_DEBUG_ENDPOINTS)
                .long(ARG_DEBUG_ENDPOINTS)
                .help("Expose /auth/debug-get-otp without a secret")
                .env("PINMATE_DEBUG_ENDPOINTS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_DEBUG_SECRET)
                .long(ARG_DEBUG_SECRET)
                .help("Shared secret that unlocks /auth/debug-get-otp via x-debug-secret")
                .env("PINMATE_DEBUG_SECRET")
                .hide_env_values(true),
        )
}
