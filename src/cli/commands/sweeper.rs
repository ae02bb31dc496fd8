use clap::{Arg, ArgMatches, Command};

use crate::api::sweeper::SweepConfig;

pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_OTP_RETENTION_SECONDS: &str = "otp-retention-seconds";
pub const ARG_PENDING_SIGNUP_TTL_SECONDS: &str = "pending-signup-ttl-seconds";

#[must_use]
pub fn parse(matches: &ArgMatches) -> SweepConfig {
    let mut config = SweepConfig::new();
    if let Some(seconds) = matches.get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS).copied() {
        config = config.with_interval_seconds(seconds);
    }
    if let Some(seconds) = matches.get_one::<u64>(ARG_OTP_RETENTION_SECONDS).copied() {
        config = config.with_otp_retention_seconds(seconds);
    }
    if let Some(seconds) = matches
        .get_one::<u64>(ARG_PENDING_SIGNUP_TTL_SECONDS)
        .copied()
    {
        config = config.with_pending_signup_ttl_seconds(seconds);
    }
    config
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("How often expired OTPs and stale pending signups are purged")
                .env("PINMATE_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_RETENTION_SECONDS)
                .long(ARG_OTP_RETENTION_SECONDS)
                .help("How long expired OTP records are kept")
                .env("PINMATE_OTP_RETENTION_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PENDING_SIGNUP_TTL_SECONDS)
                .long(ARG_PENDING_SIGNUP_TTL_SECONDS)
                .help("Age after which unverified signups are discarded")
                .env("PINMATE_PENDING_SIGNUP_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
}
