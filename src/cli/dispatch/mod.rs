//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`]: the API server with its full
//! configuration, or the SMTP connectivity check.

use crate::api::{ServerConfig, handlers::auth::AuthConfig};
use crate::cli::actions::{Action, check_smtp, server::Args};
use crate::cli::commands::{
    ARG_CORS_ALLOWED_ORIGIN, ARG_DSN, ARG_PORT, ARG_SEND_TO, CMD_CHECK_SMTP, outbox, policy,
    provider, smtp, sweeper, tokens,
};
use anyhow::{Context, Result};
use clap::ArgMatches;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    if let Some((CMD_CHECK_SMTP, sub)) = matches.subcommand() {
        return check_smtp_handler(sub);
    }

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .context("missing required argument: --dsn")?;
    let cors_allowed_origin = matches
        .get_one::<String>(ARG_CORS_ALLOWED_ORIGIN)
        .filter(|value| !value.trim().is_empty())
        .cloned();

    let policy_opts = policy::Options::parse(matches)?;
    let token_opts = tokens::Options::parse(matches)?;
    let provider_opts = provider::Options::parse(matches)?;

    let auth = AuthConfig::new()
        .with_otp_ttl_seconds(policy_opts.otp_ttl_seconds)
        .with_bypass_policy(policy_opts.bypass_policy)
        .with_debug_otp_code(policy_opts.debug_otp_code)
        .with_debug_endpoints(policy_opts.debug_endpoints)
        .with_debug_secret(policy_opts.debug_secret);

    Ok(Action::Server(Args {
        config: ServerConfig {
            port,
            dsn,
            cors_allowed_origin,
            auth,
            smtp: smtp::parse(matches),
            outbox: outbox::parse(matches),
            sweep: sweeper::parse(matches),
        },
        tokens: token_opts,
        provider: provider_opts.config(),
    }))
}

fn check_smtp_handler(matches: &ArgMatches) -> Result<Action> {
    let smtp = smtp::parse(matches).with_context(|| {
        format!(
            "missing required argument: --{} for {CMD_CHECK_SMTP}",
            smtp::ARG_SMTP_HOST
        )
    })?;

    Ok(Action::CheckSmtp(check_smtp::Args {
        smtp,
        send_to: matches
            .get_one::<String>(ARG_SEND_TO)
            .filter(|value| !value.trim().is_empty())
            .cloned(),
    }))
}
