use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::api::outbox::{DEFAULT_SMTP_FROM, SmtpConfig};

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_SMTP_FROM: &str = "smtp-from";

/// Build the SMTP relay configuration, or `None` when no host is set.
#[must_use]
pub fn parse(matches: &ArgMatches) -> Option<SmtpConfig> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    let host = get_non_empty(ARG_SMTP_HOST)?;
    let mut config = SmtpConfig::new(host).with_credentials(
        get_non_empty(ARG_SMTP_USERNAME),
        get_non_empty(ARG_SMTP_PASSWORD).map(SecretString::from),
    );
    if let Some(port) = matches.get_one::<u16>(ARG_SMTP_PORT).copied() {
        config = config.with_port(port);
    }
    if let Some(from) = get_non_empty(ARG_SMTP_FROM) {
        config = config.with_from(from);
    }
    Some(config)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host (STARTTLS); emails are only logged when unset")
                .env("PINMATE_SMTP_HOST")
                .global(true),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port")
                .env("PINMATE_SMTP_PORT")
                .default_value("587")
                .global(true)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP login username")
                .env("PINMATE_SMTP_USERNAME")
                .global(true),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP login password")
                .env("PINMATE_SMTP_PASSWORD")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_SMTP_FROM)
                .long(ARG_SMTP_FROM)
                .help("Sender mailbox for outgoing email")
                .env("PINMATE_SMTP_FROM")
                .default_value(DEFAULT_SMTP_FROM)
                .global(true),
        )
}
