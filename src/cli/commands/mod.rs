pub mod logging;
pub mod outbox;
pub mod policy;
pub mod provider;
pub mod smtp;
pub mod sweeper;
pub mod tokens;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_CORS_ALLOWED_ORIGIN: &str = "cors-allowed-origin";

pub const CMD_CHECK_SMTP: &str = "check-smtp";
pub const ARG_SEND_TO: &str = "send-to";

fn check_smtp_command() -> Command {
    Command::new(CMD_CHECK_SMTP)
        .about("Connect to the SMTP relay and optionally send a test message")
        .arg(
            Arg::new(ARG_SEND_TO)
                .long(ARG_SEND_TO)
                .help("Recipient for a test message")
                .value_name("EMAIL"),
        )
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("pinmate")
        .about("Registration, guest sessions and OTP verification")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand(check_smtp_command())
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("PINMATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help("Postgres connection string; required when running the server.")
                .env("PINMATE_DSN"),
        )
        .arg(
            Arg::new(ARG_CORS_ALLOWED_ORIGIN)
                .long(ARG_CORS_ALLOWED_ORIGIN)
                .help("Allowed CORS origin (any origin when unset)")
                .env("PINMATE_CORS_ALLOWED_ORIGIN"),
        );

    let command = policy::with_args(command);
    let command = tokens::with_args(command);
    let command = provider::with_args(command);
    let command = smtp::with_args(command);
    let command = outbox::with_args(command);
    let command = sweeper::with_args(command);
    logging::with_args(command)
}
