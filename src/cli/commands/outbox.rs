use clap::{Arg, ArgMatches, Command};

use crate::api::outbox::OutboxWorkerConfig;

pub const ARG_OUTBOX_POLL_SECONDS: &str = "outbox-poll-seconds";
pub const ARG_OUTBOX_BATCH_SIZE: &str = "outbox-batch-size";
pub const ARG_OUTBOX_MAX_ATTEMPTS: &str = "outbox-max-attempts";
pub const ARG_OUTBOX_BACKOFF_BASE_SECONDS: &str = "outbox-backoff-base-seconds";
pub const ARG_OUTBOX_BACKOFF_MAX_SECONDS: &str = "outbox-backoff-max-seconds";

#[must_use]
pub fn parse(matches: &ArgMatches) -> OutboxWorkerConfig {
    let mut config = OutboxWorkerConfig::new();
    if let Some(seconds) = matches.get_one::<u64>(ARG_OUTBOX_POLL_SECONDS).copied() {
        config = config.with_poll_interval_seconds(seconds);
    }
    if let Some(size) = matches.get_one::<usize>(ARG_OUTBOX_BATCH_SIZE).copied() {
        config = config.with_batch_size(size);
    }
    if let Some(attempts) = matches.get_one::<u32>(ARG_OUTBOX_MAX_ATTEMPTS).copied() {
        config = config.with_max_attempts(attempts);
    }
    if let Some(seconds) = matches
        .get_one::<u64>(ARG_OUTBOX_BACKOFF_BASE_SECONDS)
        .copied()
    {
        config = config.with_backoff_base_seconds(seconds);
    }
    if let Some(seconds) = matches
        .get_one::<u64>(ARG_OUTBOX_BACKOFF_MAX_SECONDS)
        .copied()
    {
        config = config.with_backoff_max_seconds(seconds);
    }
    config
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OUTBOX_POLL_SECONDS)
                .long(ARG_OUTBOX_POLL_SECONDS)
                .help("Message outbox poll interval in seconds")
                .env("PINMATE_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BATCH_SIZE)
                .long(ARG_OUTBOX_BATCH_SIZE)
                .help("Message outbox batch size per poll")
                .env("PINMATE_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_OUTBOX_MAX_ATTEMPTS)
                .help("Max attempts before marking a message as failed")
                .env("PINMATE_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BACKOFF_BASE_SECONDS)
                .long(ARG_OUTBOX_BACKOFF_BASE_SECONDS)
                .help("Base delay for outbox retry backoff")
                .env("PINMATE_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BACKOFF_MAX_SECONDS)
                .long(ARG_OUTBOX_BACKOFF_MAX_SECONDS)
                .help("Max delay for outbox retry backoff")
                .env("PINMATE_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
