//! # Pinmate (registration, guest sessions and OTP verification)
//!
//! `pinmate` lets a mobile client register an identity (email or phone) behind a
//! one-time passcode gate, and bootstraps anonymous device-bound guest accounts that
//! can later be upgraded in place into full accounts.
//!
//! ## Signup pipeline
//!
//! - **Identifiers:** emails are trimmed and lowercased; phones are reduced to exactly
//!   10 digits. The normalized value is the key for pending signups and OTP records.
//! - **Policy:** `x-device-id` and `x-app-mode` are validated before anything else.
//!   Client bypass flags (`skip_otp`, `debug`) are honoured only when the server-side
//!   bypass policy allows them for the request's mode.
//! - **Provider chain:** the hosted OTP provider runs for staging (sandbox) or forced
//!   requests and demotes to a locally generated code on any failure. Local codes are
//!   delivered through a database-backed outbox with retries.
//! - **Materialization:** a verified pending signup either upgrades the guest account
//!   bound to the device (same storage row, new external id) or inserts a new account.
//!
//! ## Housekeeping
//!
//! A background sweeper purges expired OTP records and abandoned pending signups.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_app_user_agent() {
        assert!(APP_USER_AGENT.starts_with("pinmate/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
