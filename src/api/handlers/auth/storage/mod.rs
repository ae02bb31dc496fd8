//! Storage boundary for pending signups, OTP records, accounts and the outbox.
//!
//! `PgAuthStore` is the production implementation. Handler tests run against the
//! in-memory store so they can exercise whole flows without a database.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::identifier::{Channel, Identifier};
use super::models::{
    Account, GuestResolution, MaterializeOutcome, OtpIssue, OtpRecord, OutboundMessage,
    PendingSignup, PurgeCutoffs, PurgeReport,
};

#[cfg(test)]
mod memory;
mod postgres;

#[cfg(test)]
pub(crate) use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Cheap connectivity check used by `/health`.
    async fn ping(&self) -> Result<()>;

    /// Which channel, if any, is already held by a materialized account.
    async fn registered_conflict(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<Channel>>;

    /// Discard any pending signup for the identifier and store this one.
    async fn replace_pending_signup(&self, pending: &PendingSignup) -> Result<()>;

    async fn pending_signup(&self, identifier: &str) -> Result<Option<PendingSignup>>;

    /// Delete every record for the identifier and insert a fresh one, atomically
    /// with respect to other issuers for the same identifier.
    async fn issue_otp(&self, issue: OtpIssue<'_>) -> Result<OtpRecord>;

    /// Newest record (by `created_at`, then id) with `verified = false`.
    async fn latest_unverified_otp(&self, identifier: &str) -> Result<Option<OtpRecord>>;

    async fn mark_otp_verified(&self, id: Uuid) -> Result<()>;

    /// Single atomic lookup-or-create keyed by device id.
    async fn get_or_create_guest(&self, device_id: &str) -> Result<GuestResolution>;

    /// Consume the pending signup and create or upgrade the account.
    async fn materialize(
        &self,
        pending: &PendingSignup,
        device_id: &str,
    ) -> Result<MaterializeOutcome>;

    async fn account_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>>;

    async fn enqueue_outbound(&self, message: &OutboundMessage) -> Result<()>;

    async fn purge_expired(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport>;
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
