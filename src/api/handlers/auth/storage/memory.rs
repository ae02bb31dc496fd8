//! In-memory [`AuthStore`] used by handler and orchestrator tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::AuthStore;
use crate::api::handlers::auth::identifier::{Channel, Identifier};
use crate::api::handlers::auth::models::{
    Account, Address, GuestResolution, MaterializeOutcome, OtpIssue, OtpRecord, OutboundMessage,
    PendingSignup, PurgeCutoffs, PurgeReport, base_user_id, guest_user_id, suffixed_user_id,
};

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    pending: Vec<PendingSignup>,
    otps: Vec<OtpRecord>,
    outbox: Vec<OutboundMessage>,
}

#[derive(Default)]
pub(crate) struct MemoryAuthStore {
    tables: Mutex<Tables>,
    fail_outbox: AtomicBool,
    fail_ping: AtomicBool,
}

impl MemoryAuthStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `enqueue_outbound` fail.
    pub(crate) fn fail_outbox(&self) {
        self.fail_outbox.store(true, Ordering::SeqCst);
    }

    /// Make `ping` report the store as unreachable.
    pub(crate) fn fail_ping(&self) {
        self.fail_ping.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn otp_records(&self, identifier: &str) -> Vec<OtpRecord> {
        let tables = self.tables.lock().await;
        tables
            .otps
            .iter()
            .filter(|record| record.identifier == identifier)
            .cloned()
            .collect()
    }

    pub(crate) async fn accounts(&self) -> Vec<Account> {
        self.tables.lock().await.accounts.clone()
    }

    pub(crate) async fn outbox(&self) -> Vec<OutboundMessage> {
        self.tables.lock().await.outbox.clone()
    }

    /// Shift the expiry of every record for `identifier` into the past.
    pub(crate) async fn expire_otps(&self, identifier: &str) {
        let mut tables = self.tables.lock().await;
        for record in tables
            .otps
            .iter_mut()
            .filter(|record| record.identifier == identifier)
        {
            record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

fn external_id(accounts: &[Account], pending: &PendingSignup, account_id: Uuid) -> String {
    let base = base_user_id(pending);
    if accounts
        .iter()
        .any(|account| account.user_id == base && account.id != account_id)
    {
        suffixed_user_id(&base, account_id)
    } else {
        base
    }
}

fn holds_identity(accounts: &[Account], pending: &PendingSignup, except: Option<Uuid>) -> bool {
    accounts.iter().any(|account| {
        Some(account.id) != except
            && ((pending.email.is_some() && account.email == pending.email)
                || (pending.phone.is_some() && account.phone == pending.phone))
    })
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            bail!("store unreachable");
        }
        Ok(())
    }

    async fn registered_conflict(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<Channel>> {
        let tables = self.tables.lock().await;
        if email.is_some() && tables.accounts.iter().any(|a| a.email.as_deref() == email) {
            return Ok(Some(Channel::Email));
        }
        if phone.is_some() && tables.accounts.iter().any(|a| a.phone.as_deref() == phone) {
            return Ok(Some(Channel::Sms));
        }
        Ok(None)
    }

    async fn replace_pending_signup(&self, pending: &PendingSignup) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .pending
            .retain(|existing| existing.identifier != pending.identifier);
        tables.pending.push(pending.clone());
        Ok(())
    }

    async fn pending_signup(&self, identifier: &str) -> Result<Option<PendingSignup>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .pending
            .iter()
            .find(|pending| pending.identifier == identifier)
            .cloned())
    }

    async fn issue_otp(&self, issue: OtpIssue<'_>) -> Result<OtpRecord> {
        let mut tables = self.tables.lock().await;
        tables
            .otps
            .retain(|record| record.identifier != issue.identifier);

        let now = Utc::now();
        let record = OtpRecord {
            id: Uuid::now_v7(),
            identifier: issue.identifier.to_string(),
            code: issue.code.map(str::to_string),
            session_token: issue.session_token.map(str::to_string),
            created_at: now,
            expires_at: now + issue.ttl,
            verified: false,
        };
        tables.otps.push(record.clone());
        Ok(record)
    }

    async fn latest_unverified_otp(&self, identifier: &str) -> Result<Option<OtpRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .otps
            .iter()
            .filter(|record| record.identifier == identifier && !record.verified)
            .max_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            .cloned())
    }

    async fn mark_otp_verified(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(record) = tables.otps.iter_mut().find(|record| record.id == id) {
            record.verified = true;
        }
        Ok(())
    }

    async fn get_or_create_guest(&self, device_id: &str) -> Result<GuestResolution> {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables
            .accounts
            .iter()
            .find(|account| account.device_id.as_deref() == Some(device_id))
        {
            return Ok(GuestResolution {
                account: account.clone(),
                created: false,
            });
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::now_v7(),
            user_id: guest_user_id(),
            email: None,
            phone: None,
            password_hash: None,
            is_guest: true,
            device_id: Some(device_id.to_string()),
            latitude: None,
            longitude: None,
            address: Address::default(),
            interests: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        tables.accounts.push(account.clone());
        Ok(GuestResolution {
            account,
            created: true,
        })
    }

    async fn materialize(
        &self,
        pending: &PendingSignup,
        device_id: &str,
    ) -> Result<MaterializeOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(position) = tables
            .pending
            .iter()
            .position(|existing| existing.identifier == pending.identifier)
        else {
            return Ok(MaterializeOutcome::SignupMissing);
        };
        let consumed = tables.pending[position].clone();

        let bound = tables
            .accounts
            .iter()
            .position(|account| account.device_id.as_deref() == Some(device_id));

        let upgrade_target = bound.filter(|&index| tables.accounts[index].is_guest);
        let except = upgrade_target.map(|index| tables.accounts[index].id);
        if holds_identity(&tables.accounts, &consumed, except) {
            return Ok(MaterializeOutcome::Conflict);
        }

        let now = Utc::now();
        let outcome = if let Some(index) = upgrade_target {
            let account_id = tables.accounts[index].id;
            let user_id = external_id(&tables.accounts, &consumed, account_id);
            let account = &mut tables.accounts[index];
            account.user_id = user_id;
            account.email.clone_from(&consumed.email);
            account.phone.clone_from(&consumed.phone);
            account.password_hash = Some(consumed.password_hash.clone());
            account.is_guest = false;
            account.latitude = Some(consumed.latitude);
            account.longitude = Some(consumed.longitude);
            account.address = consumed.address.clone();
            account.interests.clone_from(&consumed.interests);
            account.updated_at = now;
            MaterializeOutcome::Upgraded(account.clone())
        } else {
            let account_id = Uuid::now_v7();
            let account = Account {
                id: account_id,
                user_id: external_id(&tables.accounts, &consumed, account_id),
                email: consumed.email.clone(),
                phone: consumed.phone.clone(),
                password_hash: Some(consumed.password_hash.clone()),
                is_guest: false,
                device_id: bound.is_none().then(|| device_id.to_string()),
                latitude: Some(consumed.latitude),
                longitude: Some(consumed.longitude),
                address: consumed.address.clone(),
                interests: consumed.interests.clone(),
                created_at: now,
                updated_at: now,
            };
            tables.accounts.push(account.clone());
            MaterializeOutcome::Created(account)
        };

        tables.pending.remove(position);
        Ok(outcome)
    }

    async fn account_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        let value = Some(identifier.as_str());
        Ok(tables
            .accounts
            .iter()
            .find(|account| match identifier.channel() {
                Channel::Email => account.email.as_deref() == value,
                Channel::Sms => account.phone.as_deref() == value,
            })
            .cloned())
    }

    async fn enqueue_outbound(&self, message: &OutboundMessage) -> Result<()> {
        if self.fail_outbox.load(Ordering::SeqCst) {
            bail!("outbox unavailable");
        }
        self.tables.lock().await.outbox.push(message.clone());
        Ok(())
    }

    async fn purge_expired(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport> {
        let mut tables = self.tables.lock().await;
        let otps_before = tables.otps.len();
        tables
            .otps
            .retain(|record| record.expires_at >= cutoffs.otp_expired_before);
        let pending_before = tables.pending.len();
        tables
            .pending
            .retain(|pending| pending.created_at >= cutoffs.pending_created_before);

        Ok(PurgeReport {
            otp_records: (otps_before - tables.otps.len()) as u64,
            pending_signups: (pending_before - tables.pending.len()) as u64,
        })
    }
}
