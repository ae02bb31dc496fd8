//! Periodic removal of expired OTP records and abandoned pending signups.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, error, info, info_span};

use super::handlers::auth::AuthStore;
use super::handlers::auth::models::{PurgeCutoffs, PurgeReport};

#[derive(Clone, Copy, Debug)]
pub struct SweepConfig {
    interval: Duration,
    otp_retention: Duration,
    pending_signup_ttl: Duration,
}

impl SweepConfig {
    /// Default: sweep every 5 minutes, keep expired OTPs for an hour and pending
    /// signups for a day.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(300),
            otp_retention: Duration::from_secs(60 * 60),
            pending_signup_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_otp_retention_seconds(mut self, seconds: u64) -> Self {
        self.otp_retention = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_pending_signup_ttl_seconds(mut self, seconds: u64) -> Self {
        self.pending_signup_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records expired before `now - otp_retention` and signups created before
    /// `now - pending_signup_ttl` are purged.
    #[must_use]
    pub fn cutoffs(&self, now: DateTime<Utc>) -> PurgeCutoffs {
        PurgeCutoffs {
            otp_expired_before: cutoff(now, self.otp_retention),
            pending_created_before: cutoff(now, self.pending_signup_ttl),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Run one purge pass.
///
/// # Errors
/// Returns an error if the store rejects the purge.
pub async fn sweep_once(store: &dyn AuthStore, config: &SweepConfig) -> Result<PurgeReport> {
    let report = store
        .purge_expired(config.cutoffs(Utc::now()))
        .instrument(info_span!("auth.sweep"))
        .await?;

    if report.otp_records > 0 || report.pending_signups > 0 {
        info!(
            otp_records = report.otp_records,
            pending_signups = report.pending_signups,
            "expired auth records purged"
        );
    }
    Ok(report)
}

/// Spawn the background sweeper.
pub fn spawn_sweeper(store: Arc<dyn AuthStore>, config: SweepConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(store.as_ref(), &config).await {
                error!("auth sweep failed: {err:#}");
            }
        }
    })
}
