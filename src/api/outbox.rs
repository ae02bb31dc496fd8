//! Message outbox worker and delivery abstractions.
//!
//! OTP dispatch enqueues rows in `message_outbox` with status `pending`. A
//! background task polls that table, locks a batch via `FOR UPDATE SKIP LOCKED`,
//! and hands each row to the sender for its channel: an [`EmailSender`] for
//! `email` rows and an [`SmsSender`] for `sms` rows. The worker then marks the
//! row `sent`, or reschedules it with exponential backoff and jitter until
//! `max_attempts`, after which it is marked `failed`.
//!
//! Delivery is at-least-once: a crash between sending and committing the status
//! update resends the row on the next poll.
//!
//! Without SMTP settings, email falls back to [`LogEmailSender`]. SMS always goes
//! through [`LogSmsSender`] since no gateway is wired in.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType, transport::smtp::authentication::Credentials,
};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::handlers::auth::identifier::Channel;
use super::handlers::auth::provider::direct::OTP_TEMPLATE;

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_SMTP_FROM: &str = "Pinmate <no-reply@pinmate.app>";

#[derive(Clone, Debug)]
pub struct OutboxMessage {
    pub channel: Channel,
    pub recipient: String,
    pub template: String,
    pub payload_json: String,
}

/// Subject and plain-text body for a queued message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Render a queued message into user-facing text.
///
/// # Errors
/// Returns an error if the payload is not valid JSON or lacks a field the
/// template needs.
pub fn render(message: &OutboxMessage) -> Result<RenderedMessage> {
    let payload: Value =
        serde_json::from_str(&message.payload_json).context("outbox payload is not valid JSON")?;

    match message.template.as_str() {
        OTP_TEMPLATE => {
            let code = payload
                .get("code")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("otp_code payload is missing `code`"))?;
            let minutes = payload
                .get("expires_in_minutes")
                .and_then(Value::as_i64)
                .unwrap_or(5);
            Ok(RenderedMessage {
                subject: "Your Pinmate verification code".to_string(),
                body: format!(
                    "Your Pinmate verification code is {code}. It expires in {minutes} minutes.\n\nIf you did not request this code, you can ignore this message."
                ),
            })
        }
        other => Err(anyhow!("unknown outbox template: {other}")),
    }
}

/// Email delivery abstraction used by the outbox worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    async fn send(&self, message: &OutboxMessage) -> Result<()>;
}

/// SMS delivery abstraction used by the outbox worker.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, message: &OutboxMessage) -> Result<()>;
}

/// Sender that logs instead of delivering; used when SMTP is not configured.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &OutboxMessage) -> Result<()> {
        let rendered = render(message)?;
        info!(
            to_email = %message.recipient,
            template = %message.template,
            "email outbox send stub"
        );
        debug!(subject = %rendered.subject, body = %rendered.body, "email outbox stub body");
        Ok(())
    }
}

/// SMS stand-in: no gateway is integrated, so messages are only logged.
#[derive(Clone, Debug)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, message: &OutboxMessage) -> Result<()> {
        let rendered = render(message)?;
        info!(
            to_phone = %message.recipient,
            template = %message.template,
            "sms outbox send stub"
        );
        debug!(body = %rendered.body, "sms outbox stub body");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    from: String,
}

impl SmtpConfig {
    #[must_use]
    pub fn new(host: String) -> Self {
        Self {
            host,
            port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
            from: DEFAULT_SMTP_FROM.to_string(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: Option<SecretString>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: String) -> Self {
        self.from = from;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// STARTTLS relay sender.
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpEmailSender {
    /// # Errors
    /// Returns an error if the relay host is invalid or the from address does not parse.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        config
            .from
            .parse::<lettre::message::Mailbox>()
            .with_context(|| format!("Invalid SMTP from address: {}", config.from))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("Invalid SMTP relay host: {}", config.host))?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            from: config.from.clone(),
        })
    }

    /// Open a connection to the relay and authenticate.
    ///
    /// # Errors
    /// Returns an error if the relay cannot be reached or rejects the login.
    pub async fn test_connection(&self) -> Result<()> {
        let ok = self
            .mailer
            .test_connection()
            .await
            .context("SMTP connection test failed")?;
        if ok {
            Ok(())
        } else {
            Err(anyhow!("SMTP relay did not accept the connection"))
        }
    }

    fn build_message(&self, to: &str, rendered: &RenderedMessage) -> Result<Message> {
        Message::builder()
            .from(
                self.from
                    .parse()
                    .with_context(|| format!("Invalid from address: {}", self.from))?,
            )
            .to(to
                .parse()
                .with_context(|| format!("Invalid recipient address: {to}"))?)
            .subject(&rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body.clone())
            .context("Failed to build email message")
    }

    /// Send a rendered message directly, bypassing the outbox.
    ///
    /// # Errors
    /// Returns an error if the message cannot be built or the relay rejects it.
    pub async fn send_rendered(&self, to: &str, rendered: &RenderedMessage) -> Result<()> {
        let email = self.build_message(to, rendered)?;
        self.mailer
            .send(email)
            .await
            .context("SMTP relay rejected the message")?;
        info!(to_email = %to, subject = %rendered.subject, "email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &OutboxMessage) -> Result<()> {
        let rendered = render(message)?;
        self.send_rendered(&message.recipient, &rendered).await
    }
}

/// Channel-specific senders used by the worker.
#[derive(Clone)]
pub struct OutboxSenders {
    pub email: Arc<dyn EmailSender>,
    pub sms: Arc<dyn SmsSender>,
}

impl OutboxSenders {
    async fn send(&self, message: &OutboxMessage) -> Result<()> {
        match message.channel {
            Channel::Email => self.email.send(message).await,
            Channel::Sms => self.sms.send(message).await,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OutboxWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl OutboxWorkerConfig {
    /// Default worker config: 5s poll interval, 10 messages per batch,
    /// 5 max attempts, and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    /// Clamp zero values so the worker never spins or stalls.
    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max: self.backoff_max.max(backoff_base),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that polls and drains the message outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    senders: OutboxSenders,
    config: OutboxWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            match process_outbox_batch(&pool, &senders, &config).await {
                Ok(0) => {}
                Ok(count) => debug!(count, "outbox batch processed"),
                Err(err) => error!("message outbox batch failed: {err:#}"),
            }

            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    senders: &OutboxSenders,
    config: &OutboxWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start outbox transaction")?;

    // Locked batch: concurrent workers skip rows another worker holds.
    let query = r"
        SELECT id, channel, recipient, template, payload_json::text AS payload_json, attempts
        FROM message_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load outbox batch")?;

    if rows.is_empty() {
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.try_get("id")?;
        let attempts: i32 = row.try_get("attempts")?;
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let channel: String = row.try_get("channel")?;

        let send_result = match parse_channel(&channel) {
            Some(channel) => {
                let message = OutboxMessage {
                    channel,
                    recipient: row.try_get("recipient")?,
                    template: row.try_get("template")?,
                    payload_json: row.try_get("payload_json")?,
                };
                let span = info_span!("outbox.send", channel = %channel, template = %message.template);
                senders.send(&message).instrument(span).await
            }
            None => Err(anyhow!("unknown outbox channel: {channel}")),
        };

        if let Err(err) = &send_result {
            warn!(%id, attempt = attempts + 1, "outbox delivery failed: {err:#}");
        }
        update_outbox_status(&mut tx, id, attempts, send_result, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit outbox batch")?;

    Ok(row_count)
}

fn parse_channel(value: &str) -> Option<Channel> {
    match value {
        "email" => Some(Channel::Email),
        "sms" => Some(Channel::Sms),
        _ => None,
    }
}

async fn update_outbox_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    send_result: Result<()>,
    config: &OutboxWorkerConfig,
) -> Result<()> {
    let next_attempt = attempts.saturating_add(1);
    let next_attempts_i32 = i32::try_from(next_attempt).unwrap_or(i32::MAX);
    match send_result {
        Ok(()) => {
            let query = r"
                UPDATE message_outbox
                SET status = 'sent',
                    attempts = $2,
                    last_error = NULL,
                    sent_at = NOW(),
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(next_attempts_i32)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to mark outbox row sent")?;
        }
        Err(err) if next_attempt >= config.max_attempts() => {
            let query = r"
                UPDATE message_outbox
                SET status = 'failed',
                    attempts = $2,
                    last_error = $3,
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(next_attempts_i32)
                .bind(format!("{err:#}"))
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to mark outbox row failed")?;
            error!(%id, attempts = next_attempt, "outbox delivery abandoned");
        }
        Err(err) => {
            let delay = backoff_delay(next_attempt, config.backoff_base, config.backoff_max);
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            let query = r"
                UPDATE message_outbox
                SET status = 'pending',
                    attempts = $2,
                    last_error = $3,
                    next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(next_attempts_i32)
                .bind(format!("{err:#}"))
                .bind(delay_ms)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to reschedule outbox row")?;
        }
    }

    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter_delay(delay.min(max))
}

/// Equal jitter: somewhere in `[delay / 2, delay]`.
fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
