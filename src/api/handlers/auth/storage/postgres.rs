//! `PostgreSQL` implementation of [`AuthStore`].
//!
//! Every multi-statement operation runs in a single transaction. OTP issuance takes a
//! transaction-scoped advisory lock on the identifier so concurrent signup/resend calls
//! serialize their delete-then-insert instead of interleaving.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Connection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

use super::{AuthStore, is_unique_violation};
use crate::api::handlers::auth::identifier::{Channel, Identifier};
use crate::api::handlers::auth::models::{
    Account, Address, GuestResolution, MaterializeOutcome, OtpIssue, OtpRecord, OutboundMessage,
    PendingSignup, PurgeCutoffs, PurgeReport, base_user_id, guest_user_id, suffixed_user_id,
};

const GUEST_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn account_from_row(row: &PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
        is_guest: row.try_get("is_guest")?,
        device_id: row.try_get("device_id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        address: Address {
            pincode: row.try_get("pincode")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            country: row.try_get("country")?,
        },
        interests: row.try_get("interests")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn pending_from_row(row: &PgRow) -> Result<PendingSignup, sqlx::Error> {
    Ok(PendingSignup {
        identifier: row.try_get("identifier")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        interests: row.try_get("interests")?,
        address: Address {
            pincode: row.try_get("pincode")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            country: row.try_get("country")?,
        },
        device_id: row.try_get("device_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn otp_from_row(row: &PgRow) -> Result<OtpRecord, sqlx::Error> {
    Ok(OtpRecord {
        id: row.try_get("id")?,
        identifier: row.try_get("identifier")?,
        code: row.try_get("code")?,
        session_token: row.try_get("session_token")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        verified: row.try_get("verified")?,
    })
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;

        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }

    async fn registered_conflict(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<Channel>> {
        let query = r"
            SELECT (email IS NOT NULL AND email = $1) AS email_taken
            FROM accounts
            WHERE email = $1 OR phone = $2
            ORDER BY email_taken DESC
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(phone)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check registered identifiers")?;

        let conflict = row
            .map(|row| -> Result<Channel, sqlx::Error> {
                let email_taken: Option<bool> = row.try_get("email_taken")?;
                Ok(if email_taken.unwrap_or(false) {
                    Channel::Email
                } else {
                    Channel::Sms
                })
            })
            .transpose()?;
        Ok(conflict)
    }

    async fn replace_pending_signup(&self, pending: &PendingSignup) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin pending signup transaction")?;

        let query = "DELETE FROM pending_signups WHERE identifier = $1";
        sqlx::query(query)
            .bind(&pending.identifier)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to discard previous pending signup")?;

        let query = r"
            INSERT INTO pending_signups
                (identifier, email, phone, password_hash, latitude, longitude, interests,
                 pincode, city, state, country, device_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ";
        sqlx::query(query)
            .bind(&pending.identifier)
            .bind(pending.email.as_deref())
            .bind(pending.phone.as_deref())
            .bind(&pending.password_hash)
            .bind(pending.latitude)
            .bind(pending.longitude)
            .bind(pending.interests.as_slice())
            .bind(pending.address.pincode.as_deref())
            .bind(pending.address.city.as_deref())
            .bind(pending.address.state.as_deref())
            .bind(pending.address.country.as_deref())
            .bind(pending.device_id.as_deref())
            .bind(pending.created_at)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert pending signup")?;

        tx.commit()
            .await
            .context("commit pending signup transaction")?;
        Ok(())
    }

    async fn pending_signup(&self, identifier: &str) -> Result<Option<PendingSignup>> {
        let query = r"
            SELECT identifier, email, phone, password_hash, latitude, longitude, interests,
                   pincode, city, state, country, device_id, created_at
            FROM pending_signups
            WHERE identifier = $1
        ";
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to load pending signup")?;

        Ok(row.as_ref().map(pending_from_row).transpose()?)
    }

    async fn issue_otp(&self, issue: OtpIssue<'_>) -> Result<OtpRecord> {
        let mut tx = self.pool.begin().await.context("begin OTP issue transaction")?;

        let query = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
        sqlx::query(query)
            .bind(issue.identifier)
            .execute(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lock identifier for OTP issue")?;

        let query = "DELETE FROM otp_records WHERE identifier = $1";
        sqlx::query(query)
            .bind(issue.identifier)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete previous OTP records")?;

        let query = r"
            INSERT INTO otp_records (id, identifier, code, session_token, created_at, expires_at)
            VALUES ($1, $2, $3, $4, clock_timestamp(),
                    clock_timestamp() + ($5 * INTERVAL '1 millisecond'))
            RETURNING id, identifier, code, session_token, created_at, expires_at, verified
        ";
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(issue.identifier)
            .bind(issue.code)
            .bind(issue.session_token)
            .bind(issue.ttl.num_milliseconds())
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert OTP record")?;
        let record = otp_from_row(&row)?;

        tx.commit().await.context("commit OTP issue transaction")?;
        Ok(record)
    }

    async fn latest_unverified_otp(&self, identifier: &str) -> Result<Option<OtpRecord>> {
        let query = r"
            SELECT id, identifier, code, session_token, created_at, expires_at, verified
            FROM otp_records
            WHERE identifier = $1 AND verified = FALSE
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to load latest OTP record")?;

        Ok(row.as_ref().map(otp_from_row).transpose()?)
    }

    async fn mark_otp_verified(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE otp_records
            SET verified = TRUE,
                verified_at = COALESCE(verified_at, NOW())
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to mark OTP record verified")?;
        Ok(())
    }

    async fn get_or_create_guest(&self, device_id: &str) -> Result<GuestResolution> {
        // The no-op DO UPDATE makes RETURNING yield the existing row on conflict;
        // xmax = 0 only for freshly inserted tuples.
        let query = r"
            INSERT INTO accounts (id, user_id, device_id, is_guest)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (device_id) DO UPDATE SET device_id = EXCLUDED.device_id
            RETURNING id, user_id, email, phone, password_hash, is_guest, device_id,
                      latitude, longitude, pincode, city, state, country, interests,
                      created_at, updated_at, (xmax = 0) AS inserted
        ";

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::query(query)
                .bind(Uuid::now_v7())
                .bind(guest_user_id())
                .bind(device_id)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query))
                .await;

            match result {
                Ok(row) => {
                    return Ok(GuestResolution {
                        account: account_from_row(&row)?,
                        created: row.try_get("inserted")?,
                    });
                }
                // Only a generated guest id can collide here; draw a new one.
                Err(err) if is_unique_violation(&err) && attempt < GUEST_INSERT_ATTEMPTS => {}
                Err(err) => return Err(err).context("failed to get or create guest account"),
            }
        }
    }

    async fn materialize(
        &self,
        pending: &PendingSignup,
        device_id: &str,
    ) -> Result<MaterializeOutcome> {
        let mut tx = self.pool.begin().await.context("begin materialize transaction")?;

        let query = r"
            DELETE FROM pending_signups
            WHERE identifier = $1
            RETURNING identifier, email, phone, password_hash, latitude, longitude, interests,
                      pincode, city, state, country, device_id, created_at
        ";
        let row = sqlx::query(query)
            .bind(&pending.identifier)
            .fetch_optional(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to consume pending signup")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(MaterializeOutcome::SignupMissing);
        };
        let consumed = pending_from_row(&row)?;

        let query = r"
            SELECT id, user_id, email, phone, password_hash, is_guest, device_id,
                   latitude, longitude, pincode, city, state, country, interests,
                   created_at, updated_at
            FROM accounts
            WHERE device_id = $1
            FOR UPDATE
        ";
        let bound = sqlx::query(query)
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to load device account")?
            .as_ref()
            .map(account_from_row)
            .transpose()?;

        let result = match bound {
            Some(guest) if guest.is_guest => upgrade_guest(&mut tx, guest.id, &consumed)
                .await
                .map(MaterializeOutcome::Upgraded),
            // The device already belongs to a full account; the new one stays unbound.
            Some(_) => insert_account(&mut tx, &consumed, None)
                .await
                .map(MaterializeOutcome::Created),
            None => insert_account(&mut tx, &consumed, Some(device_id))
                .await
                .map(MaterializeOutcome::Created),
        };

        match result {
            Ok(outcome) => {
                tx.commit().await.context("commit materialize transaction")?;
                Ok(outcome)
            }
            Err(err) if is_unique_violation(&err) => {
                let _ = tx.rollback().await;
                Ok(MaterializeOutcome::Conflict)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err).context("failed to materialize account")
            }
        }
    }

    async fn account_by_identifier(&self, identifier: &Identifier) -> Result<Option<Account>> {
        let query = match identifier.channel() {
            Channel::Email => {
                r"
                SELECT id, user_id, email, phone, password_hash, is_guest, device_id,
                       latitude, longitude, pincode, city, state, country, interests,
                       created_at, updated_at
                FROM accounts
                WHERE email = $1
                "
            }
            Channel::Sms => {
                r"
                SELECT id, user_id, email, phone, password_hash, is_guest, device_id,
                       latitude, longitude, pincode, city, state, country, interests,
                       created_at, updated_at
                FROM accounts
                WHERE phone = $1
                "
            }
        };
        let row = sqlx::query(query)
            .bind(identifier.as_str())
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to load account by identifier")?;

        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn enqueue_outbound(&self, message: &OutboundMessage) -> Result<()> {
        let query = r"
            INSERT INTO message_outbox (id, channel, recipient, template, payload_json)
            VALUES ($1, $2, $3, $4, $5::jsonb)
        ";
        sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(message.channel.as_str())
            .bind(&message.recipient)
            .bind(&message.template)
            .bind(message.payload_json.to_string())
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to enqueue outbound message")?;
        Ok(())
    }

    async fn purge_expired(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport> {
        let query = "DELETE FROM otp_records WHERE expires_at < $1";
        let otp_records = sqlx::query(query)
            .bind(cutoffs.otp_expired_before)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge expired OTP records")?
            .rows_affected();

        let query = "DELETE FROM pending_signups WHERE created_at < $1";
        let pending_signups = sqlx::query(query)
            .bind(cutoffs.pending_created_before)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge stale pending signups")?
            .rows_affected();

        Ok(PurgeReport {
            otp_records,
            pending_signups,
        })
    }
}

/// Keep the base external id unless another account already holds it.
async fn resolve_user_id(
    tx: &mut Transaction<'_, Postgres>,
    pending: &PendingSignup,
    account_id: Uuid,
) -> Result<String, sqlx::Error> {
    let base = base_user_id(pending);
    let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE user_id = $1 AND id <> $2) AS taken";
    let taken: bool = sqlx::query(query)
        .bind(&base)
        .bind(account_id)
        .fetch_one(&mut **tx)
        .instrument(query_span("SELECT", query))
        .await?
        .try_get("taken")?;

    Ok(if taken {
        suffixed_user_id(&base, account_id)
    } else {
        base
    })
}

async fn upgrade_guest(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    pending: &PendingSignup,
) -> Result<Account, sqlx::Error> {
    let user_id = resolve_user_id(tx, pending, account_id).await?;
    let query = r"
        UPDATE accounts
        SET user_id = $2,
            email = $3,
            phone = $4,
            password_hash = $5,
            is_guest = FALSE,
            latitude = $6,
            longitude = $7,
            pincode = $8,
            city = $9,
            state = $10,
            country = $11,
            interests = $12,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, email, phone, password_hash, is_guest, device_id,
                  latitude, longitude, pincode, city, state, country, interests,
                  created_at, updated_at
    ";
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(user_id)
        .bind(pending.email.as_deref())
        .bind(pending.phone.as_deref())
        .bind(&pending.password_hash)
        .bind(pending.latitude)
        .bind(pending.longitude)
        .bind(pending.address.pincode.as_deref())
        .bind(pending.address.city.as_deref())
        .bind(pending.address.state.as_deref())
        .bind(pending.address.country.as_deref())
        .bind(pending.interests.as_slice())
        .fetch_one(&mut **tx)
        .instrument(query_span("UPDATE", query))
        .await?;
    account_from_row(&row)
}

async fn insert_account(
    tx: &mut Transaction<'_, Postgres>,
    pending: &PendingSignup,
    device_id: Option<&str>,
) -> Result<Account, sqlx::Error> {
    let account_id = Uuid::now_v7();
    let user_id = resolve_user_id(tx, pending, account_id).await?;
    let query = r"
        INSERT INTO accounts
            (id, user_id, email, phone, password_hash, is_guest, device_id, latitude, longitude,
             pincode, city, state, country, interests, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
        RETURNING id, user_id, email, phone, password_hash, is_guest, device_id,
                  latitude, longitude, pincode, city, state, country, interests,
                  created_at, updated_at
    ";
    let row = sqlx::query(query)
        .bind(account_id)
        .bind(user_id)
        .bind(pending.email.as_deref())
        .bind(pending.phone.as_deref())
        .bind(&pending.password_hash)
        .bind(device_id)
        .bind(pending.latitude)
        .bind(pending.longitude)
        .bind(pending.address.pincode.as_deref())
        .bind(pending.address.city.as_deref())
        .bind(pending.address.state.as_deref())
        .bind(pending.address.country.as_deref())
        .bind(pending.interests.as_slice())
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .instrument(query_span("INSERT", query))
        .await?;
    account_from_row(&row)
}
