//! Access/refresh token issuance.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::models::Account;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    /// External user id.
    pub sub: String,
    /// Stable account key.
    pub aid: Uuid,
    pub guest: bool,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

/// Issue tokens for a materialized or guest account.
pub trait TokenIssuer: Send + Sync {
    /// # Errors
    /// Returns an error if signing fails.
    fn issue(&self, account: &Account) -> Result<TokenPair>;
}

pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtTokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: String) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl = Duration::seconds(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl = Duration::seconds(seconds);
        self
    }

    fn sign(&self, account: &Account, kind: TokenKind, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account.user_id.clone(),
            aid: account.id,
            guest: account.is_guest,
            typ: kind,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).context("failed to sign token")
    }

    /// Decode a token and check signature, expiry and issuer.
    ///
    /// # Errors
    /// Returns an error for malformed, expired or foreign tokens.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .context("invalid token")
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, account: &Account) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.sign(account, TokenKind::Access, self.access_ttl)?,
            refresh: self.sign(account, TokenKind::Refresh, self.refresh_ttl)?,
            expires_in: self.access_ttl.num_seconds(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::models::Address;

    fn account() -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::now_v7(),
            user_id: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            phone: None,
            password_hash: None,
            is_guest: false,
            device_id: Some("device-1".to_string()),
            latitude: Some(28.6),
            longitude: Some(77.2),
            address: Address::default(),
            interests: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn issuer(secret: &str) -> JwtTokenIssuer {
        JwtTokenIssuer::new(&SecretString::from(secret.to_string()), "pinmate".to_string())
    }

    #[test]
    fn issued_pair_verifies() -> Result<()> {
        let issuer = issuer("test-secret").with_access_ttl_seconds(600);
        let account = account();
        let pair = issuer.issue(&account)?;
        assert_eq!(pair.expires_in, 600);

        let access = issuer.verify(&pair.access)?;
        assert_eq!(access.sub, "alice");
        assert_eq!(access.aid, account.id);
        assert_eq!(access.typ, TokenKind::Access);
        assert!(!access.guest);

        let refresh = issuer.verify(&pair.refresh)?;
        assert_eq!(refresh.typ, TokenKind::Refresh);
        assert!(refresh.exp > access.exp);
        Ok(())
    }

    #[test]
    fn foreign_secret_is_rejected() -> Result<()> {
        let pair = issuer("secret-one").issue(&account())?;
        assert!(issuer("secret-two").verify(&pair.access).is_err());
        assert!(issuer("secret-one").verify("not-a-token").is_err());
        Ok(())
    }
}
