//! Registration, OTP verification and guest bootstrap.
//!
//! ## Flow
//!
//! `signup` validates the payload and stores a pending signup keyed by the
//! normalized identifier. The per-request [`Policy`](policy::Policy) then either
//! materializes the account right away (bypass) or dispatches an OTP through the
//! provider chain and records it. `verify-otp` checks the newest unverified record
//! and consumes the pending signup exactly once, upgrading a guest bound to the
//! same device in place when one exists.
//!
//! ## Delivery
//!
//! Locally generated codes go through the message outbox; the request never waits
//! on SMTP. Hosted-provider failures demote to the local code and surface as a
//! `note` on the response.

pub mod address;
pub(crate) mod debug;
pub mod error;
pub mod identifier;
pub(crate) mod login;
pub mod models;
pub mod policy;
pub mod provider;
mod service;
pub(crate) mod signup;
mod state;
pub mod storage;
pub mod tokens;
pub(crate) mod types;
pub(crate) mod verification;

pub use address::NoopAddressLookup;
pub use debug::DEBUG_SECRET_HEADER;
pub use error::ErrorBody;
pub(crate) use service::bootstrap_guest;
pub use state::{AuthConfig, AuthState};
pub use storage::{AuthStore, PgAuthStore};
pub use tokens::{JwtTokenIssuer, TokenIssuer};
