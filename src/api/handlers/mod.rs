//! API handlers for Pinmate.
//!
//! `auth` holds the signup/verification pipeline; the remaining modules are the
//! service endpoints around it.

pub mod app_init;
pub mod auth;
pub mod health;
pub mod root;
