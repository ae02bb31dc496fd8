//! Address enrichment for signup coordinates.
//!
//! Reverse geocoding is an external concern; the server ships with a no-op lookup
//! and keeps whatever address fields the client supplied.

use async_trait::async_trait;

use super::models::Address;

#[async_trait]
pub trait AddressLookup: Send + Sync {
    /// Best-effort address for the coordinates; missing fields stay `None`.
    async fn lookup(&self, latitude: f64, longitude: f64) -> Address;
}

#[derive(Clone, Debug)]
pub struct NoopAddressLookup;

#[async_trait]
impl AddressLookup for NoopAddressLookup {
    async fn lookup(&self, _latitude: f64, _longitude: f64) -> Address {
        Address::default()
    }
}
