//! `DigitalOcean` provider.
//!
//! Implements [`CloudProvider`](super::CloudProvider) against the v2 REST
//! API: droplet creation with cloud-init user data, and the account SSH key
//! registry.

mod client;
mod models;

pub use client::DigitalOcean;
pub use models::*;
