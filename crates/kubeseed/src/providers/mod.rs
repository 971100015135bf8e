//! Cloud provider boundary.

pub mod digitalocean;
mod traits;

pub use traits::{
    CloudProvider, CreateInstanceRequest, Instance, InstanceStatus, ProviderError, RegisteredKey,
};
