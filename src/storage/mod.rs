//! Storage-service primitives behind the SAS issuer.

mod container_store;
mod rest;

pub use container_store::*;
pub use rest::*;
