//! Shared access signature issuer.

mod service;

pub use service::*;
