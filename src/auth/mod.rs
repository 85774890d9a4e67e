//! Request signing and shared access signatures.

mod service_sas;
mod shared_key;

pub use service_sas::*;
pub use shared_key::*;
