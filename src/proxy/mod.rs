//! Credential-injecting reverse proxy to the storage service.

mod dispatcher;
pub mod rewrite;
mod transport;

pub use dispatcher::*;
pub use transport::*;
