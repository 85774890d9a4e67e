//! storage-proxy: an authenticated reverse proxy for Azure Storage.
//!
//! Callers talk plain HTTP to the proxy under `/blob`, `/queue` and `/table`;
//! the proxy rewrites each request onto the storage account, signs it with
//! the account key and rewrites the response back. A second surface manages
//! containers and issues shared access signatures.
//!
//! # Example
//!
//! ```no_run
//! use storage_proxy::{Config, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ProxyServer::new(Config::default()).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod proxy;
pub mod router;
pub mod sas;
pub mod server;
pub mod storage;
pub mod xml;

// Re-exports for convenience
pub use config::{
    Args, Config, StorageAccount, DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY, DEFAULT_PROXY_PORT,
};
pub use error::{ErrorCode, StorageError, StorageResult};
pub use proxy::{
    HttpUpstreamClient, ResourceKind, StorageProxy, TransportError, UpstreamClient,
    UpstreamResponse,
};
pub use sas::SharedAccessSignatureService;
pub use server::{ProxyServer, ProxyServerBuilder};
pub use storage::{ContainerStore, RestContainerStore};
