//! Proxy configuration.

use clap::Parser;
use std::time::Duration;

use crate::error::{ErrorCode, StorageError, StorageResult};

/// Development storage account name.
pub const DEFAULT_ACCOUNT: &str = "devstoreaccount1";

/// Development storage account key (base64 encoded).
pub const DEFAULT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Default port the proxy listens on.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Storage API version sent upstream when the caller does not pick one.
///
/// The SharedKey canonicalization signs a zero-length write as `0`, which the
/// service only accepts for versions before 2015-02-21.
pub const DEFAULT_API_VERSION: &str = "2009-09-19";

/// Largest upstream response body the proxy buffers (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BUFFER_SIZE: usize = 1024 * 1024;

/// Largest inbound request body the proxy accepts (4 MiB).
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Lifetime of a container SAS, in minutes.
pub const DEFAULT_CONTAINER_SAS_EXPIRATION_MINUTES: i64 = 15;

/// Lifetime of the "readonly" blob access policy, in days.
pub const DEFAULT_BLOB_SAS_EXPIRATION_DAYS: i64 = 15;

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Command-line arguments for the proxy.
#[derive(Parser, Debug, Clone)]
#[command(name = "storage-proxy")]
#[command(about = "Credential-injecting reverse proxy for Azure Storage")]
#[command(version)]
pub struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PROXY_PORT)]
    pub port: u16,

    /// Storage connection string. Takes precedence over the account flags.
    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// Storage account name.
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT", default_value = DEFAULT_ACCOUNT)]
    pub account: String,

    /// Storage account key (base64).
    #[arg(long, env = "AZURE_STORAGE_KEY", default_value = DEFAULT_ACCOUNT_KEY)]
    pub account_key: String,

    /// Blob service endpoint override.
    #[arg(long)]
    pub blob_endpoint: Option<String>,

    /// Queue service endpoint override.
    #[arg(long)]
    pub queue_endpoint: Option<String>,

    /// Table service endpoint override.
    #[arg(long)]
    pub table_endpoint: Option<String>,

    /// Route prefix for proxied blob requests.
    #[arg(long, default_value = "blob")]
    pub blob_prefix: String,

    /// Route prefix for proxied queue requests.
    #[arg(long, default_value = "queue")]
    pub queue_prefix: String,

    /// Route prefix for proxied table requests.
    #[arg(long, default_value = "table")]
    pub table_prefix: String,

    /// Maximum upstream response size buffered by the proxy, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_RESPONSE_BUFFER_SIZE)]
    pub max_response_buffer_size: usize,

    /// Maximum inbound request body accepted for proxying, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_REQUEST_BODY_SIZE)]
    pub max_request_body_size: usize,

    /// Container SAS lifetime in minutes.
    #[arg(long, default_value_t = DEFAULT_CONTAINER_SAS_EXPIRATION_MINUTES)]
    pub container_sas_expiration_minutes: i64,

    /// Expiry of the "readonly" blob access policy in days.
    #[arg(long, default_value_t = DEFAULT_BLOB_SAS_EXPIRATION_DAYS)]
    pub blob_sas_expiration_days: i64,

    /// Per-call timeout for upstream requests, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,
}

/// Credentials and endpoints of the proxied storage account.
#[derive(Clone)]
pub struct StorageAccount {
    pub name: String,
    pub key: String,
    pub blob_endpoint: String,
    pub queue_endpoint: String,
    pub table_endpoint: String,
}

impl std::fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAccount")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .field("blob_endpoint", &self.blob_endpoint)
            .field("queue_endpoint", &self.queue_endpoint)
            .field("table_endpoint", &self.table_endpoint)
            .finish()
    }
}

impl StorageAccount {
    /// Creates an account whose endpoints follow the public cloud naming.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            blob_endpoint: public_endpoint("https", &name, "blob", DEFAULT_ENDPOINT_SUFFIX),
            queue_endpoint: public_endpoint("https", &name, "queue", DEFAULT_ENDPOINT_SUFFIX),
            table_endpoint: public_endpoint("https", &name, "table", DEFAULT_ENDPOINT_SUFFIX),
            key: key.into(),
            name,
        }
    }

    /// The local development storage account.
    pub fn development() -> Self {
        Self {
            name: DEFAULT_ACCOUNT.to_string(),
            key: DEFAULT_ACCOUNT_KEY.to_string(),
            blob_endpoint: format!("http://127.0.0.1:10000/{}", DEFAULT_ACCOUNT),
            queue_endpoint: format!("http://127.0.0.1:10001/{}", DEFAULT_ACCOUNT),
            table_endpoint: format!("http://127.0.0.1:10002/{}", DEFAULT_ACCOUNT),
        }
    }

    /// Parses a storage connection string.
    ///
    /// Recognizes `DefaultEndpointsProtocol`, `AccountName`, `AccountKey`,
    /// `EndpointSuffix`, the per-service `*Endpoint` keys and
    /// `UseDevelopmentStorage=true`.
    pub fn from_connection_string(conn: &str) -> StorageResult<Self> {
        let mut protocol = "https";
        let mut name = None;
        let mut key = None;
        let mut suffix = DEFAULT_ENDPOINT_SUFFIX;
        let mut blob = None;
        let mut queue = None;
        let mut table = None;

        for part in conn.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidConfiguration,
                    format!("Malformed connection string segment '{}'", part),
                )
            })?;
            match k {
                "UseDevelopmentStorage" if v.eq_ignore_ascii_case("true") => {
                    return Ok(Self::development());
                }
                "DefaultEndpointsProtocol" => protocol = v,
                "AccountName" => name = Some(v.to_string()),
                "AccountKey" => key = Some(v.to_string()),
                "EndpointSuffix" => suffix = v,
                "BlobEndpoint" => blob = Some(v.to_string()),
                "QueueEndpoint" => queue = Some(v.to_string()),
                "TableEndpoint" => table = Some(v.to_string()),
                _ => {}
            }
        }

        let name = name.ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                "Connection string is missing AccountName",
            )
        })?;
        let key = key.ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                "Connection string is missing AccountKey",
            )
        })?;

        Ok(Self {
            blob_endpoint: blob.unwrap_or_else(|| public_endpoint(protocol, &name, "blob", suffix)),
            queue_endpoint: queue
                .unwrap_or_else(|| public_endpoint(protocol, &name, "queue", suffix)),
            table_endpoint: table
                .unwrap_or_else(|| public_endpoint(protocol, &name, "table", suffix)),
            name,
            key,
        })
    }
}

fn public_endpoint(protocol: &str, account: &str, service: &str, suffix: &str) -> String {
    format!("{}://{}.{}.{}", protocol, account, service, suffix)
}

/// Proxy configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Proxied storage account.
    pub account: StorageAccount,
    /// Route prefix for blob proxying.
    pub blob_prefix: String,
    /// Route prefix for queue proxying.
    pub queue_prefix: String,
    /// Route prefix for table proxying.
    pub table_prefix: String,
    /// Storage API version added when the caller sends none.
    pub api_version: String,
    /// Maximum upstream response body size.
    pub max_response_buffer_size: usize,
    /// Maximum inbound request body size.
    pub max_request_body_size: usize,
    /// Container SAS lifetime in minutes.
    pub container_sas_expiration_minutes: i64,
    /// "readonly" policy lifetime in days.
    pub blob_sas_expiration_days: i64,
    /// Optional per-call upstream timeout.
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PROXY_PORT,
            account: StorageAccount::development(),
            blob_prefix: "blob".to_string(),
            queue_prefix: "queue".to_string(),
            table_prefix: "table".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            max_response_buffer_size: DEFAULT_MAX_RESPONSE_BUFFER_SIZE,
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY_SIZE,
            container_sas_expiration_minutes: DEFAULT_CONTAINER_SAS_EXPIRATION_MINUTES,
            blob_sas_expiration_days: DEFAULT_BLOB_SAS_EXPIRATION_DAYS,
            timeout: None,
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = StorageError;

    fn try_from(args: Args) -> StorageResult<Self> {
        let mut account = match args.connection_string.as_deref() {
            Some(conn) => StorageAccount::from_connection_string(conn)?,
            None if args.account == DEFAULT_ACCOUNT => StorageAccount {
                key: args.account_key,
                ..StorageAccount::development()
            },
            None => StorageAccount::new(args.account, args.account_key),
        };
        if let Some(endpoint) = args.blob_endpoint {
            account.blob_endpoint = endpoint;
        }
        if let Some(endpoint) = args.queue_endpoint {
            account.queue_endpoint = endpoint;
        }
        if let Some(endpoint) = args.table_endpoint {
            account.table_endpoint = endpoint;
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            account,
            blob_prefix: args.blob_prefix,
            queue_prefix: args.queue_prefix,
            table_prefix: args.table_prefix,
            api_version: DEFAULT_API_VERSION.to_string(),
            max_response_buffer_size: args.max_response_buffer_size,
            max_request_body_size: args.max_request_body_size,
            container_sas_expiration_minutes: args.container_sas_expiration_minutes,
            blob_sas_expiration_days: args.blob_sas_expiration_days,
            timeout: args.timeout.map(Duration::from_secs),
        })
    }
}

impl Config {
    /// Returns the bind address for the proxy.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
