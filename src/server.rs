//! HTTP server for the storage proxy.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::error::StorageResult;
use crate::proxy::{HttpUpstreamClient, ResourceKind, StorageProxy, UpstreamClient};
use crate::router::{create_router, AppState};
use crate::sas::SharedAccessSignatureService;
use crate::storage::{ContainerStore, RestContainerStore};

/// Storage proxy server.
pub struct ProxyServer {
    config: Arc<Config>,
    client: Arc<dyn UpstreamClient>,
    store: Arc<dyn ContainerStore>,
}

impl ProxyServer {
    /// Creates a server talking to the configured account over HTTP.
    pub fn new(config: Config) -> StorageResult<Self> {
        let client: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new(&config)?);
        Ok(Self::with_client(config, client))
    }

    /// Creates a server with a custom upstream client.
    pub fn with_client(config: Config, client: Arc<dyn UpstreamClient>) -> Self {
        let store: Arc<dyn ContainerStore> =
            Arc::new(RestContainerStore::new(&config, client.clone()));
        Self::with_parts(config, client, store)
    }

    /// Creates a server with a custom upstream client and container store.
    pub fn with_parts(
        config: Config,
        client: Arc<dyn UpstreamClient>,
        store: Arc<dyn ContainerStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            store,
        }
    }

    /// Builds the application with its middleware.
    pub fn app(&self) -> Router {
        let state = AppState {
            config: self.config.clone(),
            proxy: StorageProxy::new(self.config.clone(), self.client.clone()),
            sas: Arc::new(SharedAccessSignatureService::new(
                self.config.clone(),
                self.store.clone(),
            )),
        };

        create_router(state)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
                    .expose_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Runs the server on the configured address.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_address().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.app();

        info!("Storage proxy is listening on http://{}", listener.local_addr()?);
        info!(
            "Proxying account {} (blob: {})",
            self.config.account.name, self.config.account.blob_endpoint
        );

        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Returns the bind address.
    pub fn bind_address(&self) -> String {
        self.config.bind_address()
    }

    /// Returns the base URL of the proxy.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address())
    }

    /// Returns the local URL that requests for `kind` are proxied under.
    pub fn proxy_url(&self, kind: ResourceKind) -> String {
        format!(
            "{}/{}/",
            self.base_url(),
            kind.prefix(&self.config).trim_matches('/')
        )
    }
}

/// Builder for creating a proxy server.
pub struct ProxyServerBuilder {
    config: Config,
    client: Option<Arc<dyn UpstreamClient>>,
    store: Option<Arc<dyn ContainerStore>>,
}

impl ProxyServerBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            client: None,
            store: None,
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the listening port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the upstream client.
    pub fn client(mut self, client: Arc<dyn UpstreamClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the container store used by the SAS endpoints.
    pub fn store(mut self, store: Arc<dyn ContainerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the server.
    pub fn build(self) -> StorageResult<ProxyServer> {
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(HttpUpstreamClient::new(&self.config)?),
        };
        Ok(match self.store {
            Some(store) => ProxyServer::with_parts(self.config, client, store),
            None => ProxyServer::with_client(self.config, client),
        })
    }
}

impl Default for ProxyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url_follows_configured_prefix() {
        let server = ProxyServerBuilder::new()
            .config(Config {
                port: 9100,
                blob_prefix: "/storage/".to_string(),
                ..Config::default()
            })
            .build()
            .unwrap();
        assert_eq!(server.proxy_url(ResourceKind::Blob), "http://127.0.0.1:9100/storage/");
        assert_eq!(server.proxy_url(ResourceKind::Table), "http://127.0.0.1:9100/table/");
    }
}
