//! storage-proxy: credential-injecting reverse proxy and SAS issuer for Azure Storage.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use storage_proxy::{Args, Config, ProxyServer, ResourceKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::try_from(args)?;
    let server = ProxyServer::new(config)?;

    println!(
        r#"
Storage proxy is starting at {}

Blob:  {}<path>
Queue: {}<path>
Table: {}<path>
SAS:   {}/containers/<name>?comp=sas

Press Ctrl+C to stop the server.
"#,
        server.bind_address(),
        server.proxy_url(ResourceKind::Blob),
        server.proxy_url(ResourceKind::Queue),
        server.proxy_url(ResourceKind::Table),
        server.base_url()
    );

    server.run().await
}
