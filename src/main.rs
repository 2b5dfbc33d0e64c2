use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};

use fs_context_mcp::config::{Cli, Config};
use fs_context_mcp::server::FsContextServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env file if present (silently ignored if missing)
    dotenvy::dotenv().ok();

    tracing::info!("fs-context-mcp starting");

    let cli = Cli::parse();
    let config = Config::from_cli(cli);
    let server = FsContextServer::new(config).await?;

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("fs-context-mcp shutting down");
    Ok(())
}
