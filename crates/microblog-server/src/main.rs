mod cli;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use microblog_api::{AppState, AppStateInner};
use microblog_db::Database;
use microblog_db::migrations::store;

use crate::cli::{Cli, Command};
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microblog=debug,microblog_db=debug,microblog_api=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.config).await,
        Command::Db(command) => command.run(&cli.config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.warn_on_placeholder_secret();

    // Init database
    let db = Database::open(&config.database_path())?;
    if config.auto_migrate {
        let chain = store::load_or_builtin(&config.migrations_dir)?;
        let revision = chain.upgrade(&db, None)?;
        info!("Database at revision {}", revision.as_deref().unwrap_or("<base>"));
    }

    let state: AppState = Arc::new(AppStateInner { db });
    let app = microblog_api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Microblog listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
