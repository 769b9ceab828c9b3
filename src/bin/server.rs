use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use marknest::db::schema;
use marknest::server::config::ServerConfig;
use marknest::storage::{BackupStore, FsBackupStore};
use marknest::version::VERSION;
use marknest::web;

#[derive(Parser, Debug)]
#[command(author, version, about = "marknest bookmark manager server", long_about = None)]
struct Args {}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _args = Args::parse();

    init_logging();
    info!("Starting server, version: {}", VERSION);
    dotenv().ok();

    let config = match ServerConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Failed to load server configuration: {}", e);
            return Err(e.into());
        }
    };

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(10);
    let db: DatabaseConnection = Database::connect(opt)
        .await
        .expect("Failed to create database connection.");
    schema::ensure_schema(&db).await?;

    let backup_store: Option<Arc<dyn BackupStore>> = match &config.backup_dir {
        Some(dir) => {
            info!(dir = %dir, "backup store enabled");
            Some(Arc::new(FsBackupStore::new(dir.clone())))
        }
        None => {
            info!("BACKUP_DIR not set; backup endpoints disabled");
            None
        }
    };

    let app = web::create_axum_router(db, config.clone(), backup_store);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("HTTP server listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
