//! blobrelay attachment service
//!
//! Ephemeral blob relay for chat file sharing: uploads are admitted through
//! a per-source rate limiter and a disk quota with oldest-first eviction,
//! stored under random identifiers, and expired after a fixed lifetime. An
//! optional TURN relay shares the configured account table for its
//! long-term-credential handshake.

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use blobrelay_core::{AccountTable, AttachmentStore, RelayConfig};

mod api;
mod error;
mod relay;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "blobrelay-server")]
#[command(about = "Ephemeral attachment relay for chat file sharing")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "blobrelay.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Application state
pub struct AppState {
    pub store: Arc<AttachmentStore>,
    pub trusted_proxy: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.config.exists() {
        RelayConfig::write_starter(&args.config).with_context(|| {
            format!("failed to write starter config to {}", args.config.display())
        })?;
        info!(
            "A starter configuration file has been created at {}. Edit it to your liking.",
            args.config.display()
        );
        return Ok(());
    }

    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let store = Arc::new(
        AttachmentStore::open(&config)
            .await
            .context("failed to open attachment store")?,
    );

    // The TURN relay and the upload path share nothing but the account
    // table; a configured relay that cannot start aborts the process.
    let accounts = Arc::new(AccountTable::new(config.accounts.clone()));
    let _turn_server = match &config.turn {
        Some(turn_config) => Some(relay::start(turn_config, Arc::clone(&accounts)).await?),
        None => None,
    };

    let app_state = web::Data::new(AppState {
        store: Arc::clone(&store),
        trusted_proxy: config.trusted_proxy,
    });
    let storage_dir = config.storage_dir.clone();

    info!("Binding attachment service to {}", config.listen_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(api::configure)
            .service(Files::new("/files", storage_dir.clone()))
    })
    .bind(&config.listen_address)
    .with_context(|| format!("failed to bind {}", config.listen_address))?
    .run()
    .await?;

    Ok(())
}
