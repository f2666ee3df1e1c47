//! Wardflow
//!
//! Main entry point for the ICU bed allocation backend.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

use wardflow::api::{self, AppState};
use wardflow::config;
use wardflow::db::Database;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = config::load().context("failed to load configuration")?;

    // Connect to database and wire the allocation components
    let database = Database::connect(&config.database.url)
        .await
        .context("failed to connect to database")?;
    let state = web::Data::new(AppState::new(Arc::new(database)));

    tracing::info!(host = %config.server.host, port = config.server.port, "starting server");

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(Cors::permissive())
            .configure(api::configure)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
