//! Wardflow core library
//!
//! ICU bed allocation and waitlist backend: bed registry, admission
//! signal derivation, priority waitlist, allocation engine, occupancy
//! lifecycle and capacity analytics.

pub mod api;
pub mod db;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod lifecycle;
pub mod models;
pub mod predictor;
pub mod registry;
pub mod waitlist;

/// Application configuration
pub mod config {
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    pub struct Config {
        pub server: ServerConfig,
        pub database: DatabaseConfig,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ServerConfig {
        pub host: String,
        pub port: u16,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct DatabaseConfig {
        pub url: String,
    }

    /// Load configuration from file, with environment-specific overrides
    pub fn load() -> Result<Config, ::config::ConfigError> {
        let env = std::env::var("WARDFLOW_ENV").unwrap_or_else(|_| "development".into());

        let settings = ::config::Config::builder()
            // Start with default settings
            .add_source(::config::File::with_name("config/default"))
            // Override with environment-specific settings
            .add_source(::config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables
            .add_source(::config::Environment::with_prefix("WARDFLOW").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
