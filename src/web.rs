#![cfg(not(tarpaulin_include))]

use insight::{app, config::Config};

/// Main entry point for the web application
///
/// Reads configuration from the environment (see `Config::from_env`),
/// initializes logging, and serves the form until the process is stopped.
///
/// # Logging
/// * Controlled by `RUST_LOG`; defaults to `info`
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    log::info!(
        "loaded {} access codes (admin mode {})",
        config.access.len(),
        if config.access.has_admin() { "enabled" } else { "disabled" }
    );

    app::run(config).await
}
