use anyhow::Context;
use clap::Parser;
use faultline::config::Config;
use faultline::error::ConfigError;
use faultline::events::{ErrorCategory, Severity};
use faultline::notifications::default_channels;
use faultline::recovery::LoggingHooks;
use faultline::system::ErrorManagementSystem;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Command-line arguments for the error management service
#[derive(Parser)]
#[command(
    name = "faultline",
    about = "Automated error detection, classification, recovery and notification",
    long_about = "Watches a trading system for failing API calls, invalid data, resource \
                  exhaustion, logic errors and slowdowns, classifies each error, attempts \
                  automated recovery and notifies the right people when it cannot."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Inject one synthetic error after startup
    #[arg(
        long,
        value_name = "CATEGORY",
        value_parser = parse_category,
        help = "Inject a simulated error of this category (api_failure, data_integrity, ...)"
    )]
    fire_drill: Option<ErrorCategory>,

    /// Severity of the fire drill error
    #[arg(
        long,
        value_name = "SEVERITY",
        default_value = "high",
        value_parser = parse_severity,
        requires = "fire_drill"
    )]
    drill_severity: Severity,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if config_path.extension().is_some_and(|ext| ext != "toml") {
                    warn!(
                        "Configuration file does not have .toml extension: {}",
                        config_path.display()
                    );
                }
            }
        }

        Ok(())
    }
}

fn parse_category(value: &str) -> Result<ErrorCategory, String> {
    ErrorCategory::ALL
        .into_iter()
        .find(|category| category.as_str() == value)
        .ok_or_else(|| {
            let known: Vec<&str> = ErrorCategory::ALL.iter().map(|c| c.as_str()).collect();
            format!("unknown category '{}', expected one of: {}", value, known.join(", "))
        })
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    Severity::ALL
        .into_iter()
        .find(|severity| severity.as_str() == value)
        .ok_or_else(|| format!("unknown severity '{}'", value))
}

/// Load configuration, falling back to defaults when the file is missing or invalid
///
/// # Arguments
///
/// * `config_path` - Optional path to configuration file
fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path.display()
                    );
                    Ok(Config::default())
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path.display(), e);
                    warn!("Using default configuration due to invalid config file");
                    Ok(Config::default())
                }
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = load_config(cli.config.as_deref())?;
    let channels = default_channels(
        config.channels.webhook_url.as_deref(),
        Duration::from_secs(config.channels.webhook_timeout_seconds),
    )
    .context("failed to build notification channels")?;

    let mut system = ErrorManagementSystem::new(config, Arc::new(LoggingHooks), channels)
        .context("failed to initialize error management system")?;
    system.start();

    if let Some(category) = cli.fire_drill {
        let event = system.trigger_test_error(category, cli.drill_severity)?;
        info!("Fire drill event {} queued", event.id);
    }

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("failed to install SIGINT handler")?;

    info!("Error management system is running. Press Ctrl+C to stop.");
    // A closed channel means the handler is gone; stop either way
    let _ = shutdown_receiver.recv();

    let status = system.status();
    system.stop();
    info!(
        "Shutdown complete: {} events processed, {} recoveries attempted ({} succeeded), {} notifications accepted",
        status.events_processed,
        status.recoveries_attempted,
        status.recoveries_succeeded,
        status.notifications_accepted
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting faultline");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
