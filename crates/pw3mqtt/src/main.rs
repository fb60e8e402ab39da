// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Powerwall 3 to MQTT bridge CLI
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! pw3mqtt --config pw3mqtt.toml
//!
//! # Configure through the environment only
//! PW3MQTT_TEDAPI_PASSWORD=... PW3MQTT_MQTT_HOST=broker pw3mqtt run
//!
//! # Generate an example configuration file
//! pw3mqtt gen-config --output pw3mqtt.toml
//!
//! # Check a configuration (file plus environment)
//! pw3mqtt --config pw3mqtt.toml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pw3mqtt::{
    mqtt, Bridge, BridgeConfig, BridgeError, BridgeOptions, MqttPublisher, Origin,
    PollingCoordinator, TeslaSystem, DISCOVERY_SETTLE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tedapi::{
    CachePolicy, CachedQueryService, ClientConfig, GatewayClient, HttpTransport, JsonCodec,
    QueryConfig,
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pw3mqtt")]
#[command(author = "naskel.com")]
#[command(version)]
#[command(about = "Powerwall 3 to MQTT bridge with Home Assistant discovery")]
struct Cli {
    /// Configuration file (TOML, or JSON add-on options)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge (default)
    Run,

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "pw3mqtt.toml")]
        output: PathBuf,
    },

    /// Validate the configuration (file plus environment)
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::GenConfig { output }) => return cmd_gen_config(output),
        Some(Commands::Validate) => return cmd_validate(cli.config),
        Some(Commands::Run) | None => {}
    }

    let config =
        BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    tracing::debug!("Runtime config:");
    for (key, value) in config.redacted() {
        tracing::debug!("config['{}'] = '{}'", key, value);
    }

    if let Err(e) = run(&config) {
        tracing::error!("Exiting: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(config: &BridgeConfig) -> Result<()> {
    let password = config.tedapi_password.clone().unwrap_or_default();
    let transport = HttpTransport::new(&config.tedapi_host, password, config.request_timeout())
        .context("Failed to create gateway transport")?;
    let client = Arc::new(GatewayClient::new(
        transport,
        ClientConfig {
            lock_timeout: config.lock_timeout(),
            cooldown: config.cooldown(),
        },
    ));

    client
        .connect()
        .map_err(|e| BridgeError::Fatal(format!("Unable to connect to Powerwall: {}", e)))?;
    if !client.is_powerwall3() {
        return Err(BridgeError::Fatal("Powerwall appears to be older than Powerwall 3".into()).into());
    }

    let api = CachedQueryService::new(
        client,
        JsonCodec,
        QueryConfig {
            lock_timeout: config.lock_timeout(),
            cache: CachePolicy {
                config_ttl: Duration::from_secs(config.tedapi_config_ttl),
                telemetry_ttl: Duration::from_secs(config.tedapi_cache_ttl),
            },
        },
    );

    let system = TeslaSystem::new(&api, config.tedapi_report_vitals)
        .context("Failed to read the Tesla system")?;
    tracing::info!(
        vin = system.vin(),
        powerwalls = system.children().len(),
        "Powerwall firmware version = {}",
        system.firmware_version()
    );

    let (availability_tx, availability_rx) = crossbeam::channel::unbounded();
    let client_id = mqtt::client_id();
    let publisher = MqttPublisher::connect(config, &client_id, availability_tx)
        .context("Failed to set up MQTT client")?;

    let options = BridgeOptions {
        prefix: config.mqtt_base_topic.clone(),
        will_topic: publisher.will_topic().to_string(),
        origin: Origin::new("pw3mqtt").with_version(env!("CARGO_PKG_VERSION")),
        settle: DISCOVERY_SETTLE,
    };
    let mut bridge = Bridge::new(api, publisher, system, options);

    let coordinator = PollingCoordinator::new(config.poll_interval(), availability_rx);
    let handle = coordinator.handle();
    let stop_handle = handle.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received termination signal, shutting down...");
        stop_handle.stop();
    })
    .context("Failed to install signal handler")?;

    bridge.discover();
    handle.poll_now();
    coordinator.run(&mut bridge)?;

    tracing::info!("Bridge stopped");
    Ok(())
}

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(level)))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Map level names accepted in add-on options onto filter directives.
fn filter_directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let toml_str = toml::to_string_pretty(&BridgeConfig::example())?;

    let content = format!(
        r#"# Powerwall 3 to MQTT bridge configuration
# Generated by pw3mqtt gen-config
#
# Every key can be overridden with a PW3MQTT_<KEY> environment variable.

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: Option<PathBuf>) -> Result<()> {
    match BridgeConfig::load(config_path.as_deref()) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            for (key, value) in config.redacted() {
                println!("  {} = {}", key, value);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
