// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IOTOWN MQTT Bridge CLI
//!
//! Forwards ChirpStack uplinks and gateway statistics to IOTOWN.
//!
//! # Usage
//!
//! ```bash
//! # Environment only
//! IOTOWN_MQTT_HOST=mqtt.iotown.example IOTOWN_MQTT_USERNAME=bridge \
//!     IOTOWN_MQTT_PASSWORD=secret iotown-bridge
//!
//! # Configuration file, with environment overrides on top
//! iotown-bridge --config bridge.toml
//!
//! # Generate / check a configuration file
//! iotown-bridge gen-config --output bridge.toml
//! iotown-bridge validate --config bridge.toml
//! ```

use clap::{Parser, Subcommand};
use iotown_bridge::{Bridge, BridgeConfig, BridgeState, BrokerConfig, ConfigError, StatsSnapshot};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// ChirpStack to IOTOWN MQTT Bridge
#[derive(Parser, Debug)]
#[command(name = "iotown-bridge")]
#[command(about = "ChirpStack to IOTOWN MQTT Bridge - uplink and gateway stats forwarding")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ChirpStack broker host
    #[arg(long, env = "CHIRPSTACK_MQTT_HOST")]
    chirpstack_host: Option<String>,

    /// ChirpStack broker port
    #[arg(long, env = "CHIRPSTACK_MQTT_PORT")]
    chirpstack_port: Option<u16>,

    /// ChirpStack username
    #[arg(long, env = "CHIRPSTACK_MQTT_USERNAME")]
    chirpstack_username: Option<String>,

    /// ChirpStack password
    #[arg(long, env = "CHIRPSTACK_MQTT_PASSWORD", hide_env_values = true)]
    chirpstack_password: Option<String>,

    /// IOTOWN broker host
    #[arg(long, env = "IOTOWN_MQTT_HOST")]
    iotown_host: Option<String>,

    /// IOTOWN broker port
    #[arg(long, env = "IOTOWN_MQTT_PORT")]
    iotown_port: Option<u16>,

    /// IOTOWN username
    #[arg(long, env = "IOTOWN_MQTT_USERNAME")]
    iotown_username: Option<String>,

    /// IOTOWN password
    #[arg(long, env = "IOTOWN_MQTT_PASSWORD", hide_env_values = true)]
    iotown_password: Option<String>,

    /// Verify the IOTOWN certificate ("false" disables verification)
    #[arg(long, env = "IOTOWN_MQTT_REJECT_UNAUTHORIZED")]
    iotown_reject_unauthorized: Option<String>,

    /// Application to group mapping as JSON, e.g. '{"app-42":"siteA"}'
    #[arg(long, env = "APP_GROUP_MAPPING")]
    app_group_mapping: Option<String>,

    /// Group for applications without a mapping
    #[arg(long, env = "DEFAULT_GROUP_ID")]
    default_group_id: Option<String>,

    /// Gateway to group mapping as JSON
    #[arg(long, env = "GATEWAY_GROUP_MAPPING")]
    gateway_group_mapping: Option<String>,

    /// Group for gateways without a mapping
    #[arg(long, env = "DEFAULT_GATEWAY_GROUP_ID")]
    default_gateway_group_id: Option<String>,

    /// MQTT client ID prefix
    #[arg(long, env = "CLIENT_ID_PREFIX")]
    client_id_prefix: Option<String>,

    /// Reconnect interval (milliseconds)
    #[arg(long, env = "RECONNECT_INTERVAL")]
    reconnect_interval: Option<u64>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        init_logging("info");
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    init_logging(&config.log_level);

    let mut bridge = Bridge::new(config)?;
    let config = bridge.config();

    println!("IOTOWN MQTT Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!("ChirpStack: {}", config.source.url());
    println!("IOTOWN:     {}", config.destination.url());
    println!(
        "Mappings:   {} application(s), {} gateway(s)",
        config.application_groups().len(),
        config.gateway_groups().len()
    );
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    // Stats reporting task
    let stats_interval = config.stats_interval_secs;
    let handle = bridge.handle();
    if stats_interval > 0 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                match handle.state() {
                    BridgeState::Running => print_stats(&handle.stats()),
                    BridgeState::Starting => {}
                    BridgeState::Stopping | BridgeState::Stopped => break,
                }
            }
        });
    }

    let stats = bridge.run_until(shutdown_signal()).await?;

    println!("\nFinal Statistics:");
    print_stats(&stats);

    Ok(())
}

fn init_logging(level: &str) {
    let filter = log_filter(level).unwrap_or_else(|e| {
        eprintln!("Warning: invalid log level {:?} ({}), using \"info\"", level, e);
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Accepts a bare level (`debug`) or full filter directives (`info,rumqttc=warn`).
fn log_filter(level: &str) -> Result<EnvFilter, String> {
    if !level.contains(['=', ',']) {
        level
            .parse::<LevelFilter>()
            .map_err(|_| "expected trace, debug, info, warn, error or off".to_string())?;
    }
    EnvFilter::try_new(level).map_err(|e| e.to_string())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

/// File configuration (or defaults) with command line and environment on top.
fn build_config(args: &Args) -> Result<BridgeConfig, ConfigError> {
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };

    let source = &mut config.source;
    if let Some(ref host) = args.chirpstack_host {
        source.host = host.clone();
    }
    if let Some(port) = args.chirpstack_port {
        source.port = port;
    }
    if let Some(ref username) = args.chirpstack_username {
        source.username = Some(username.clone());
    }
    if let Some(ref password) = args.chirpstack_password {
        source.password = Some(password.clone());
    }

    let destination = &mut config.destination;
    if let Some(ref host) = args.iotown_host {
        destination.host = host.clone();
    }
    if let Some(port) = args.iotown_port {
        destination.port = port;
    }
    if let Some(ref username) = args.iotown_username {
        destination.username = Some(username.clone());
    }
    if let Some(ref password) = args.iotown_password {
        destination.password = Some(password.clone());
    }
    if let Some(ref verify) = args.iotown_reject_unauthorized {
        destination.reject_unauthorized = verify != "false";
    }

    if let Some(ref json) = args.app_group_mapping {
        config.mapping.applications.set_from_json(json)?;
    }
    if let Some(ref group) = args.default_group_id {
        config.mapping.applications.default_group = group.clone();
    }
    if let Some(ref json) = args.gateway_group_mapping {
        config.mapping.gateways.set_from_json(json)?;
    }
    if let Some(ref group) = args.default_gateway_group_id {
        config.mapping.gateways.default_group = group.clone();
    }

    if let Some(ref prefix) = args.client_id_prefix {
        config.client_id_prefix = prefix.clone();
    }
    if let Some(interval) = args.reconnect_interval {
        config.reconnect_interval_ms = interval;
    }
    if let Some(interval) = args.stats_interval {
        config.stats_interval_secs = interval;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = BridgeConfig {
        name: "example-bridge".into(),
        destination: BrokerConfig::iotown().with_auth("bridge", "change-me"),
        ..BridgeConfig::default()
    };
    config.destination.host = "mqtt.iotown.example".into();
    config.mapping.applications = config
        .mapping
        .applications
        .with("chirpstack-app-id", "iotown-group-id");
    config.mapping.gateways = config.mapping.gateways.with("0016c001f153a14c", "site-a");

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# IOTOWN MQTT Bridge Configuration
# Generated by iotown-bridge gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let result = BridgeConfig::from_file(&config_path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge:      {}", config.name);
            println!("ChirpStack:  {}", config.source.url());
            println!("IOTOWN:      {}", config.destination.url());
            println!("Subscribe:   {}", config.subscribe_topics.join(", "));
            println!(
                "Groups:      {} application(s) (default {}), {} gateway(s) (default {})",
                config.mapping.applications.len(),
                config.mapping.applications.default_group,
                config.mapping.gateways.len(),
                config.mapping.gateways.default_group
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &StatsSnapshot) {
    println!("--- Bridge Statistics ---");
    println!(
        "  {} msgs ({:.1} msg/s), {}, {} queued, {} dropped, {} decode errors, {} publish errors",
        stats.messages_routed,
        stats.messages_per_second(),
        format_bytes(stats.bytes_routed),
        stats.messages_queued,
        stats.messages_dropped,
        stats.decode_failures,
        stats.publish_failures
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
