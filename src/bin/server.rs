//! Umbra Relay Server
//!
//! A Shadowsocks-style encrypted TCP relay that:
//! - Accepts encrypted client connections on one or more bind addresses
//! - Decrypts the request header naming a destination host and port
//! - Connects to the destination and relays traffic in both directions,
//!   encrypting toward the client and decrypting toward the destination

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use umbra_relay::config::Config;
use umbra_relay::crypto::{CipherConfig, Method};
use umbra_relay::relay::{RelayListener, RelayState};
use umbra_relay::DEFAULT_TIMEOUT;

/// Umbra Relay Server - Shadowsocks-style encrypted TCP relay
#[derive(Parser, Debug)]
#[command(name = "umbra-server")]
#[command(about = "Umbra Relay Server - Shadowsocks-style encrypted TCP relay")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Bind host (repeat for multiple interfaces)
    #[arg(short = 's', long = "server")]
    hosts: Vec<String>,

    /// Listen port shared by all bind hosts
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared password
    #[arg(short = 'k', long)]
    password: Option<String>,

    /// Cipher method (table, rc4, plain)
    #[arg(short, long)]
    method: Option<String>,

    /// Upstream connect timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// PID file path
    #[arg(short = 'f', long)]
    pid_file: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration; command-line flags override file values
    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    let file = config.server.clone().unwrap_or_default();

    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(level.as_str());
    if config.logging.format == "compact" {
        subscriber.compact().init();
    } else {
        subscriber.init();
    }

    let hosts = if args.hosts.is_empty() {
        file.hosts
    } else {
        args.hosts
    };
    let port = args
        .port
        .or(file.port)
        .ok_or_else(|| anyhow!("No listen port configured (use -p or the config file)"))?;
    let password = args
        .password
        .or(file.password)
        .ok_or_else(|| anyhow!("No password configured (use -k or the config file)"))?;
    let method = match args.method.or(file.method) {
        Some(name) => name
            .parse::<Method>()
            .context("Invalid cipher method")?,
        None => Method::default(),
    };
    let timeout = args.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT);

    if hosts.is_empty() {
        return Err(anyhow!("No bind host configured (use -s or the config file)"));
    }

    if let Some(path) = args.pid_file.or(file.pid_file) {
        std::fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write PID file {path}"))?;
        debug!("wrote PID file {path}");
    }

    info!("Umbra Relay Server v{}", umbra_relay::VERSION);

    let cipher =
        CipherConfig::new(&password, method).context("Invalid cipher configuration")?;
    info!("cipher method: {}", cipher.method());

    let state = Arc::new(RelayState::new(cipher, Duration::from_secs(timeout)));

    // Bind every listener up front; a failed bind or listen is fatal
    let mut listeners = Vec::with_capacity(hosts.len());
    for host in &hosts {
        let listener = RelayListener::bind(host, port, Arc::clone(&state))
            .await
            .with_context(|| format!("Failed to bind {host}:{port}"))?;
        listeners.push(listener);
    }

    for listener in listeners {
        tokio::spawn(listener.run());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    Ok(())
}
