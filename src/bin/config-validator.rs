//! # Resolver Configuration Validator
//!
//! Command-line tool for validating interface resolver configuration files
//! before deploying them to a collector.

use clap::{Parser, Subcommand};
use ifmeta_core::config::{ConfigManager, ResolverConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate interface resolver configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); environment only when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration and print a summary
    Validate,

    /// Print the effective configuration with communities masked
    Show,

    /// Print the built-in defaults
    Defaults,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Defaults) => defaults(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("❌ {e}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<Arc<ConfigManager>> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::load_from_file(path)?,
        None => ConfigManager::load_from_env()?,
    };
    Ok(manager)
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    println!("🔧 Validating Interface Resolver Configuration");
    match manager.source() {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: defaults + environment"),
    }
    println!();

    print_cache_summary(config);
    print_poller_summary(config);
    print_breaker_summary(config);

    println!("\n🎉 Configuration is valid");
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

fn defaults(_cli: &Cli) -> anyhow::Result<()> {
    let manager = ConfigManager::from_config(ResolverConfig::default())?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

fn print_cache_summary(config: &ResolverConfig) {
    println!("🗄️  Cache");
    println!("   ✅ Duration: {:?}", config.cache_duration);
    if config.refresh_enabled() {
        println!("   ✅ Refresh after: {:?}", config.cache_refresh);
    } else {
        println!("   ℹ️  Background refresh disabled");
    }
    println!("   ✅ Check interval: {:?}", config.cache_check_interval);
    match config.persist_file() {
        Some(path) => println!("   ✅ Snapshot file: {}", path.display()),
        None => println!("   ℹ️  Persistence disabled"),
    }
}

fn print_poller_summary(config: &ResolverConfig) {
    println!("📡 Poller");
    println!("   ✅ Workers: {}", config.workers);
    if config.coalescing_enabled() {
        println!("   ✅ Coalescing window: {:?}", config.poller_coalesce);
    } else {
        println!("   ℹ️  Coalescing disabled");
    }
    println!("   ✅ Port: {}", config.poller_port);
    println!("   ✅ Timeout: {:?}", config.poller_timeout);
    println!("   ✅ Queue capacity: {}", config.request_queue_capacity);
    println!(
        "   ✅ Community overrides: {}",
        config.communities.len()
    );
}

fn print_breaker_summary(config: &ResolverConfig) {
    let breaker = &config.breaker;
    println!("⚡ Circuit breakers");
    println!("   ✅ Failure threshold: {}", breaker.failure_threshold);
    println!("   ✅ Cooldown: {:?}", breaker.timeout);
    if breaker.backoff_multiplier > 1.0 {
        println!(
            "   ✅ Backoff: x{} up to {:?}",
            breaker.backoff_multiplier, breaker.max_timeout
        );
    }
}
