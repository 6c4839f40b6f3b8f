use ancla::config::{Config, ConfigError};
use ancla::core::features::{FeatureToggles, LOAD_BALANCING, QUERY_CACHE};
use ancla::sticking::{Sticking, DEFAULT_KEY_PREFIX};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ancla")]
#[command(about = "Replica-aware read routing with read-your-writes sticking")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the cache key holding an actor's write location
    Key {
        /// Actor namespace, e.g. "user"
        namespace: String,
        /// Actor id
        id: String,
        /// Take the key prefix from this configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Key {
            namespace,
            id,
            config,
        } => print_key(&namespace, &id, config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output)
        .with_context(|| format!("Failed to generate config at {:?}", output))?;

    println!("Configuration file generated successfully!");
    println!("Edit the replica hosts to match your environment and run:");
    println!("  ancla validate --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    let config = match Config::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    };

    init_logging(&config)?;
    tracing::debug!(path = ?config_path, "Configuration loaded");

    let lb = &config.load_balancing;
    println!("✓ Configuration file is valid");
    println!("  Replica hosts: {} instances", lb.hosts.len());
    for (i, host) in lb.hosts.iter().enumerate() {
        println!("    {}: {}", i + 1, host);
    }
    println!("  Max replication lag: {}s", lb.max_replication_lag_time_sec);
    println!("  Max replication difference: {} bytes", lb.max_replication_difference);
    println!(
        "  Replica check interval: {}s to {}s",
        lb.replica_check_interval_sec,
        lb.replica_check_interval_sec * 2
    );
    println!(
        "  Primary retries: {} (first delay {}s)",
        lb.primary_retries, lb.primary_retry_delay_sec
    );
    println!("  Sticking expiration: {}s", config.sticking.expiration_sec);
    println!(
        "  Features: {}={}, {}={}",
        LOAD_BALANCING,
        config.features.enabled(LOAD_BALANCING),
        QUERY_CACHE,
        config.features.enabled(QUERY_CACHE)
    );

    if lb.hosts.is_empty() {
        println!("  Note: no replica hosts, every query will use the primary");
    }

    Ok(())
}

fn print_key(namespace: &str, id: &str, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let key_prefix = match config_path {
        Some(path) => {
            Config::load_from_file(&path)
                .with_context(|| format!("Failed to load config from {:?}", path))?
                .sticking
                .key_prefix
        }
        None => DEFAULT_KEY_PREFIX.to_string(),
    };

    println!("{}", Sticking::key_with_prefix(&key_prefix, namespace, id));
    Ok(())
}

fn show_version() {
    println!("ancla v{}", env!("CARGO_PKG_VERSION"));
    println!("Replica-aware read routing with read-your-writes sticking");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Round-robin reads over healthy replicas");
    println!("  • Replication conflict and connection error retries");
    println!("  • Primary fallback with exponential backoff");
    println!("  • Per-actor sticking to the primary after writes");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
