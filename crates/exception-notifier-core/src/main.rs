//! Exception Notifier CLI
//!
//! Inspect configuration and exercise notification channels.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use exception_notifier::cache::RedisCache;
use exception_notifier::config::LoggingConfig;
use exception_notifier::filters::throttle_key;
use exception_notifier::models::{ExceptionInfo, RequestContext};
use exception_notifier::{Config, ExceptionNotifier};

/// Exception Notifier - error notifications without the noise
#[derive(Parser)]
#[command(name = "exception-notifier")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "EXCEPTION_NOTIFIER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate configuration, then print the effective options
    CheckConfig,

    /// Print the throttle cache key for an error message
    Fingerprint {
        /// Error message as it would be rendered
        message: String,
    },

    /// Send a synthetic error through every configured channel
    Test {
        /// Type identifier of the synthetic error
        #[arg(long, default_value = "TestException")]
        type_name: String,

        /// Message of the synthetic error
        #[arg(long, default_value = "This is a test notification from exception-notifier")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; the guard flushes file output on drop
    let _guard = init_logging(&config.logging, cli.verbose);

    // Execute command
    let result = match cli.command {
        Commands::CheckConfig => run_check_config(&config, cli.format).await,
        Commands::Fingerprint { message } => {
            println!("{}", throttle_key(&message));
            Ok(())
        }
        Commands::Test { type_name, message } => {
            run_test(&config, &type_name, &message, cli.format).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "exception-notifier.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    guard
}

async fn run_check_config(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let notifier = ExceptionNotifier::from_config(config)?;

    if let Some(redis) = &config.redis {
        RedisCache::new(redis)?.health_check().await?;
        info!("Redis throttle cache reachable");
    }

    if format == OutputFormat::Json {
        let summary = serde_json::json!({
            "options": notifier.defaults(),
            "channels": notifier.channel_names(),
            "throttle_cache": config.redis.as_ref().map(|_| "redis"),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Configuration OK");
    println!();
    println!("{}", serde_json::to_string_pretty(notifier.defaults())?);
    println!();
    let channels = notifier.channel_names();
    if channels.is_empty() {
        println!("Channels: none configured");
    } else {
        println!("Channels: {}", channels.join(", "));
    }
    if config.redis.is_some() {
        println!("Throttle cache: redis");
    }

    Ok(())
}

async fn run_test(
    config: &Config,
    type_name: &str,
    message: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let notifier = ExceptionNotifier::from_config(config)?;
    if notifier.channel_names().is_empty() {
        anyhow::bail!("no notification channels configured");
    }

    let exception = ExceptionInfo::new(type_name, message);
    let report = notifier
        .send_unfiltered(&exception, &RequestContext::new())
        .await;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &report.results {
            match &result.error {
                None => println!("✓ {}", result.channel),
                Some(e) => println!("✗ {}: {e}", result.channel),
            }
        }
    }

    if !report.all_succeeded() {
        anyhow::bail!(
            "{} of {} channels failed",
            report.failures().count(),
            report.results.len()
        );
    }

    Ok(())
}
