//! Binary entry point for veil.
//!
//! This binary runs the HTTP proxy and exposes the codec from the terminal.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use veil::config::{LlmConfig, VeilConfig};
use veil::llm::{
    LlmHttpConfig, LlmProvider, LlmResilienceConfig, OpenAiClient, ResilientLlmProvider,
};
use veil::observability::{self, MetricsConfig};
use veil::server::{self, AppState};

/// Veil - A privacy proxy for LLM APIs.
#[derive(Parser)]
#[command(name = "veil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "VEIL_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP proxy.
    Serve {
        /// Address to bind.
        #[arg(long)]
        host: Option<String>,

        /// Port to bind.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Replace sensitive terms in text.
    Encode {
        /// The text to encode.
        text: String,
    },

    /// Restore sensitive terms in text.
    Decode {
        /// The text to decode.
        text: String,
    },

    /// Send one masked query to the upstream model.
    Ask {
        /// The query text.
        text: String,

        /// Model identifier.
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Manage configuration.
    Config {
        /// Show effective configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match VeilConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_logging(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: VeilConfig) -> veil::Result<()> {
    match command {
        Commands::Serve { host, port } => cmd_serve(config, host, port).await,
        Commands::Encode { text } => cmd_encode(&config, &text),
        Commands::Decode { text } => cmd_decode(&config, &text),
        Commands::Ask { text, model } => cmd_ask(&config, &text, model).await,
        Commands::Config { show } => cmd_config(&config, show),
    }
}

fn build_http_config(llm_config: &LlmConfig) -> LlmHttpConfig {
    LlmHttpConfig::from_config(llm_config).with_env_overrides()
}

fn build_resilience_config(llm_config: &LlmConfig) -> LlmResilienceConfig {
    LlmResilienceConfig::from_config(llm_config).with_env_overrides()
}

fn build_openai_client(llm_config: &LlmConfig) -> OpenAiClient {
    let mut client = OpenAiClient::new();
    if let Some(ref api_key) = llm_config.api_key {
        client = client.with_secret_key(api_key.clone());
    }
    if let Some(ref endpoint) = llm_config.endpoint {
        client = client.with_endpoint(endpoint);
    }
    client.with_http_config(build_http_config(llm_config))
}

/// Builds the upstream provider wrapped with retries and a circuit breaker.
fn build_provider(llm_config: &LlmConfig) -> Arc<dyn LlmProvider> {
    let client = build_openai_client(llm_config);
    tracing::debug!(endpoint = client.endpoint(), "Configured upstream provider");
    Arc::new(ResilientLlmProvider::new(
        client,
        build_resilience_config(llm_config),
    ))
}

fn default_model(llm_config: &LlmConfig) -> String {
    llm_config
        .default_model
        .clone()
        .unwrap_or_else(|| OpenAiClient::DEFAULT_MODEL.to_string())
}

/// Serve command.
async fn cmd_serve(
    mut config: VeilConfig,
    host: Option<String>,
    port: Option<u16>,
) -> veil::Result<()> {
    if let Some(host) = host {
        config = config.with_host(host);
    }
    if let Some(port) = port {
        config = config.with_port(port);
    }

    observability::install_prometheus(&MetricsConfig::from_settings(&config.logging))?;

    let codec = Arc::new(config.build_codec()?);
    let state = AppState::new(codec, build_provider(&config.llm));
    server::serve(state, &config.server).await
}

/// Encode command.
fn cmd_encode(config: &VeilConfig, text: &str) -> veil::Result<()> {
    let codec = config.build_codec()?;
    println!("{}", codec.encode(text));
    Ok(())
}

/// Decode command.
fn cmd_decode(config: &VeilConfig, text: &str) -> veil::Result<()> {
    let codec = config.build_codec()?;
    println!("{}", codec.decode(text));
    Ok(())
}

/// Ask command.
async fn cmd_ask(config: &VeilConfig, text: &str, model: Option<String>) -> veil::Result<()> {
    let codec = config.build_codec()?;
    let provider = build_provider(&config.llm);
    let model = model.unwrap_or_else(|| default_model(&config.llm));

    let answer = codec.answer_with_llm(text, provider.as_ref(), &model).await?;
    println!("{answer}");
    Ok(())
}

/// Config command.
fn cmd_config(config: &VeilConfig, show: bool) -> veil::Result<()> {
    if !show {
        println!("Use --show to display configuration");
        return Ok(());
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("Server:");
    println!("  Bind: {}:{}", config.server.host, config.server.port);
    println!(
        "  Allowed Origins: {}",
        config.server.allowed_origins.join(", ")
    );
    println!("  Max Body Bytes: {}", config.server.max_body_bytes);
    println!();
    println!("LLM Configuration:");
    println!(
        "  Endpoint: {}",
        config
            .llm
            .endpoint
            .as_deref()
            .unwrap_or(OpenAiClient::DEFAULT_ENDPOINT)
    );
    println!(
        "  API Key: {}",
        if config.llm.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("  Default Model: {}", default_model(&config.llm));
    let http = build_http_config(&config.llm);
    println!("  Timeout: {}ms", http.timeout_ms);
    println!("  Connect Timeout: {}ms", http.connect_timeout_ms);
    let resilience = build_resilience_config(&config.llm);
    println!("  Max Retries: {}", resilience.max_retries);
    println!();
    println!("Substitution:");
    println!("  Case Mode: {}", config.substitution.case_mode.as_str());
    println!("  Terms: {}", config.substitution.terms.len());
    println!();
    println!("Logging:");
    println!(
        "  Format: {}",
        config.logging.format.as_deref().unwrap_or("pretty")
    );
    println!(
        "  Metrics Port: {}",
        config
            .logging
            .metrics_port
            .map_or_else(|| "(disabled)".to_string(), |p| p.to_string())
    );

    Ok(())
}
