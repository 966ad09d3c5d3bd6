//! Quill CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Run one prompt through the generation loop
//! - `config`  — Print the default configuration or the config path
//! - `doctor`  — Check configuration and backend reachability

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use quill_core::agent::ThinkingMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "quill",
    about = "Quill — streaming, tag-driven LLM assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and stream the answer
    Ask {
        /// The prompt to send
        prompt: String,

        /// Model to use (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// Reasoning depth: instant, normal, think or deep
        #[arg(short, long, default_value = "normal")]
        thinking: ThinkingMode,

        /// Attach a file (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Print the full result as JSON instead of streaming text
        #[arg(long)]
        json: bool,
    },

    /// Print configuration
    Config {
        /// Print the config file path instead of the default config
        #[arg(long)]
        path: bool,
    },

    /// Diagnose configuration and backend health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so streamed answers stay clean on stdout
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            prompt,
            model,
            thinking,
            files,
            json,
        } => {
            let args = commands::ask::AskArgs {
                prompt,
                model,
                thinking,
                files,
                json,
            };
            commands::ask::run(args).await?
        }
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path().await?
            } else {
                commands::config_cmd::show().await?
            }
        }
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
