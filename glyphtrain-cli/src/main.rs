//! glyphtrain CLI: terminal front end for the training supervisor.
//!
//! Plays the role of the UI: it captures a training request, toggles
//! training, forwards Ctrl-C as a cancel, and renders the reporting view.

mod commands;
mod demo;
mod store;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// glyphtrain: train OCR character-recognition networks
#[derive(Parser, Debug)]
#[command(name = "glyphtrain", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train the demonstration network on a set of fonts and characters
    Train(TrainArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Fonts to train on (comma separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    fonts: Vec<String>,

    /// Characters to recognize; repeats are ignored
    #[arg(short, long)]
    characters: String,

    /// Stop with "completed" after this many iterations
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Evaluate on this many held-out glyphs per character after training
    #[arg(long)]
    evaluate: Option<usize>,

    /// Save the trained model to this path
    #[arg(long)]
    save: Option<PathBuf>,

    /// Seed for the demonstration glyph generator
    #[arg(long, default_value = "7")]
    seed: u64,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file to the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "glyphtrain", "glyphtrain")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "glyphtrain.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
