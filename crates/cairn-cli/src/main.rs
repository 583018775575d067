mod commands;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use commands::Command;

/// Deduplicating, encrypted, content-addressed backups
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about, long_about = None)]
struct Args {
    /// Path to the repository directory
    #[arg(short, long, env = "CAIRN_REPOSITORY")]
    repo: PathBuf,

    /// Repository password
    #[arg(short, long, env = "CAIRN_PASSWORD", hide_env_values = true)]
    password: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::WARN);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();

    if let Err(err) = commands::run(&args.repo, &args.password, &args.command).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
