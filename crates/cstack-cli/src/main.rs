//! cstack CLI - stack migration entrypoint
//!
//! Wires the import engine and the CSV exporters behind one binary:
//! `cstack import` replays a backup directory into a destination stack,
//! `cstack export` pulls entries, taxonomies, users, or teams into CSV.

mod commands;

use clap::{Parser, Subcommand};
use commands::{ExportCommand, ImportCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CSTACK_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "CSTACK_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a backup directory into a destination stack
    Import(ImportCommand),
    /// Export stack data to CSV files
    Export(ExportCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone();

    // If RUST_LOG is set, use it directly; otherwise use our default filter
    // with all cstack crates at the specified level and noisy dependencies
    // at warn level.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "cstack_cli={level},\
             cstack_core={level},\
             cstack_api={level},\
             cstack_import_types={level},\
             cstack_import={level},\
             cstack_export={level},\
             h2=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn",
            level = log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    match cli.command {
        Commands::Import(import_cmd) => import_cmd.execute(),
        Commands::Export(export_cmd) => export_cmd.execute(),
    }
}
