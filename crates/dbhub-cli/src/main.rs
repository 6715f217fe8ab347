//! DBHub Command-Line Client
//!
//! Manage connections, migrations, backups, and transfers from the shell.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod formatter;

use clap::Parser;
use commands::Command;
use dbhub_core::{DbHub, HubConfig};
use formatter::{create_formatter, OutputFormat};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// DBHub Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "dbhub")]
#[command(version, about = "Multi-backend database management")]
pub struct Args {
    /// Directory holding hub state
    #[arg(short = 'd', long)]
    pub data_dir: Option<PathBuf>,

    /// Directory for backup payloads (defaults to <data-dir>/backups)
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Default records per transfer batch
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Timeout for HTTP backends in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    fn into_config(self) -> (HubConfig, OutputFormat, Command) {
        let data_dir = self.data_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("dbhub"))
                .unwrap_or_else(|| PathBuf::from("./dbhub-data"))
        });
        let mut config = HubConfig::new(data_dir)
            .with_batch_size(self.batch_size)
            .with_request_timeout(Duration::from_secs(self.timeout));
        if let Some(backups) = self.backup_dir {
            config = config.with_backup_path(backups);
        }
        (config, self.format, self.command)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = match format!("dbhub={}", args.log_level).parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (config, format, command) = args.into_config();
    let hub = DbHub::open(config)?;
    let formatter = create_formatter(format);

    let output = commands::execute(&hub, command, formatter.as_ref()).await;
    hub.flush()?;

    let output = output?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
