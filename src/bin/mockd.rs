//! CLI entry point: `mockd --host <HOST> --port <PORT> [--verbose]`.

use std::path::PathBuf;
use std::process::ExitCode;

use carvera_mock_server::{run, ServerConfig};
use clap::Parser;

/// Mock Carvera-family CNC controller: a TCP server emulating the
/// wire-level command protocol of the real hardware.
#[derive(Debug, Parser)]
#[command(name = "mockd", version)]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 2222)]
    port: u16,

    /// Emit DEBUG-level trace logs (including instant-command traffic
    /// the catalog marks `debug_output_only`).
    #[arg(long)]
    verbose: bool,

    /// Path to an alternate command catalog (JSON). Defaults to the
    /// catalog baked into the binary.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Path to an alternate virtual-filesystem seed layout (JSON).
    /// Defaults to the canonical layout baked into the binary.
    #[arg(long = "vfs-seed")]
    vfs_seed: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        verbose: cli.verbose,
        catalog_path: cli.catalog,
        vfs_seed_path: cli.vfs_seed,
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mockd: {err}");
            ExitCode::FAILURE
        }
    }
}
