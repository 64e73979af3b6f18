pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use partx_core::error::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Split {
            source,
            out,
            chunk_size,
            columns,
            delimiter,
            sample_rows,
            stamp_created,
            config,
        } => handlers::handle_split(
            source,
            out,
            chunk_size,
            columns,
            delimiter,
            sample_rows,
            stamp_created,
            config,
        ),
        Commands::Merge {
            manifest,
            output,
            verify_only,
            no_parallel,
            threads,
            no_revalidate,
            columns,
            remove_parts,
            config,
        } => handlers::handle_merge(
            manifest,
            output,
            verify_only,
            no_parallel,
            threads,
            no_revalidate,
            columns,
            remove_parts,
            config,
        ),
        Commands::Verify { manifest } => handlers::handle_verify(manifest),
        Commands::Inspect { manifest } => handlers::handle_inspect(manifest),
    };
    if let Err(e) = &result {
        error!(kind = ?e.kind(), "{e}");
    }
    result
}

/// `-v`/`-q` win; otherwise `PARTX_LOG`, then `RUST_LOG`, then `info`.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = if quiet || verbose > 0 {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_env("PARTX_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(level))
    };
    // a second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
