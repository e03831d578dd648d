//! Stitch CLI entry point.

use clap::Parser;
use miette::Result;
use stitch_cli::{cli, commands, error, logger};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);

    // Ctrl-C tears down the shared engine and fails whatever is in flight.
    let root = CancellationToken::new();
    let on_signal = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, canceling");
            on_signal.cancel();
        }
    });

    let result = match args.command {
        cli::Command::Bundle(bundle_args) => commands::bundle_execute(bundle_args, root).await,
        cli::Command::Check(check_args) => commands::check_execute(check_args).await,
    };

    result.map_err(error::cli_error_to_miette)
}
