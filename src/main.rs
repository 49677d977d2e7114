mod cli;

use asc_cli::{AscError, CallContext};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, run_cli};

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("asc_cli=debug,asc=debug")
    } else {
        EnvFilter::try_from_env("ASC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<AscError>()
        .map(AscError::exit_code)
        .unwrap_or(1)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let interrupt = CancellationToken::new();
    let ctx = CallContext::with_cancellation(interrupt.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    if let Err(err) = run_cli(cli, &ctx).await {
        eprintln!("Error: {err}");
        if let Some(asc) = err.downcast_ref::<AscError>() {
            for api_error in asc.api_errors() {
                eprintln!("  {api_error}");
            }
        }
        std::process::exit(exit_code(&err));
    }
}
