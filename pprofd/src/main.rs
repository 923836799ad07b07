//! # pprofd - Main Entry Point
//!
//! Runs the debug server next to a synthetic workload until Ctrl+C, the
//! `--duration` limit, or a listener failure.

mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use std::time::Duration;

use pprofd::cli::Args;
use pprofd::domain::ServerError;
use pprofd::sampler::{ExecutionTracer, SamplerGateway};
use pprofd::server::DebugServer;
use workload::Workload;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ServerError>() {
        Some(ServerError::InvalidAddress(_) | ServerError::Tls { .. }) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

/// env_logger behind the execution tracer, so `/trace` sees every record
fn init_logging(quiet: bool) -> Result<()> {
    let default_level = if quiet { "warn" } else { "info" };
    let logger = env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).build();
    ExecutionTracer::install(logger).context("Failed to install logger")
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.quiet)?;

    let mut builder = DebugServer::builder()
        .addr(&args.addr)
        .sampler(SamplerGateway::process(args.frequency));
    if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
        builder = builder.tls(cert, key);
    }
    let server = builder.build();

    if !args.quiet {
        println!("pprofd v{}", env!("CARGO_PKG_VERSION"));
        println!("listen: {}", server.addr());
        println!("CPU sampling: {} Hz", args.frequency);
        println!("workers: {}", args.workers);
    }

    let workload = Workload::spawn(args.workers)?;

    let duration_limit = async {
        if args.duration > 0 {
            tokio::time::sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    let result = tokio::select! {
        result = server.serve() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
        () = duration_limit => {
            info!("Duration limit reached");
            Ok(())
        }
    };

    workload.stop();
    result
}
