use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rust_evsim::simulation::error::EngineError;
use rust_evsim::simulation::logging::init_std_out_logging_thread_local;
use rust_evsim::simulation::network::Network;
use rust_evsim::simulation::routing::landmarks::LandmarkTables;
use tracing::{error, info};

/// Offline preparation: selects landmarks and computes their shortest-time tables.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology file (.net.xml or .net.xml.gz)
    #[arg(long)]
    net: PathBuf,
    /// Output json file
    #[arg(long)]
    output: PathBuf,
    /// Number of landmarks, 6 to 10 works well for urban networks
    #[arg(long, default_value_t = 8)]
    num_landmarks: usize,
    /// Seed for the reproducible landmark shuffle
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> ExitCode {
    let _guard = init_std_out_logging_thread_local();
    let args = Args::parse();
    info!("Started with args: {args:?}");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error_chain(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), EngineError> {
    let network = Network::from_file(&args.net)?;
    let tables = LandmarkTables::precompute(&network, args.num_landmarks, args.seed)?;
    tables.to_file(&network, &args.output)?;
    info!(
        "Prepared {} landmark tables for {} nodes",
        tables.landmarks().len(),
        network.nodes().len()
    );
    Ok(())
}

fn log_error_chain(e: &EngineError) {
    error!("{e}");
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        error!("caused by: {cause}");
        source = cause.source();
    }
}
