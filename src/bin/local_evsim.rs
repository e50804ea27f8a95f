use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rust_evsim::simulation::adapter::loopback::LoopbackSimulation;
use rust_evsim::simulation::config::{CommandLineArgs, SimpleConfig};
use rust_evsim::simulation::controller::RunController;
use rust_evsim::simulation::error::EngineError;
use rust_evsim::simulation::logging;
use rust_evsim::simulation::scenario::Scenario;
use tracing::{error, info};

fn main() -> ExitCode {
    let _guard = logging::init_std_out_logging_thread_local();
    let args = CommandLineArgs::parse();
    info!("Started with args: {args:?}");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error_chain(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: CommandLineArgs) -> Result<(), EngineError> {
    let config = SimpleConfig::from_args(&args)?;

    // move logging into the output directory when one is configured
    let _file_guards = match &config.modules.output {
        Some(output) => {
            let dir = config.resolve(output);
            std::fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
            Some(logging::init_logging(&dir))
        }
        None => None,
    };

    let scenario = Scenario::load(Arc::new(config))?;

    // mirror the original orchestrator: without a configured goal, head for the
    // last loaded junction
    let goal = match scenario.config.modules.run.goal_node.clone() {
        Some(goal) => goal,
        None => {
            let fallback = scenario
                .network
                .nodes()
                .last()
                .map(|node| node.id.clone())
                .ok_or(EngineError::EmptyNetwork)?;
            info!("No goal configured, falling back to {fallback}");
            fallback
        }
    };
    if scenario.network.node_index(&goal).is_none() {
        return Err(EngineError::UnknownNode(goal));
    }

    let adapter = LoopbackSimulation::new(
        scenario.network.clone(),
        scenario.config.modules.run.step_length,
    );
    let mut controller = RunController::from_scenario(adapter, &scenario);
    controller.set_goal(goal);
    controller.run();
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
