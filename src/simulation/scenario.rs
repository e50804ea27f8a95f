use std::sync::Arc;

use tracing::info;

use crate::simulation::config::SimpleConfig;
use crate::simulation::error::EngineError;
use crate::simulation::network::Network;
use crate::simulation::preemption::fuzzy::FuzzyModel;
use crate::simulation::routing::landmarks::LandmarkTables;

/// Everything a run needs, loaded once at startup and immutable afterwards.
#[derive(Debug)]
pub struct Scenario {
    pub network: Arc<Network>,
    pub landmarks: Arc<LandmarkTables>,
    pub fuzzy_model: FuzzyModel,
    pub config: Arc<SimpleConfig>,
}

impl Scenario {
    pub fn load(config: Arc<SimpleConfig>) -> Result<Self, EngineError> {
        let network_path = config.resolve(&config.modules.network);
        let network = Arc::new(Network::from_file(&network_path)?);

        let landmarks_path = config.resolve(&config.modules.landmarks);
        let landmarks = Arc::new(LandmarkTables::from_file(&landmarks_path, &network)?);

        // a configured model file must load, an unconfigured model falls back to the
        // built-in rule banks
        let fuzzy_model = match &config.modules.fuzzy_model {
            Some(path) => FuzzyModel::from_file(&config.resolve(path))?,
            None => {
                info!("No fuzzy model configured, using the default rule banks");
                FuzzyModel::default()
            }
        };

        Ok(Scenario {
            network,
            landmarks,
            fuzzy_model,
            config,
        })
    }
}
