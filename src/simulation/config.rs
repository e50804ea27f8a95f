use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::simulation::error::EngineError;
use crate::simulation::io::resolve_path;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    #[arg(long, short)]
    pub config: String,
    /// Start junction id, overrides the config value
    #[arg(long)]
    pub start_node: Option<String>,
    /// Goal (hospital) junction id, overrides the config value
    #[arg(long)]
    pub goal_node: Option<String>,
    /// Replanning period in simulated seconds
    #[arg(long)]
    pub replan_interval: Option<f64>,
    /// Ambulance spawn period in simulated seconds
    #[arg(long)]
    pub spawn_period: Option<f64>,
    /// Stop the simulation once this simulated time is reached
    #[arg(long)]
    pub max_sim_time: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimpleConfig {
    pub modules: Modules,
    #[serde(skip)]
    context: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Modules {
    pub network: PathBuf,
    pub landmarks: PathBuf,
    #[serde(default)]
    pub fuzzy_model: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub preemption: Preemption,
    #[serde(default)]
    pub run: Run,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Routing {
    pub replan_interval: f64,
    pub max_expansions: usize,
    pub snapshot_depth: usize,
    pub snapshot_max_edges: usize,
}

impl Default for Routing {
    fn default() -> Self {
        Routing {
            replan_interval: 10.0,
            max_expansions: 50,
            snapshot_depth: 2,
            snapshot_max_edges: 200,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Preemption {
    pub keep_green_seconds: f64,
}

impl Default for Preemption {
    fn default() -> Self {
        Preemption {
            keep_green_seconds: 1.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Run {
    pub start_node: Option<String>,
    pub goal_node: Option<String>,
    pub spawn_period: f64,
    pub max_sim_time: Option<f64>,
    pub step_length: f64,
    pub seed: u64,
}

impl Default for Run {
    fn default() -> Self {
        Run {
            start_node: None,
            goal_node: None,
            spawn_period: 60.0,
            max_sim_time: None,
            step_length: 0.1,
            seed: 42,
        }
    }
}

impl SimpleConfig {
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let mut config: SimpleConfig = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|e| EngineError::parse(path, e))?;
        config.context = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_args(args: &CommandLineArgs) -> Result<Self, EngineError> {
        let mut config = Self::from_file(Path::new(&args.config))?;
        config.apply_overrides(args);
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &CommandLineArgs) {
        if args.start_node.is_some() {
            self.modules.run.start_node = args.start_node.clone();
        }
        if args.goal_node.is_some() {
            self.modules.run.goal_node = args.goal_node.clone();
        }
        if let Some(replan_interval) = args.replan_interval {
            self.modules.routing.replan_interval = replan_interval;
        }
        if let Some(spawn_period) = args.spawn_period {
            self.modules.run.spawn_period = spawn_period;
        }
        if args.max_sim_time.is_some() {
            self.modules.run.max_sim_time = args.max_sim_time;
        }
    }

    /// Resolves a configured path against the directory this config was loaded from.
    pub fn resolve(&self, file_path: &Path) -> PathBuf {
        resolve_path(&self.context, file_path)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{CommandLineArgs, SimpleConfig};

    #[test]
    fn minimal_yaml_gets_defaults() {
        let yml = "modules:\n  network: net.xml\n  landmarks: landmarks.json\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yml");
        std::fs::write(&path, yml).unwrap();

        let config = SimpleConfig::from_file(&path).unwrap();
        assert_eq!(10.0, config.modules.routing.replan_interval);
        assert_eq!(50, config.modules.routing.max_expansions);
        assert_eq!(1.5, config.modules.preemption.keep_green_seconds);
        assert_eq!(60.0, config.modules.run.spawn_period);
        assert_eq!(None, config.modules.fuzzy_model);

        // relative paths resolve against the config directory
        assert_eq!(
            dir.path().join("net.xml"),
            config.resolve(Path::new("net.xml"))
        );
        assert_eq!(PathBuf::from("net.xml"), config.modules.network);
    }

    #[test]
    fn cli_overrides_win() {
        let yml = "modules:\n  network: net.xml\n  landmarks: lm.json\n  run:\n    goal_node: hospital\n    spawn_period: 30.0\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yml");
        std::fs::write(&path, yml).unwrap();

        let args = CommandLineArgs {
            config: path.to_string_lossy().to_string(),
            start_node: Some("start".to_string()),
            goal_node: None,
            replan_interval: Some(5.0),
            spawn_period: None,
            max_sim_time: Some(120.0),
        };
        let config = SimpleConfig::from_args(&args).unwrap();

        assert_eq!(Some("start".to_string()), config.modules.run.start_node);
        assert_eq!(Some("hospital".to_string()), config.modules.run.goal_node);
        assert_eq!(5.0, config.modules.routing.replan_interval);
        assert_eq!(30.0, config.modules.run.spawn_period);
        assert_eq!(Some(120.0), config.modules.run.max_sim_time);
    }

    #[test]
    fn missing_config_is_fatal() {
        assert!(SimpleConfig::from_file(Path::new("missing.yml")).is_err());
    }
}
