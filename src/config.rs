use anyhow::bail;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::solver::SolverKind;

#[derive(Parser, Debug)]
#[command(
    name = "omapf",
    about = "Cooperative multi-agent path-finding with dynamic obstacles.",
    version
)]
pub struct Cli {
    #[arg(long, short, help = "Path to the YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the world JSON file")]
    pub world: Option<String>,

    #[arg(long, help = "Solver to run: greedy, lra, whca, od")]
    pub solver: Option<SolverKind>,

    #[arg(long, help = "Lookahead window, in ticks")]
    pub window: Option<u32>,

    #[arg(long, help = "RNG seed")]
    pub seed: Option<u64>,

    #[arg(long, help = "Tick budget before giving up")]
    pub ticks: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub world: String,
    pub solver: SolverKind,
    pub window: u32,
    pub rejoin_limit: u32,
    pub obstacle_penalty: u32,
    pub obstacle_threshold: f64,
    pub predictor_horizon: u32,
    pub use_predictor: bool,
    pub seed: u64,
    pub max_ticks: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            world: "worlds/test.json".to_string(),
            solver: SolverKind::Whca,
            window: 10,
            rejoin_limit: 5,
            obstacle_penalty: 100,
            obstacle_threshold: 0.5,
            predictor_horizon: 5,
            use_predictor: true,
            seed: 42,
            max_ticks: 1000,
        }
    }
}

impl Config {
    pub fn from_yaml_str(config_str: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config_str)?;
        config.validate()
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(world) = &cli.world {
            self.world = world.clone();
        }
        if let Some(solver) = cli.solver {
            self.solver = solver;
        }
        if let Some(window) = cli.window {
            self.window = window;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(ticks) = cli.ticks {
            self.max_ticks = ticks;
        }
        self.validate()
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&self.obstacle_threshold) {
            bail!("obstacle_threshold must be in [0, 1]");
        }
        if self.solver == SolverKind::Whca && self.window == 0 {
            bail!("whca needs a window of at least 1");
        }
        Ok(self)
    }
}
