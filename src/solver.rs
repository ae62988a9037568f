mod greedy;
mod lra;
mod od;
mod reservation;
mod separate;
mod whca;

pub use greedy::Greedy;
pub use lra::Lra;
pub use od::Od;
pub use whca::Whca;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::action::JointAction;
use crate::geometry::{Position, PositionTime};
use crate::predictor::{DiffusionPredictor, Predictor};
use crate::world::{AgentId, World};

/// One on-line planner. Each tick the driver hands it a copy of the world
/// and applies whatever joint action comes back; the planner never touches
/// the caller's world directly.
pub trait Solver {
    fn name(&self) -> &'static str;

    fn get_action(&mut self, w: World, rng: &mut StdRng) -> JointAction;

    fn stat_names(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn stat_values(&self) -> Vec<String> {
        Vec::new()
    }

    /// Planned remainder of the agent's route, for visualisation.
    fn get_path(&self, _agent: AgentId) -> Vec<Position> {
        Vec::new()
    }

    fn get_obstacle_field(&self) -> HashMap<PositionTime, f64> {
        HashMap::new()
    }

    fn set_window(&mut self, _window: u32) {}
}

pub fn solved(w: &World) -> bool {
    w.agents().iter().all(|(pos, agent)| *pos == agent.goal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Greedy,
    Lra,
    Whca,
    Od,
}

impl std::str::FromStr for SolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(SolverKind::Greedy),
            "lra" => Ok(SolverKind::Lra),
            "whca" => Ok(SolverKind::Whca),
            "od" => Ok(SolverKind::Od),
            other => Err(format!("unknown solver '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub window: u32,
    pub rejoin_limit: u32,
    pub obstacle_penalty: u32,
    pub obstacle_threshold: f64,
    pub predictor_horizon: u32,
    pub use_predictor: bool,
}

pub fn make_solver(
    kind: SolverKind,
    options: &SolverOptions,
    should_stop: Arc<AtomicBool>,
) -> Box<dyn Solver> {
    let predictor = || -> Option<Rc<RefCell<dyn Predictor>>> {
        options
            .use_predictor
            .then(|| {
                Rc::new(RefCell::new(DiffusionPredictor::new(
                    options.predictor_horizon,
                ))) as Rc<RefCell<dyn Predictor>>
            })
    };

    match kind {
        SolverKind::Greedy => Box::new(Greedy),
        SolverKind::Lra => Box::new(Lra::new(should_stop)),
        SolverKind::Whca => Box::new(Whca::new(
            options.window,
            options.rejoin_limit,
            predictor(),
            options.obstacle_penalty,
            options.obstacle_threshold,
            should_stop,
        )),
        SolverKind::Od => Box::new(Od::new(
            options.window,
            predictor(),
            options.obstacle_penalty,
            options.obstacle_threshold,
            should_stop,
        )),
    }
}
