use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::{debug, instrument};

use super::reservation::ReservationTable;
use super::separate::{PathCache, SeparatePathsSolver, SEPARATE_STAT_NAMES};
use super::Solver;
use crate::action::JointAction;
use crate::algorithm::{Cost, HeuristicSearch, Search, SearchDomain};
use crate::geometry::{neighbours, translate, Position, PositionTime, Tick, ALL_DIRECTIONS};
use crate::map::{in_bounds, Tile};
use crate::predictor::Predictor;
use crate::world::{Agent, AgentId, World};

/// Windowed hierarchical cooperative A*: per-agent search over
/// `(position, tick)` gated by shared reservation tables, with the reverse
/// search as the distance oracle and the predictor shaping both passability
/// and cost. An agent whose cached path breaks first tries to stitch a short
/// detour back onto it before replanning inside the window.
pub struct Whca {
    cache: PathCache,
    reservations: ReservationTable<AgentId>,
    heuristics: HashMap<AgentId, HeuristicSearch>,
    predictor: Option<Rc<RefCell<dyn Predictor>>>,
    window: Cost,
    rejoin_limit: Cost,
    obstacle_penalty: u32,
    obstacle_threshold: f64,
    should_stop: Arc<AtomicBool>,
    nodes_primary: usize,
    nodes_heuristic: usize,
    nodes_rejoin: usize,
    rejoin_attempts: u32,
    rejoin_successes: u32,
}

/// Space-time domain of one agent's search. States are positions; the
/// coordinate carries the arrival tick, and a stay step lets the agent wait
/// out reserved or predicted-blocked cells.
struct WhcaDomain<'a> {
    start: Position,
    tick: Tick,
    owner: AgentId,
    /// `None` turns the heuristic off (uniform-cost), used by the bounded
    /// rejoin search which has many targets rather than one goal.
    heuristic: Option<&'a mut HeuristicSearch>,
    reservations: &'a ReservationTable<AgentId>,
    predictor: Option<Rc<RefCell<dyn Predictor>>>,
    penalty: u32,
    threshold: f64,
}

impl SearchDomain for WhcaDomain<'_> {
    type State = Position;
    type Coord = PositionTime;

    fn successors(&mut self, state: &Position, w: &World) -> Vec<Position> {
        let mut result: Vec<Position> = ALL_DIRECTIONS
            .iter()
            .map(|&d| translate(*state, d))
            .filter(|&p| in_bounds(p, w.map()) && w.map().get(p) != Tile::Wall)
            .collect();
        result.push(*state);
        result
    }

    fn passable(&mut self, state: &Position, from: &Position, w: &World, distance: Cost) -> bool {
        let time = self.tick + distance;

        if !self.reservations.passable(self.owner, *state, *from, time) {
            return false;
        }

        if let Some(predictor) = &self.predictor {
            let predicted = predictor
                .borrow()
                .predict_obstacle(PositionTime::new(*state, time));
            if predicted > self.threshold {
                return false;
            }
        }

        // An agent standing on a cell that reads non-free (its own cell, or
        // an obstacle it shares a cell with) may still leave it; only the
        // immediate neighbourhood of the start is held to the live world.
        w.get(*state) == Tile::Free || !neighbours(*state, self.start)
    }

    fn heuristic(&mut self, state: &Position, w: &World, g: Cost) -> Option<Cost> {
        let mut h = match &mut self.heuristic {
            Some(oracle) => oracle.find_distance(*state, w)?,
            None => 0,
        };
        if let Some(predictor) = &self.predictor {
            let predicted = predictor
                .borrow()
                .predict_obstacle(PositionTime::new(*state, self.tick + g));
            h += (self.penalty as f64 * predicted) as Cost;
        }
        Some(h)
    }

    fn coordinate(&self, state: &Position, g: Cost) -> PositionTime {
        PositionTime::new(*state, self.tick + g)
    }
}

impl Whca {
    pub fn new(
        window: Cost,
        rejoin_limit: Cost,
        predictor: Option<Rc<RefCell<dyn Predictor>>>,
        obstacle_penalty: u32,
        obstacle_threshold: f64,
        should_stop: Arc<AtomicBool>,
    ) -> Self {
        Whca {
            cache: PathCache::default(),
            reservations: ReservationTable::new(),
            heuristics: HashMap::new(),
            predictor,
            window,
            rejoin_limit,
            obstacle_penalty,
            obstacle_threshold,
            should_stop,
            nodes_primary: 0,
            nodes_heuristic: 0,
            nodes_rejoin: 0,
            rejoin_attempts: 0,
            rejoin_successes: 0,
        }
    }

    fn try_rejoin(
        &mut self,
        agent: &Agent,
        from: Position,
        old: &[Position],
        w: &World,
    ) -> Option<Vec<Position>> {
        let targets: HashSet<Position> = old
            .iter()
            .copied()
            .filter(|&p| w.get(p) == Tile::Free)
            .collect();
        if targets.is_empty() {
            return None;
        }

        self.rejoin_attempts += 1;

        let domain = WhcaDomain {
            start: from,
            tick: w.tick(),
            owner: agent.id(),
            heuristic: None,
            reservations: &self.reservations,
            predictor: self.predictor.clone(),
            penalty: self.obstacle_penalty,
            threshold: self.obstacle_threshold,
        };
        let mut search = Search::new(domain, from, None, self.should_stop.clone());
        let mut detour = search.find_path_to(w, |p| targets.contains(p), self.rejoin_limit);
        self.nodes_rejoin += search.nodes_expanded();
        self.cache.nodes += search.nodes_expanded();

        if detour.is_empty() {
            return None;
        }

        // Splice: the old path up to (excluding) the step into the rejoin
        // cell, then the detour, which already ends on that cell. The cells
        // on both sides of the seam stay adjacent.
        let rejoin_cell = detour[0];
        let idx = old.iter().position(|&c| c == rejoin_cell)?;
        detour.pop(); // drop the search start; cached paths exclude it
        let mut spliced = old[..idx].to_vec();
        spliced.extend(detour);

        self.rejoin_successes += 1;
        debug!(
            agent = agent.id(),
            reused = idx,
            total = spliced.len(),
            "rejoined previous path"
        );
        Some(spliced)
    }

    fn reserve_path(&mut self, owner: AgentId, from: Position, path: &[Position], w: &World) {
        if path.is_empty() {
            // Going nowhere still parks the agent where it stands.
            self.reservations.reserve_permanent(owner, from, w.tick());
            return;
        }

        let mut prev = from;
        for (i, &cell) in path.iter().rev().enumerate() {
            let time = w.tick() + i as Tick + 1;
            self.reservations
                .reserve(owner, PositionTime::new(cell, time), Some(prev));
            prev = cell;
        }
        self.reservations
            .reserve_permanent(owner, path[0], w.tick() + path.len() as Tick);
    }
}

impl SeparatePathsSolver for Whca {
    fn cache(&mut self) -> &mut PathCache {
        &mut self.cache
    }

    fn begin_tick(&mut self, w: &World) {
        if let Some(predictor) = &self.predictor {
            predictor.borrow_mut().update_obstacles(w);
        }
    }

    #[instrument(skip_all, name = "whca_find_path", fields(from = %from), level = "debug")]
    fn find_path(
        &mut self,
        from: Position,
        w: &World,
        _rng: &mut StdRng,
        old: Option<&[Position]>,
    ) -> Vec<Position> {
        let Some(agent) = w.get_agent(from).copied() else {
            return Vec::new();
        };

        self.reservations.unreserve(agent.id());

        if self.rejoin_limit > 0 {
            if let Some(old) = old.filter(|o| !o.is_empty()) {
                if let Some(path) = self.try_rejoin(&agent, from, old, w) {
                    self.reserve_path(agent.id(), from, &path, w);
                    return path;
                }
            }
        }

        let stop = self.should_stop.clone();
        self.heuristics
            .entry(agent.id())
            .or_insert_with(|| HeuristicSearch::new(agent.goal, from, stop, None));
        let old_heuristic_nodes = self.heuristics[&agent.id()].nodes_expanded();

        let mut path = {
            let oracle = self.heuristics.get_mut(&agent.id()).unwrap();
            let domain = WhcaDomain {
                start: from,
                tick: w.tick(),
                owner: agent.id(),
                heuristic: Some(oracle),
                reservations: &self.reservations,
                predictor: self.predictor.clone(),
                penalty: self.obstacle_penalty,
                threshold: self.obstacle_threshold,
            };
            let mut search = Search::new(domain, from, Some(agent.goal), self.should_stop.clone());
            let path = search.find_path_window(w, self.window);
            self.nodes_primary += search.nodes_expanded();
            self.cache.nodes += search.nodes_expanded();
            path
        };

        let heuristic_nodes =
            self.heuristics[&agent.id()].nodes_expanded() - old_heuristic_nodes;
        self.nodes_heuristic += heuristic_nodes;
        self.cache.nodes += heuristic_nodes;

        path.pop(); // cached paths exclude the current cell
        self.reserve_path(agent.id(), from, &path, w);
        path
    }
}

impl Solver for Whca {
    fn name(&self) -> &'static str {
        "WHCA*"
    }

    fn get_action(&mut self, w: World, rng: &mut StdRng) -> JointAction {
        self.get_action_separately(w, rng)
    }

    fn stat_names(&self) -> Vec<&'static str> {
        let mut names = SEPARATE_STAT_NAMES.to_vec();
        names.extend([
            "Nodes primary",
            "Nodes heuristic",
            "Nodes rejoin",
            "Rejoin attempts",
            "Rejoin successes",
        ]);
        names
    }

    fn stat_values(&self) -> Vec<String> {
        let mut values = self.cache.stat_values();
        values.extend([
            self.nodes_primary.to_string(),
            self.nodes_heuristic.to_string(),
            self.nodes_rejoin.to_string(),
            self.rejoin_attempts.to_string(),
            self.rejoin_successes.to_string(),
        ]);
        values
    }

    fn get_obstacle_field(&self) -> HashMap<PositionTime, f64> {
        match &self.predictor {
            Some(predictor) => predictor.borrow().field().clone(),
            None => HashMap::new(),
        }
    }

    fn set_window(&mut self, window: u32) {
        self.window = window;
    }
}
