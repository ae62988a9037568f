use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::action::{apply_action, valid, Action, JointAction};
use crate::geometry::{direction_to, neighbours, Position};
use crate::world::World;

/// Remaining path per agent, keyed by the cell the agent currently occupies,
/// plus the counters every separate-paths planner reports. Paths are stored
/// reversed: the next step sits at the back.
#[derive(Debug, Default)]
pub(crate) struct PathCache {
    pub(crate) paths: HashMap<Position, Vec<Position>>,
    pub(crate) times_without_path: u32,
    pub(crate) recalculations: u32,
    pub(crate) path_invalid: u32,
    pub(crate) nodes: usize,
}

pub(crate) const SEPARATE_STAT_NAMES: [&str; 4] = [
    "Path not found",
    "Recalculations",
    "Path invalid",
    "Nodes expanded",
];

impl PathCache {
    pub(crate) fn stat_values(&self) -> Vec<String> {
        vec![
            self.times_without_path.to_string(),
            self.recalculations.to_string(),
            self.path_invalid.to_string(),
            self.nodes.to_string(),
        ]
    }
}

/// Planners that route each agent independently and cache the remainder of
/// its path between ticks. The driver below handles the cache bookkeeping;
/// implementors only supply the actual search.
pub(crate) trait SeparatePathsSolver {
    fn cache(&mut self) -> &mut PathCache;

    /// Called once per tick before any agent is processed.
    fn begin_tick(&mut self, _w: &World) {}

    /// Plan a fresh (reversed) path for the agent at `from`, excluding
    /// `from` itself. `old` is the remainder of the previous path when its
    /// next step went invalid.
    fn find_path(
        &mut self,
        from: Position,
        w: &World,
        rng: &mut StdRng,
        old: Option<&[Position]>,
    ) -> Vec<Position>;

    fn recalculate(
        &mut self,
        from: Position,
        w: &World,
        rng: &mut StdRng,
        old: Option<&[Position]>,
    ) -> Vec<Position> {
        debug!("recalculating for {}", from);
        self.cache().recalculations += 1;

        let new_path = self.find_path(from, w, rng, old);
        if new_path.is_empty() {
            debug!("search found no path for {}", from);
        }
        new_path
    }

    /// One tick: process every agent in shuffled order, emitting at most one
    /// step each, against a scratch world that accumulates the earlier
    /// movers of this very tick.
    fn get_action_separately(&mut self, mut w: World, rng: &mut StdRng) -> JointAction {
        self.begin_tick(&w);

        let mut agents: Vec<(Position, Position)> =
            w.agents().iter().map(|(p, a)| (*p, a.goal)).collect();
        agents.sort();
        agents.shuffle(rng);

        let mut result = JointAction::new();

        for (pos, goal) in agents {
            if pos == goal {
                self.cache().paths.remove(&pos);
                continue;
            }

            let cached = self.cache().paths.remove(&pos);
            let mut path = match cached {
                Some(path) if next_step_valid(&path, pos, &w) => path,
                Some(path) => self.recalculate(pos, &w, rng, Some(&path)),
                None => self.recalculate(pos, &w, rng, None),
            };

            if path.is_empty() {
                debug!("no path for {}", pos);
                self.cache().times_without_path += 1;
                continue;
            }

            let next = *path.last().unwrap();
            if next == pos {
                // Planned wait: hold position this tick.
                path.pop();
                self.cache().paths.insert(pos, path);
                continue;
            }

            let action = Action::new(pos, direction_to(pos, next));
            if !valid(&action, &w) {
                debug!("path invalid for {}", pos);
                self.cache().path_invalid += 1;
                self.cache().paths.insert(pos, path);
                continue;
            }

            result.add(action);
            apply_action(&action, &mut w);
            path.pop();
            self.cache().paths.insert(next, path);
        }

        result
    }
}

fn next_step_valid(path: &[Position], pos: Position, w: &World) -> bool {
    match path.last() {
        None => false,
        Some(&next) if next == pos => true,
        Some(&next) => neighbours(pos, next) && valid(&Action::new(pos, direction_to(pos, next)), w),
    }
}
