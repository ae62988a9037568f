use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, instrument};

use super::separate::{PathCache, SeparatePathsSolver, SEPARATE_STAT_NAMES};
use super::Solver;
use crate::action::JointAction;
use crate::algorithm::{Cost, Search, SearchDomain};
use crate::geometry::{distance, neighbours, translate, Position, Tick, ALL_DIRECTIONS};
use crate::map::{in_bounds, Tile};
use crate::world::{AgentId, World};

/// Local Repair A*: each agent keeps its own path over the static map and
/// recomputes when the next step stops being valid. Repeated recomputation
/// in quick succession inflates the heuristic by a random "agitation" term,
/// which breaks the symmetric oscillations two facing agents fall into.
pub struct Lra {
    cache: PathCache,
    last_recalculation: HashMap<AgentId, Tick>,
    agitation: HashMap<AgentId, u32>,
    should_stop: Arc<AtomicBool>,
}

struct LraDomain {
    start: Position,
    goal: Position,
    agitation: u32,
    rng: StdRng,
}

impl SearchDomain for LraDomain {
    type State = Position;
    type Coord = Position;

    fn successors(&mut self, state: &Position, w: &World) -> Vec<Position> {
        ALL_DIRECTIONS
            .iter()
            .map(|&d| translate(*state, d))
            .filter(|&p| in_bounds(p, w.map()) && w.map().get(p) != Tile::Wall)
            .collect()
    }

    /// Only the immediate neighbourhood of the start is checked against the
    /// live world; everything farther out is assumed to clear up by the time
    /// the agent gets there. That optimism is what makes the repairs local.
    fn passable(&mut self, state: &Position, _from: &Position, w: &World, _distance: Cost) -> bool {
        w.get(*state) == Tile::Free || !neighbours(*state, self.start)
    }

    fn heuristic(&mut self, state: &Position, _w: &World, _g: Cost) -> Option<Cost> {
        let mut h = distance(*state, self.goal);
        if self.agitation > 0 {
            h += self.rng.gen_range(0..=self.agitation);
        }
        Some(h)
    }

    fn coordinate(&self, state: &Position, _g: Cost) -> Position {
        *state
    }
}

impl Lra {
    pub fn new(should_stop: Arc<AtomicBool>) -> Self {
        Lra {
            cache: PathCache::default(),
            last_recalculation: HashMap::new(),
            agitation: HashMap::new(),
            should_stop,
        }
    }

    fn update_agitation(&mut self, id: AgentId, now: Tick) -> u32 {
        let agitation = match self.last_recalculation.get(&id) {
            None => 0,
            Some(&last) => {
                let interval = now - last;
                assert!(interval > 0, "repeated recalculation within one tick");
                if interval >= 5 {
                    0
                } else {
                    self.agitation.get(&id).copied().unwrap_or(0) + 5 / interval
                }
            }
        };
        self.agitation.insert(id, agitation);
        self.last_recalculation.insert(id, now);
        agitation
    }
}

impl SeparatePathsSolver for Lra {
    fn cache(&mut self) -> &mut PathCache {
        &mut self.cache
    }

    #[instrument(skip_all, name = "lra_find_path", fields(from = %from), level = "debug")]
    fn find_path(
        &mut self,
        from: Position,
        w: &World,
        rng: &mut StdRng,
        _old: Option<&[Position]>,
    ) -> Vec<Position> {
        let Some(agent) = w.get_agent(from).copied() else {
            return Vec::new();
        };

        let agitation = self.update_agitation(agent.id(), w.tick());
        if agitation > 0 {
            debug!(agent = agent.id(), agitation, "agitated recalculation");
        }

        let domain = LraDomain {
            start: from,
            goal: agent.goal,
            agitation,
            rng: StdRng::seed_from_u64(rng.gen()),
        };
        let mut search = Search::new(domain, from, Some(agent.goal), self.should_stop.clone());

        let mut path = search.find_path(w);
        self.cache.nodes += search.nodes_expanded();
        path.pop();
        path
    }
}

impl Solver for Lra {
    fn name(&self) -> &'static str {
        "LRA*"
    }

    fn get_action(&mut self, w: World, rng: &mut StdRng) -> JointAction {
        self.get_action_separately(w, rng)
    }

    fn stat_names(&self) -> Vec<&'static str> {
        SEPARATE_STAT_NAMES.to_vec()
    }

    fn stat_values(&self) -> Vec<String> {
        self.cache.stat_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::apply;
    use crate::map::Map;
    use crate::solver::solved;
    use crate::world::{ObstacleSettings, World};
    use std::sync::Arc;

    fn world(text: &str) -> World {
        let map = Arc::new(Map::from_reader(text.as_bytes(), "test.map").unwrap());
        World::new(map, ObstacleSettings::default())
    }

    fn run(w: &mut World, solver: &mut Lra, rng: &mut StdRng, ticks: u32) -> bool {
        for _ in 0..ticks {
            if solved(w) {
                return true;
            }
            let before = w.agents().len();
            let action = solver.get_action(w.clone(), rng);
            apply(&action, w);
            assert_eq!(w.agents().len(), before);
            w.next_tick(rng);
        }
        solved(w)
    }

    #[test]
    fn test_solo_corridor_solved_in_four_ticks() {
        let mut w = world("type octile\nheight 1\nwidth 5\nmap\n.....\n");
        let a = w.create_agent(Position::new(4, 0));
        w.put_agent(Position::new(0, 0), a);

        let mut solver = Lra::new(Arc::new(AtomicBool::new(false)));
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..4 {
            let action = solver.get_action(w.clone(), &mut rng);
            apply(&action, &mut w);
            w.next_tick(&mut rng);
        }
        assert!(solved(&w));
    }

    #[test]
    fn test_facing_agents_eventually_pass() {
        // Two agents swapping ends of a two-row room; agitation breaks the
        // symmetric dance sooner or later.
        let mut w = world("type octile\nheight 2\nwidth 4\nmap\n....\n....\n");
        let a = w.create_agent(Position::new(3, 0));
        w.put_agent(Position::new(0, 0), a);
        let b = w.create_agent(Position::new(0, 0));
        w.put_agent(Position::new(3, 0), b);

        let mut solver = Lra::new(Arc::new(AtomicBool::new(false)));
        let mut rng = StdRng::seed_from_u64(11);
        assert!(run(&mut w, &mut solver, &mut rng, 100));
    }

    #[test]
    fn test_unreachable_goal_counts_and_keeps_trying() {
        let mut w = world("type octile\nheight 1\nwidth 3\nmap\n.@.\n");
        let a = w.create_agent(Position::new(2, 0));
        w.put_agent(Position::new(0, 0), a);

        let mut solver = Lra::new(Arc::new(AtomicBool::new(false)));
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..3 {
            let action = solver.get_action(w.clone(), &mut rng);
            assert!(action.is_empty());
            apply(&action, &mut w);
            w.next_tick(&mut rng);
        }
        assert_eq!(solver.cache.times_without_path, 3);
        assert_eq!(solver.cache.recalculations, 3);
    }

    #[test]
    fn test_agitation_grows_on_rapid_recalculation_and_decays() {
        let mut solver = Lra::new(Arc::new(AtomicBool::new(false)));
        let id = 0;
        assert_eq!(solver.update_agitation(id, 0), 0);
        assert_eq!(solver.update_agitation(id, 2), 2); // 5 / 2
        assert_eq!(solver.update_agitation(id, 3), 7); // + 5 / 1
        assert_eq!(solver.update_agitation(id, 9), 0); // interval >= 5 resets
    }
}
