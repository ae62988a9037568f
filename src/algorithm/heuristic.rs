use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::{Cost, Search, SearchDomain};
use crate::geometry::{distance, translate, Position, PositionTime, Tick, ALL_DIRECTIONS};
use crate::map::{in_bounds, Tile};
use crate::predictor::Predictor;
use crate::world::World;

/// Optional predictor bias on the reverse search's step costs. A reverse
/// search has no forward time axis, so the depth stands in for the time
/// offset. This shapes the ordering, it is not an admissible bound.
pub(crate) struct Shaping {
    pub predictor: Rc<RefCell<dyn Predictor>>,
    pub base_tick: Tick,
    pub penalty: u32,
}

/// Reverse expansion from an agent's goal over the static map. Walls block;
/// transient obstacles are the forward searches' business.
pub(crate) struct ReverseDomain {
    toward: Position,
    shaping: Option<Shaping>,
}

impl SearchDomain for ReverseDomain {
    type State = Position;
    type Coord = Position;

    fn successors(&mut self, state: &Position, w: &World) -> Vec<Position> {
        ALL_DIRECTIONS
            .iter()
            .map(|&d| translate(*state, d))
            .filter(|&p| in_bounds(p, w.map()) && w.map().get(p) != Tile::Wall)
            .collect()
    }

    fn heuristic(&mut self, state: &Position, _w: &World, _g: Cost) -> Option<Cost> {
        Some(distance(*state, self.toward))
    }

    fn step_cost(
        &mut self,
        _from: &Position,
        to: &Position,
        _w: &World,
        distance: Cost,
    ) -> Cost {
        match &self.shaping {
            None => 1,
            Some(shaping) => {
                let pt = PositionTime::new(*to, shaping.base_tick + distance + 1);
                let predicted = shaping.predictor.borrow().predict_obstacle(pt);
                1 + (shaping.penalty as f64 * predicted) as Cost
            }
        }
    }

    fn coordinate(&self, state: &Position, _g: Cost) -> Position {
        *state
    }
}

/// True-distance oracle for forward searches: A* run backwards from the
/// agent's goal, memoised across queries. A queried cell that is already
/// closed is answered from the closed set; otherwise the frontier is resumed
/// until the cell closes. All answers therefore come from one shortest-path
/// tree.
pub(crate) struct HeuristicSearch {
    search: Search<ReverseDomain>,
}

impl HeuristicSearch {
    pub(crate) fn new(
        goal: Position,
        toward: Position,
        should_stop: Arc<AtomicBool>,
        shaping: Option<Shaping>,
    ) -> Self {
        HeuristicSearch {
            search: Search::new(
                ReverseDomain { toward, shaping },
                goal,
                None,
                should_stop,
            ),
        }
    }

    /// True distance from `p` to the goal, or `None` when `p` cannot reach
    /// it at all.
    pub(crate) fn find_distance(&mut self, p: Position, w: &World) -> Option<Cost> {
        if let Some(g) = self.search.closed_g(&p) {
            return Some(g);
        }
        self.search.find_cost_to(w, |s| *s == p)
    }

    pub(crate) fn nodes_expanded(&self) -> usize {
        self.search.nodes_expanded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Map;
    use crate::world::{ObstacleSettings, World};

    fn world(text: &str) -> World {
        let map = Arc::new(Map::from_reader(text.as_bytes(), "test.map").unwrap());
        World::new(map, ObstacleSettings::default())
    }

    #[test]
    fn test_distances_follow_one_shortest_path_tree() {
        let w = world("type octile\nheight 3\nwidth 4\nmap\n....\n.@@.\n....\n");
        let goal = Position::new(0, 0);
        let mut h = HeuristicSearch::new(
            goal,
            Position::new(3, 2),
            Arc::new(AtomicBool::new(false)),
            None,
        );

        assert_eq!(h.find_distance(goal, &w), Some(0));
        assert_eq!(h.find_distance(Position::new(3, 0), &w), Some(3));
        // Around the wall pair.
        assert_eq!(h.find_distance(Position::new(3, 2), &w), Some(5));
        // Re-query answers stay consistent after the frontier has grown.
        assert_eq!(h.find_distance(Position::new(3, 0), &w), Some(3));
    }

    #[test]
    fn test_unreachable_cell_is_none() {
        let w = world("type octile\nheight 1\nwidth 3\nmap\n.@.\n");
        let mut h = HeuristicSearch::new(
            Position::new(0, 0),
            Position::new(2, 0),
            Arc::new(AtomicBool::new(false)),
            None,
        );
        assert_eq!(h.find_distance(Position::new(2, 0), &w), None);
        // The oracle keeps answering after a failed query.
        assert_eq!(h.find_distance(Position::new(0, 0), &w), Some(0));
    }
}
