use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::trace;

use super::{Cost, SearchDomain};
use crate::world::World;

/// Heap entry. The heap is a max-heap, so the ordering is inverted: the
/// "largest" entry is the one with the smallest f, and within equal f the
/// larger g (deeper node) wins.
struct OpenEntry<S> {
    f: Cost,
    g: Cost,
    state: S,
}

impl<S> PartialEq for OpenEntry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.g == other.g
    }
}

impl<S> Eq for OpenEntry<S> {}

impl<S> PartialOrd for OpenEntry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for OpenEntry<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| self.g.cmp(&other.g))
    }
}

enum StopWhen<'a, S> {
    Goal,
    /// Success once the best expanded node is at least this deep.
    Window(Cost),
    GoalOrWindow(Cost),
    /// First popped state matching the predicate, never expanding past the
    /// depth bound.
    Target(&'a dyn Fn(&S) -> bool, Cost),
}

/// Best-first search over a [`SearchDomain`]. The open list is a binary heap
/// with lazy deletion: `best_g` plays the role of decrease-key by marking
/// superseded heap entries stale.
///
/// The search is resumable: open, closed and parent structures survive
/// between calls, which is what lets the heuristic oracle extend a previous
/// frontier instead of restarting.
pub(crate) struct Search<D: SearchDomain> {
    domain: D,
    start: D::State,
    goal: Option<D::State>,
    open: BinaryHeap<OpenEntry<D::State>>,
    best_g: HashMap<D::Coord, Cost>,
    closed: HashMap<D::Coord, Cost>,
    parents: HashMap<D::Coord, (D::State, Option<D::Coord>)>,
    nodes_expanded: usize,
    should_stop: Arc<AtomicBool>,
    seeded: bool,
}

impl<D: SearchDomain> Search<D> {
    pub(crate) fn new(
        domain: D,
        start: D::State,
        goal: Option<D::State>,
        should_stop: Arc<AtomicBool>,
    ) -> Self {
        Search {
            domain,
            start,
            goal,
            open: BinaryHeap::new(),
            best_g: HashMap::new(),
            closed: HashMap::new(),
            parents: HashMap::new(),
            nodes_expanded: 0,
            should_stop,
            seeded: false,
        }
    }

    /// Search until the goal state closes. Empty path if unreachable or
    /// cancelled.
    pub(crate) fn find_path(&mut self, w: &World) -> Vec<D::State> {
        let end = self.run(w, StopWhen::Goal);
        self.construct_path(end)
    }

    /// Search until the best expanded node is `window` deep, ignoring the
    /// goal. Domains whose successors include a stay step park on the goal
    /// and keep accumulating depth, so the partial path naturally covers the
    /// whole window.
    pub(crate) fn find_path_window(&mut self, w: &World, window: Cost) -> Vec<D::State> {
        let end = self.run(w, StopWhen::Window(window));
        self.construct_path(end)
    }

    /// Search until the goal closes or the window depth is reached,
    /// whichever happens first.
    pub(crate) fn find_path_to_goal_or_window(
        &mut self,
        w: &World,
        window: Cost,
    ) -> Vec<D::State> {
        let end = self.run(w, StopWhen::GoalOrWindow(window));
        self.construct_path(end)
    }

    /// Search for the first state satisfying `is_target`, never deeper than
    /// `limit`.
    pub(crate) fn find_path_to(
        &mut self,
        w: &World,
        is_target: impl Fn(&D::State) -> bool,
        limit: Cost,
    ) -> Vec<D::State> {
        let end = self.run(w, StopWhen::Target(&is_target, limit));
        self.construct_path(end)
    }

    /// Expand until a matching state closes and return its g. Used by the
    /// resumable heuristic oracle.
    pub(crate) fn find_cost_to(
        &mut self,
        w: &World,
        is_target: impl Fn(&D::State) -> bool,
    ) -> Option<Cost> {
        self.run(w, StopWhen::Target(&is_target, Cost::MAX))
            .map(|(_, g)| g)
    }

    /// g-value of an already-closed coordinate.
    pub(crate) fn closed_g(&self, coord: &D::Coord) -> Option<Cost> {
        self.closed.get(coord).copied()
    }

    pub(crate) fn nodes_expanded(&self) -> usize {
        self.nodes_expanded
    }

    fn run(&mut self, w: &World, stop: StopWhen<D::State>) -> Option<(D::Coord, Cost)> {
        if !self.seeded {
            self.seeded = true;
            if let Some(h) = self.domain.heuristic(&self.start, w, 0) {
                let coord = self.domain.coordinate(&self.start, 0);
                self.best_g.insert(coord.clone(), 0);
                self.parents.insert(coord, (self.start.clone(), None));
                self.open.push(OpenEntry {
                    f: h,
                    g: 0,
                    state: self.start.clone(),
                });
            }
        }

        while let Some(entry) = self.open.pop() {
            if self.should_stop.load(AtomicOrdering::Relaxed) {
                return None;
            }

            let coord = self.domain.coordinate(&entry.state, entry.g);
            if self.closed.contains_key(&coord) {
                continue;
            }
            if self.best_g.get(&coord) != Some(&entry.g) {
                // Superseded by a cheaper route; stale heap entry.
                continue;
            }

            if self.domain.closable(&coord) {
                self.closed.insert(coord.clone(), entry.g);
            }
            self.nodes_expanded += 1;
            trace!(g = entry.g, f = entry.f, "expand {:?}", entry.state);

            if let StopWhen::Target(_, limit) = &stop {
                if entry.g > *limit {
                    continue;
                }
            }

            // Successors go into the open list before the stop check runs:
            // a resumed search must find the terminal node's frontier intact.
            for succ in self.domain.successors(&entry.state, w) {
                let g = entry.g + self.domain.step_cost(&entry.state, &succ, w, entry.g);
                if !self.domain.passable(&succ, &entry.state, w, g) {
                    continue;
                }
                let succ_coord = self.domain.coordinate(&succ, g);
                if self.closed.contains_key(&succ_coord) {
                    continue;
                }
                if self.best_g.get(&succ_coord).is_some_and(|&old| old <= g) {
                    continue;
                }
                let Some(h) = self.domain.heuristic(&succ, w, g) else {
                    continue;
                };
                self.best_g.insert(succ_coord.clone(), g);
                self.parents
                    .insert(succ_coord.clone(), (succ.clone(), Some(coord.clone())));
                self.open.push(OpenEntry {
                    f: g + h,
                    g,
                    state: succ,
                });
            }

            let done = match &stop {
                StopWhen::Goal => self.goal.as_ref() == Some(&entry.state),
                StopWhen::Window(window) => entry.g >= *window,
                StopWhen::GoalOrWindow(window) => {
                    entry.g >= *window || self.goal.as_ref() == Some(&entry.state)
                }
                StopWhen::Target(pred, _) => pred(&entry.state),
            };
            if done {
                return Some((coord, entry.g));
            }
        }

        None
    }

    /// Walk the parent links back from `end`. The result is reversed: the
    /// terminal state sits at index 0 and the start state at the back.
    fn construct_path(&self, end: Option<(D::Coord, Cost)>) -> Vec<D::State> {
        let mut path = Vec::new();
        let mut cursor = end.map(|(coord, _)| coord);
        while let Some(coord) = cursor {
            let (state, parent) = &self.parents[&coord];
            path.push(state.clone());
            cursor = parent.clone();
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{distance, neighbours, translate, Position, ALL_DIRECTIONS};
    use crate::map::{in_bounds, Map, Tile};
    use crate::world::{ObstacleSettings, World};
    use std::sync::Arc;

    /// Plain 2-D search over the static map: walls block, nothing else does.
    struct StaticDomain {
        goal: Position,
    }

    impl SearchDomain for StaticDomain {
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
            Some(distance(*state, self.goal))
        }

        fn coordinate(&self, state: &Position, _g: Cost) -> Position {
            *state
        }
    }

    fn world(text: &str) -> World {
        let map = Arc::new(Map::from_reader(text.as_bytes(), "test.map").unwrap());
        World::new(map, ObstacleSettings::default())
    }

    fn search(w: &World, start: Position, goal: Position) -> Search<StaticDomain> {
        Search::new(
            StaticDomain { goal },
            start,
            Some(goal),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_find_path_on_open_map() {
        let w = world("type octile\nheight 3\nwidth 3\nmap\n...\n...\n...\n");
        let start = Position::new(2, 2);
        let goal = Position::new(0, 0);
        let mut s = search(&w, start, goal);

        let path = s.find_path(&w);
        assert_eq!(path.len(), 5);
        assert_eq!(path[0], goal);
        assert_eq!(*path.last().unwrap(), start);
        for pair in path.windows(2) {
            assert!(neighbours(pair[0], pair[1]));
        }
        assert!(s.nodes_expanded() > 0);
    }

    #[test]
    fn test_find_path_detours_around_wall() {
        let w = world("type octile\nheight 3\nwidth 3\nmap\n.@.\n.@.\n...\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(2, 0));
        let path = s.find_path(&w);
        // Around the wall column: 6 steps, 7 states.
        assert_eq!(path.len(), 7);
    }

    #[test]
    fn test_unreachable_goal_returns_empty_path() {
        let w = world("type octile\nheight 1\nwidth 3\nmap\n.@.\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(2, 0));
        assert!(s.find_path(&w).is_empty());
    }

    #[test]
    fn test_window_returns_partial_path() {
        let w = world("type octile\nheight 1\nwidth 8\nmap\n........\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(7, 0));
        let path = s.find_path_window(&w, 3);
        assert_eq!(path.len(), 4);
        assert_eq!(*path.last().unwrap(), Position::new(0, 0));
        assert_eq!(path[0], Position::new(3, 0));
    }

    #[test]
    fn test_goal_or_window_stops_at_goal_first() {
        let w = world("type octile\nheight 1\nwidth 8\nmap\n........\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(2, 0));
        let path = s.find_path_to_goal_or_window(&w, 5);
        assert_eq!(path[0], Position::new(2, 0));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_target_set_finds_nearest_match() {
        let w = world("type octile\nheight 1\nwidth 8\nmap\n........\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(7, 0));
        let targets = [Position::new(2, 0), Position::new(6, 0)];
        let path = s.find_path_to(&w, |p| targets.contains(p), 4);
        assert_eq!(path[0], Position::new(2, 0));
    }

    #[test]
    fn test_target_set_respects_depth_limit() {
        let w = world("type octile\nheight 1\nwidth 8\nmap\n........\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(7, 0));
        let path = s.find_path_to(&w, |p| *p == Position::new(6, 0), 3);
        assert!(path.is_empty());
    }

    #[test]
    fn test_cancellation_returns_empty_path() {
        let w = world("type octile\nheight 3\nwidth 3\nmap\n...\n...\n...\n");
        let flag = Arc::new(AtomicBool::new(true));
        let mut s = Search::new(
            StaticDomain {
                goal: Position::new(2, 2),
            },
            Position::new(0, 0),
            Some(Position::new(2, 2)),
            flag,
        );
        assert!(s.find_path(&w).is_empty());
    }

    #[test]
    fn test_resumed_search_reuses_closed_nodes() {
        let w = world("type octile\nheight 1\nwidth 8\nmap\n........\n");
        let mut s = search(&w, Position::new(0, 0), Position::new(7, 0));

        let d1 = s.find_cost_to(&w, |p| *p == Position::new(3, 0)).unwrap();
        let expanded = s.nodes_expanded();
        // Already closed: answered from the closed set without new expansion.
        let d2 = s.closed_g(&Position::new(3, 0)).unwrap();
        assert_eq!(d1, 3);
        assert_eq!(d2, 3);

        let d3 = s.find_cost_to(&w, |p| *p == Position::new(6, 0)).unwrap();
        assert_eq!(d3, 6);
        assert!(s.nodes_expanded() > expanded);
    }
}
