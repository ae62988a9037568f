mod astar;
mod heuristic;

pub(crate) use astar::Search;
pub(crate) use heuristic::{HeuristicSearch, Shaping};

use std::fmt::Debug;
use std::hash::Hash;

use crate::world::World;

pub(crate) type Cost = u32;

/// A search problem: the state space, its expansion rules and its costs.
/// The search itself is generic over this trait, so each planner gets a
/// monomorphised A* with no dynamic dispatch in the hot loop.
pub(crate) trait SearchDomain {
    type State: Clone + Eq + Hash + Debug;
    /// Key under which open/closed entries are stored. Identity for plain
    /// searches, `(position, time)` for space-time searches.
    type Coord: Clone + Eq + Hash;

    fn successors(&mut self, state: &Self::State, w: &World) -> Vec<Self::State>;

    /// `distance` is the g-value the candidate would be reached with.
    fn passable(
        &mut self,
        _state: &Self::State,
        _from: &Self::State,
        _w: &World,
        _distance: Cost,
    ) -> bool {
        true
    }

    /// Estimated remaining cost. `None` marks the state as hopeless and
    /// keeps it out of the open list entirely.
    fn heuristic(&mut self, state: &Self::State, w: &World, g: Cost) -> Option<Cost>;

    fn step_cost(
        &mut self,
        _from: &Self::State,
        _to: &Self::State,
        _w: &World,
        _distance: Cost,
    ) -> Cost {
        1
    }

    fn coordinate(&self, state: &Self::State, g: Cost) -> Self::Coord;

    /// Whether an expanded coordinate may enter the closed set. Joint-state
    /// searches close only full states.
    fn closable(&self, _coord: &Self::Coord) -> bool {
        true
    }
}
