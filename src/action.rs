use crate::geometry::{translate, Direction, Position};
use crate::map::{in_bounds, Tile};
use crate::world::World;

/// A single agent's move: step from `from` in `direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub from: Position,
    pub direction: Direction,
}

impl Action {
    pub fn new(from: Position, direction: Direction) -> Self {
        Action { from, direction }
    }

    pub fn destination(&self) -> Position {
        translate(self.from, self.direction)
    }
}

/// An action is valid when `from` holds an agent and the destination is an
/// in-bounds free cell of the given world. Callers that build up a joint
/// action apply accepted actions to a scratch world one by one, so "free"
/// here already accounts for earlier movers of the same tick.
pub fn valid(a: &Action, w: &World) -> bool {
    w.get_agent(a.from).is_some()
        && in_bounds(a.destination(), w.map())
        && w.get(a.destination()) == Tile::Free
}

/// At most one move per agent within a tick; all `from` cells are distinct,
/// and no cell is targeted by two movers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointAction {
    actions: Vec<Action>,
}

impl JointAction {
    pub fn new() -> Self {
        JointAction::default()
    }

    pub fn add(&mut self, a: Action) {
        debug_assert!(
            self.actions.iter().all(|other| other.from != a.from),
            "duplicate mover {}",
            a.from
        );
        debug_assert!(
            self.actions
                .iter()
                .all(|other| other.destination() != a.destination()),
            "cell {} targeted by two movers",
            a.destination()
        );
        self.actions.push(a);
    }

    pub fn extend(&mut self, other: JointAction) {
        for a in other.actions {
            self.add(a);
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Move a single agent. Used by planners building up a joint action against
/// a scratch world, one accepted step at a time.
pub fn apply_action(a: &Action, w: &mut World) {
    let agent = w.remove_agent(a.from);
    w.put_agent(a.destination(), agent);
}

/// Move all listed agents atomically. Removing every mover before
/// re-inserting any of them keeps convoys (an agent stepping into a cell its
/// neighbour vacates this very tick) legal. Panics via the world's mutation
/// invariants if two movers target one cell.
pub fn apply(action: &JointAction, w: &mut World) {
    let mut moved = Vec::with_capacity(action.actions().len());
    for a in action.actions() {
        moved.push((a.destination(), w.remove_agent(a.from)));
    }
    for (dest, agent) in moved {
        w.put_agent(dest, agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Map;
    use crate::world::ObstacleSettings;
    use std::sync::Arc;

    fn corridor(width: i32) -> World {
        let mut text = format!("type octile\nheight 1\nwidth {}\nmap\n", width);
        text.push_str(&".".repeat(width as usize));
        text.push('\n');
        let map = Arc::new(Map::from_reader(text.as_bytes(), "corridor.map").unwrap());
        World::new(map, ObstacleSettings::default())
    }

    #[test]
    fn test_valid_checks_bounds_and_occupancy() {
        let mut w = corridor(3);
        let a = w.create_agent(Position::new(2, 0));
        w.put_agent(Position::new(0, 0), a);
        let b = w.create_agent(Position::new(0, 0));
        w.put_agent(Position::new(1, 0), b);

        // Stepping into the other agent is invalid, as is leaving the map.
        assert!(!valid(&Action::new(Position::new(0, 0), Direction::East), &w));
        assert!(!valid(&Action::new(Position::new(0, 0), Direction::West), &w));
        assert!(!valid(&Action::new(Position::new(0, 0), Direction::North), &w));
        assert!(valid(&Action::new(Position::new(1, 0), Direction::East), &w));
        // No agent at the origin of the action.
        assert!(!valid(&Action::new(Position::new(2, 0), Direction::West), &w));
    }

    #[test]
    #[should_panic(expected = "targeted by two movers")]
    fn test_two_movers_into_one_cell_rejected() {
        let mut joint = JointAction::new();
        joint.add(Action::new(Position::new(0, 0), Direction::East));
        joint.add(Action::new(Position::new(2, 0), Direction::West));
    }

    #[test]
    fn test_apply_moves_convoy_atomically() {
        let mut w = corridor(3);
        let a = w.create_agent(Position::new(2, 0));
        let a_id = a.id();
        w.put_agent(Position::new(0, 0), a);
        let b = w.create_agent(Position::new(2, 0));
        let b_id = b.id();
        w.put_agent(Position::new(1, 0), b);

        let mut joint = JointAction::new();
        joint.add(Action::new(Position::new(0, 0), Direction::East));
        joint.add(Action::new(Position::new(1, 0), Direction::East));
        apply(&joint, &mut w);

        assert_eq!(w.get_agent(Position::new(1, 0)).unwrap().id(), a_id);
        assert_eq!(w.get_agent(Position::new(2, 0)).unwrap().id(), b_id);
        assert_eq!(w.agents().len(), 2);
    }
}
