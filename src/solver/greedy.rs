use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use super::Solver;
use crate::action::{apply_action, valid, Action, JointAction};
use crate::geometry::{Direction, Position, ALL_DIRECTIONS};
use crate::world::World;

/// Memoryless baseline: every agent steps along the axis of larger delta
/// toward its goal, with an occasional random step thrown in to shake loose
/// from blocked cells.
pub struct Greedy;

fn make_random_action(
    from: Position,
    w: &mut World,
    actions: &mut JointAction,
    rng: &mut StdRng,
) {
    let d = ALL_DIRECTIONS[rng.gen_range(0..ALL_DIRECTIONS.len())];
    let a = Action::new(from, d);

    if valid(&a, w) {
        actions.add(a);
        apply_action(&a, w);
    }
}

impl Solver for Greedy {
    fn name(&self) -> &'static str {
        "Greedy"
    }

    fn get_action(&mut self, mut w: World, rng: &mut StdRng) -> JointAction {
        let mut agents: Vec<(Position, Position)> =
            w.agents().iter().map(|(p, a)| (*p, a.goal)).collect();
        agents.sort();
        agents.shuffle(rng);

        let mut result = JointAction::new();

        for (pos, goal) in agents {
            if pos == goal {
                continue;
            }

            if rng.gen_bool(0.01) {
                make_random_action(pos, &mut w, &mut result, rng);
                continue;
            }

            let dx = goal.x - pos.x;
            let dy = goal.y - pos.y;

            let d = if dx.abs() > dy.abs() {
                if dx > 0 {
                    Direction::East
                } else {
                    Direction::West
                }
            } else if dy > 0 {
                Direction::South
            } else {
                Direction::North
            };

            let a = Action::new(pos, d);
            if valid(&a, &w) {
                result.add(a);
                apply_action(&a, &mut w);
            } else {
                make_random_action(pos, &mut w, &mut result, rng);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::apply;
    use crate::map::Map;
    use crate::solver::solved;
    use crate::world::{ObstacleSettings, World};
    use rand::SeedableRng;
    use std::sync::Arc;

    fn corridor_world() -> World {
        let map = Arc::new(
            Map::from_reader(
                "type octile\nheight 1\nwidth 5\nmap\n.....\n".as_bytes(),
                "corridor.map",
            )
            .unwrap(),
        );
        let mut w = World::new(map, ObstacleSettings::default());
        let a = w.create_agent(Position::new(4, 0));
        w.put_agent(Position::new(0, 0), a);
        w
    }

    #[test]
    fn test_solo_corridor_reaches_goal() {
        let mut w = corridor_world();
        let mut solver = Greedy;
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..16 {
            if solved(&w) {
                break;
            }
            let action = solver.get_action(w.clone(), &mut rng);
            apply(&action, &mut w);
            w.next_tick(&mut rng);
        }
        assert!(solved(&w));
    }

    #[test]
    fn test_agent_at_goal_emits_no_action() {
        let map = Arc::new(
            Map::from_reader(
                "type octile\nheight 1\nwidth 2\nmap\n..\n".as_bytes(),
                "tiny.map",
            )
            .unwrap(),
        );
        let mut w = World::new(map, ObstacleSettings::default());
        let a = w.create_agent(Position::new(0, 0));
        w.put_agent(Position::new(0, 0), a);

        let mut solver = Greedy;
        let mut rng = StdRng::seed_from_u64(3);
        assert!(solver.get_action(w.clone(), &mut rng).is_empty());
    }

    #[test]
    fn test_head_on_neighbours_never_collide() {
        let map = Arc::new(
            Map::from_reader(
                "type octile\nheight 1\nwidth 2\nmap\n..\n".as_bytes(),
                "tiny.map",
            )
            .unwrap(),
        );
        let mut w = World::new(map, ObstacleSettings::default());
        let a = w.create_agent(Position::new(1, 0));
        w.put_agent(Position::new(0, 0), a);
        let b = w.create_agent(Position::new(0, 0));
        w.put_agent(Position::new(1, 0), b);

        let mut solver = Greedy;
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let action = solver.get_action(w.clone(), &mut rng);
            apply(&action, &mut w);
            assert_eq!(w.agents().len(), 2);
            w.next_tick(&mut rng);
        }
    }
}
