use std::collections::HashMap;

use tracing::trace;

use crate::geometry::{translate, Position, PositionTime, Tick, ALL_DIRECTIONS};
use crate::map::{in_bounds, Tile};
use crate::world::World;

/// Estimator of per-cell obstacle occupancy at future ticks. Rebuilt from
/// scratch on every `update_obstacles`; a pure function of the observed
/// world, so two updates against the same world produce the same field.
pub trait Predictor {
    fn update_obstacles(&mut self, w: &World);

    /// Probability that the cell is obstructed at the given tick. Zero for
    /// anything outside the predicted range.
    fn predict_obstacle(&self, pt: PositionTime) -> f64;

    fn field(&self) -> &HashMap<PositionTime, f64>;
}

/// Spreads each obstacle's unit mass over a short horizon. The per-tick move
/// probability comes from the obstacle's delay distribution (an obstacle that
/// moves every μ ticks on average moves with probability 1/μ per tick); a
/// moving obstacle picks one of the four directions uniformly, and mass aimed
/// at a wall stays put, mirroring the world's motion rule.
pub struct DiffusionPredictor {
    horizon: Tick,
    base_tick: Tick,
    field: HashMap<PositionTime, f64>,
}

impl DiffusionPredictor {
    pub fn new(horizon: Tick) -> Self {
        DiffusionPredictor {
            horizon,
            base_tick: 0,
            field: HashMap::new(),
        }
    }
}

fn combine(field: &mut HashMap<PositionTime, f64>, pt: PositionTime, p: f64) {
    let entry = field.entry(pt).or_insert(0.0);
    // Independent obstacles: 1 - (1-a)(1-b).
    *entry = 1.0 - (1.0 - *entry) * (1.0 - p);
}

impl Predictor for DiffusionPredictor {
    fn update_obstacles(&mut self, w: &World) {
        self.base_tick = w.tick();
        self.field.clear();

        let mut positions: Vec<Position> = w.obstacles().keys().copied().collect();
        positions.sort();

        for pos in positions {
            let obstacle = w.obstacles()[&pos];
            let mean = obstacle.move_distribution.mean;
            let move_probability = if mean <= 1.0 { 1.0 } else { 1.0 / mean };

            let mut mass: HashMap<Position, f64> = HashMap::from([(pos, 1.0)]);
            combine(&mut self.field, PositionTime::new(pos, self.base_tick), 1.0);

            for step in 1..=self.horizon {
                let mut next: HashMap<Position, f64> = HashMap::new();
                for (&cell, &m) in &mass {
                    let mut stay = m * (1.0 - move_probability);
                    for d in ALL_DIRECTIONS {
                        let dest = translate(cell, d);
                        let share = m * move_probability / ALL_DIRECTIONS.len() as f64;
                        if in_bounds(dest, w.map()) && w.map().get(dest) != Tile::Wall {
                            *next.entry(dest).or_insert(0.0) += share;
                        } else {
                            stay += share;
                        }
                    }
                    *next.entry(cell).or_insert(0.0) += stay;
                }
                for (&cell, &m) in &next {
                    combine(
                        &mut self.field,
                        PositionTime::new(cell, self.base_tick + step),
                        m,
                    );
                }
                mass = next;
            }
        }

        trace!(
            obstacles = w.obstacles().len(),
            cells = self.field.len(),
            "predictor field rebuilt"
        );
    }

    fn predict_obstacle(&self, pt: PositionTime) -> f64 {
        self.field.get(&pt).copied().unwrap_or(0.0)
    }

    fn field(&self) -> &HashMap<PositionTime, f64> {
        &self.field
    }
}
