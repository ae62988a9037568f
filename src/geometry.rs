use std::fmt;

use serde::{Deserialize, Serialize};

/// Grid cell coordinate. `y` grows southward, matching the map file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

pub const ALL_DIRECTIONS: [Direction; 4] = [
    Direction::North,
    Direction::East,
    Direction::South,
    Direction::West,
];

impl Direction {
    pub fn inverse(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        };
        write!(f, "{}", name)
    }
}

pub fn translate(p: Position, d: Direction) -> Position {
    match d {
        Direction::North => Position::new(p.x, p.y - 1),
        Direction::East => Position::new(p.x + 1, p.y),
        Direction::South => Position::new(p.x, p.y + 1),
        Direction::West => Position::new(p.x - 1, p.y),
    }
}

/// Direction of the unit step `from -> to`. Panics if the cells are not
/// neighbours; callers only produce adjacent pairs.
pub fn direction_to(from: Position, to: Position) -> Direction {
    match (to.x - from.x, to.y - from.y) {
        (0, -1) => Direction::North,
        (1, 0) => Direction::East,
        (0, 1) => Direction::South,
        (-1, 0) => Direction::West,
        _ => panic!("direction_to: {} and {} are not neighbours", from, to),
    }
}

pub fn neighbours(a: Position, b: Position) -> bool {
    distance(a, b) == 1
}

/// Manhattan distance.
pub fn distance(a: Position, b: Position) -> u32 {
    a.x.abs_diff(b.x) + a.y.abs_diff(b.y)
}

pub type Tick = u32;

/// Space-time coordinate used by reservation tables and the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionTime {
    pub x: i32,
    pub y: i32,
    pub time: Tick,
}

impl PositionTime {
    pub fn new(p: Position, time: Tick) -> Self {
        PositionTime { x: p.x, y: p.y, time }
    }
}

impl fmt::Display for PositionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] @ {}", self.x, self.y, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_inverse_round_trip() {
        let p = Position::new(3, 7);
        for d in ALL_DIRECTIONS {
            assert_eq!(translate(translate(p, d), d.inverse()), p);
        }
    }

    #[test]
    fn test_direction_to_matches_translate() {
        let p = Position::new(0, 0);
        for d in ALL_DIRECTIONS {
            assert_eq!(direction_to(p, translate(p, d)), d);
        }
    }

    #[test]
    fn test_neighbours() {
        let p = Position::new(2, 2);
        assert!(neighbours(p, Position::new(2, 1)));
        assert!(neighbours(p, Position::new(3, 2)));
        assert!(!neighbours(p, p));
        assert!(!neighbours(p, Position::new(3, 3)));
    }

    #[test]
    fn test_manhattan_distance() {
        assert_eq!(distance(Position::new(0, 0), Position::new(3, 4)), 7);
        assert_eq!(distance(Position::new(-2, 1), Position::new(1, -1)), 5);
    }
}
