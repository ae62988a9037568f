use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::geometry::Position;
use crate::world::WorldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tile {
    Free,
    /// Permanent obstacle.
    Wall,
    /// Temporary obstacle.
    Obstacle,
    Agent,
}

pub fn traversable(t: Tile) -> bool {
    t == Tile::Free
}

/// Immutable rectangular grid in the Moving-AI octile format. Only `Free` and
/// `Wall` are ever stored; `Obstacle` and `Agent` are views derived by the
/// world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map {
    tiles: Vec<Tile>,
    width: i32,
    height: i32,
    filename: String,
}

impl Map {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Map, WorldError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            WorldError::BadFormat(format!("could not open {}: {}", path.display(), e))
        })?;
        Self::from_reader(BufReader::new(file), &path.display().to_string())
    }

    pub fn from_reader(reader: impl Read, filename: &str) -> Result<Map, WorldError> {
        let mut lines = BufReader::new(reader).lines();

        let mut next_line = || -> Result<String, WorldError> {
            match lines.next() {
                Some(Ok(line)) => Ok(line),
                Some(Err(e)) => Err(WorldError::BadFormat(e.to_string())),
                None => Err(WorldError::BadFormat("unexpected end of file".into())),
            }
        };

        if next_line()?.trim() != "type octile" {
            return Err(WorldError::BadFormat("expected 'type octile'".into()));
        }
        let height = expect_field(&next_line()?, "height")?;
        let width = expect_field(&next_line()?, "width")?;
        if next_line()?.trim() != "map" {
            return Err(WorldError::BadFormat("expected 'map'".into()));
        }

        let max = width
            .checked_mul(height)
            .ok_or_else(|| WorldError::BadFormat("map dimensions overflow".into()))?;
        let mut tiles = Vec::with_capacity(max as usize);

        for line in lines {
            let line = line.map_err(|e| WorldError::BadFormat(e.to_string()))?;
            for c in line.chars() {
                if tiles.len() >= max as usize {
                    return Err(WorldError::BadFormat("too many tiles".into()));
                }
                tiles.push(char_to_tile(c)?);
            }
        }

        if tiles.len() < max as usize {
            return Err(WorldError::BadFormat("not enough tiles".into()));
        }

        Ok(Map {
            tiles,
            width,
            height,
            filename: filename.to_string(),
        })
    }

    pub fn get(&self, p: Position) -> Tile {
        self.tiles[(p.y * self.width + p.x) as usize]
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Path of the file this map was loaded from, kept for world save.
    pub fn original_filename(&self) -> &str {
        &self.filename
    }

    pub fn iter(&self) -> impl Iterator<Item = (Position, Tile)> + '_ {
        self.tiles.iter().enumerate().map(move |(i, &t)| {
            let i = i as i32;
            (Position::new(i % self.width, i / self.width), t)
        })
    }
}

pub fn in_bounds(p: Position, m: &Map) -> bool {
    p.x >= 0 && p.y >= 0 && p.x < m.width() && p.y < m.height()
}

fn expect_field(line: &str, name: &str) -> Result<i32, WorldError> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some(name) {
        return Err(WorldError::BadFormat(format!("expected '{}'", name)));
    }
    let value: i32 = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| WorldError::BadFormat(format!("expected {} value", name)))?;
    if value <= 0 {
        return Err(WorldError::BadFormat(format!("{} must be positive", name)));
    }
    Ok(value)
}

fn char_to_tile(c: char) -> Result<Tile, WorldError> {
    match c {
        '.' | 'G' => Ok(Tile::Free),
        '@' | 'O' | 'T' | 'S' | 'W' => Ok(Tile::Wall),
        _ => Err(WorldError::BadFormat(format!(
            "not a valid tile character: {:?}",
            c
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "type octile\nheight 3\nwidth 4\nmap\n....\n.@@.\n....\n";

    #[test]
    fn test_read_map() {
        let map = Map::from_reader(SMALL.as_bytes(), "small.map").unwrap();

        assert_eq!(map.width(), 4);
        assert_eq!(map.height(), 3);
        assert_eq!(map.get(Position::new(0, 0)), Tile::Free);
        assert_eq!(map.get(Position::new(1, 1)), Tile::Wall);
        assert_eq!(map.get(Position::new(2, 1)), Tile::Wall);
        assert_eq!(map.get(Position::new(3, 2)), Tile::Free);
    }

    #[test]
    fn test_iteration_is_row_major() {
        let map = Map::from_reader(SMALL.as_bytes(), "small.map").unwrap();
        let cells: Vec<_> = map.iter().collect();
        assert_eq!(cells.len(), 12);
        assert_eq!(cells[0].0, Position::new(0, 0));
        assert_eq!(cells[4].0, Position::new(0, 1));
        assert_eq!(cells[5], (Position::new(1, 1), Tile::Wall));
    }

    #[test]
    fn test_bad_header_rejected() {
        let bad = "type hexes\nheight 1\nwidth 1\nmap\n.\n";
        assert!(Map::from_reader(bad.as_bytes(), "bad.map").is_err());
    }

    #[test]
    fn test_bad_tile_char_rejected() {
        let bad = "type octile\nheight 1\nwidth 2\nmap\n.x\n";
        assert!(Map::from_reader(bad.as_bytes(), "bad.map").is_err());
    }

    #[test]
    fn test_tile_count_mismatch_rejected() {
        let short = "type octile\nheight 2\nwidth 2\nmap\n..\n";
        assert!(Map::from_reader(short.as_bytes(), "short.map").is_err());
        let long = "type octile\nheight 1\nwidth 2\nmap\n...\n";
        assert!(Map::from_reader(long.as_bytes(), "long.map").is_err());
    }

    #[test]
    fn test_in_bounds() {
        let map = Map::from_reader(SMALL.as_bytes(), "small.map").unwrap();
        assert!(in_bounds(Position::new(0, 0), &map));
        assert!(in_bounds(Position::new(3, 2), &map));
        assert!(!in_bounds(Position::new(4, 0), &map));
        assert!(!in_bounds(Position::new(0, -1), &map));
    }
}
