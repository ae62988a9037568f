use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::geometry::{translate, Position, Tick, ALL_DIRECTIONS};
use crate::map::{in_bounds, traversable, Map, Tile};

pub type AgentId = u32;
pub type ObstacleId = u32;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("bad world format: {0}")]
    BadFormat(String),
    #[error("could not access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An agent's persistent record. Its current position is the key under which
/// the world stores it, not a field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    id: AgentId,
    pub goal: Position,
}

impl Agent {
    pub fn id(&self) -> AgentId {
        self.id
    }
}

/// Normal distribution of the delay between two moves of an obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveDistribution {
    pub mean: f64,
    pub std_dev: f64,
}

impl MoveDistribution {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        Normal::new(self.mean, self.std_dev).map_or(self.mean, |d| d.sample(rng))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    id: ObstacleId,
    pub next_move: Tick,
    pub move_distribution: MoveDistribution,
}

impl Obstacle {
    pub fn id(&self) -> ObstacleId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSettings {
    pub tile_probability: f64,
    pub move_probability: MoveDistribution,
}

impl Default for ObstacleSettings {
    fn default() -> Self {
        ObstacleSettings {
            tile_probability: 0.05,
            move_probability: MoveDistribution {
                mean: 5.0,
                std_dev: 1.0,
            },
        }
    }
}

/// Mutable snapshot of the whole scene: a shared immutable map plus agents
/// and obstacles keyed by the cell they occupy. At most one entity per cell.
///
/// `put_*`/`remove_*` panic on invariant violations; planners never request
/// such mutations, so a panic here is a programmer error, not input error.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    map: Arc<Map>,
    agents: HashMap<Position, Agent>,
    obstacles: HashMap<Position, Obstacle>,
    tick: Tick,
    obstacle_settings: ObstacleSettings,
    next_agent_id: AgentId,
    next_obstacle_id: ObstacleId,
}

impl World {
    pub fn new(map: Arc<Map>, obstacle_settings: ObstacleSettings) -> Self {
        World {
            map,
            agents: HashMap::new(),
            obstacles: HashMap::new(),
            tick: 0,
            obstacle_settings,
            next_agent_id: 0,
            next_obstacle_id: 0,
        }
    }

    /// Effective tile at `p`: agent > obstacle > map tile.
    pub fn get(&self, p: Position) -> Tile {
        if self.agents.contains_key(&p) {
            Tile::Agent
        } else if self.obstacles.contains_key(&p) {
            Tile::Obstacle
        } else {
            self.map.get(p)
        }
    }

    pub fn get_agent(&self, p: Position) -> Option<&Agent> {
        self.agents.get(&p)
    }

    pub fn agents(&self) -> &HashMap<Position, Agent> {
        &self.agents
    }

    pub fn obstacles(&self) -> &HashMap<Position, Obstacle> {
        &self.obstacles
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn obstacle_settings(&self) -> &ObstacleSettings {
        &self.obstacle_settings
    }

    pub fn create_agent(&mut self, goal: Position) -> Agent {
        let agent = Agent {
            id: self.next_agent_id,
            goal,
        };
        self.next_agent_id += 1;
        agent
    }

    pub fn create_obstacle(&mut self, move_distribution: MoveDistribution) -> Obstacle {
        let obstacle = Obstacle {
            id: self.next_obstacle_id,
            next_move: 0,
            move_distribution,
        };
        self.next_obstacle_id += 1;
        obstacle
    }

    pub fn put_agent(&mut self, p: Position, a: Agent) {
        if self.get(p) != Tile::Free {
            panic!("put_agent: position {} not empty", p);
        }
        self.agents.insert(p, a);
    }

    pub fn remove_agent(&mut self, p: Position) -> Agent {
        match self.agents.remove(&p) {
            Some(a) => a,
            None => panic!("remove_agent: no agent at {}", p),
        }
    }

    pub fn put_obstacle(&mut self, p: Position, o: Obstacle) {
        if self.get(p) != Tile::Free {
            panic!("put_obstacle: position {} not empty", p);
        }
        self.obstacles.insert(p, o);
    }

    pub fn remove_obstacle(&mut self, p: Position) -> Obstacle {
        match self.obstacles.remove(&p) {
            Some(o) => o,
            None => panic!("remove_obstacle: no obstacle at {}", p),
        }
    }

    /// Advance time by one tick and move every obstacle whose delay has run
    /// out. A due obstacle picks a uniformly random direction; if the
    /// destination is blocked it stays put and retries next tick. The next
    /// delay is drawn only after a successful move.
    pub fn next_tick<R: Rng>(&mut self, rng: &mut R) {
        self.tick += 1;

        let mut due: Vec<Position> = self
            .obstacles
            .iter()
            .filter(|(_, o)| o.next_move <= self.tick)
            .map(|(p, _)| *p)
            .collect();
        due.sort();

        for pos in due {
            let d = ALL_DIRECTIONS[rng.gen_range(0..ALL_DIRECTIONS.len())];
            let new_pos = translate(pos, d);

            if in_bounds(new_pos, &self.map) && traversable(self.get(new_pos)) {
                let mut o = self.remove_obstacle(pos);
                o.next_move = self.tick + o.move_distribution.sample(rng).max(1.0) as Tick;
                self.put_obstacle(new_pos, o);
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WorldFile {
    map: String,
    #[serde(default)]
    tick: Tick,
    agents: Vec<AgentFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    obstacles: Option<ObstaclesFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentFile {
    position: [i32; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    goal: Option<[i32; 2]>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ObstaclesFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tile_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    obstacle_movement: Option<ObstacleMovementFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list: Option<Vec<ObstacleFile>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObstacleMovementFile {
    move_probability: DistributionFile,
}

#[derive(Debug, Serialize, Deserialize)]
struct DistributionFile {
    parameters: [f64; 2],
}

#[derive(Debug, Serialize, Deserialize)]
struct ObstacleFile {
    position: [i32; 2],
    next_move: Tick,
    move_probability: DistributionFile,
}

fn parse_distribution(d: &DistributionFile) -> Result<MoveDistribution, WorldError> {
    let [mean, std_dev] = d.parameters;
    if !std_dev.is_finite() || std_dev < 0.0 {
        return Err(WorldError::BadFormat(
            "invalid normal distribution parameters".into(),
        ));
    }
    Ok(MoveDistribution { mean, std_dev })
}

fn place_agent(world: &mut World, file: &AgentFile) -> Result<(), WorldError> {
    let pos = Position::new(file.position[0], file.position[1]);
    let goal = file
        .goal
        .map_or(pos, |g| Position::new(g[0], g[1]));

    for p in [pos, goal] {
        if !in_bounds(p, world.map()) {
            return Err(WorldError::BadFormat(format!("{} out of bounds", p)));
        }
        if world.map().get(p) == Tile::Wall {
            return Err(WorldError::BadFormat(format!("{} is a wall", p)));
        }
    }
    if world.get(pos) != Tile::Free {
        return Err(WorldError::BadFormat(format!("{} already occupied", pos)));
    }

    let agent = world.create_agent(goal);
    world.put_agent(pos, agent);
    Ok(())
}

fn make_random_obstacles<R: Rng>(world: &mut World, rng: &mut R) {
    let settings = *world.obstacle_settings();
    let free: Vec<Position> = world
        .map()
        .iter()
        .map(|(p, _)| p)
        .filter(|&p| world.get(p) == Tile::Free)
        .collect();

    for p in free {
        if rng.gen::<f64>() < settings.tile_probability {
            let mut o = world.create_obstacle(settings.move_probability);
            o.next_move =
                world.tick() + settings.move_probability.sample(rng).max(1.0) as Tick;
            world.put_obstacle(p, o);
        }
    }
}

/// Load a world from a JSON file. The `map` entry is resolved relative to the
/// world file. Obstacles come either as an explicit `list` (what `save_world`
/// writes) or are generated per free tile with `tile_probability`.
pub fn load_world<R: Rng>(path: impl AsRef<Path>, rng: &mut R) -> Result<World, WorldError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| WorldError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let file: WorldFile =
        serde_json::from_str(&text).map_err(|e| WorldError::BadFormat(e.to_string()))?;

    let map_path = path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(file.map.trim());
    let map = Arc::new(Map::from_file(&map_path)?);

    let mut settings = ObstacleSettings::default();
    if let Some(obstacles) = &file.obstacles {
        if let Some(p) = obstacles.tile_probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(WorldError::BadFormat(
                    "tile_probability must be in [0, 1]".into(),
                ));
            }
            settings.tile_probability = p;
        }
        if let Some(movement) = &obstacles.obstacle_movement {
            settings.move_probability = parse_distribution(&movement.move_probability)?;
        }
    }

    let mut world = World::new(map, settings);
    world.tick = file.tick;

    for agent in &file.agents {
        place_agent(&mut world, agent)?;
    }

    match &file.obstacles {
        Some(ObstaclesFile {
            list: Some(list), ..
        }) => {
            for entry in list {
                let pos = Position::new(entry.position[0], entry.position[1]);
                if !in_bounds(pos, world.map()) || world.get(pos) != Tile::Free {
                    return Err(WorldError::BadFormat(format!(
                        "obstacle position {} unavailable",
                        pos
                    )));
                }
                let distribution = parse_distribution(&entry.move_probability)?;
                let mut o = world.create_obstacle(distribution);
                o.next_move = entry.next_move;
                world.put_obstacle(pos, o);
            }
        }
        Some(_) => make_random_obstacles(&mut world, rng),
        None => {}
    }

    debug!(
        agents = world.agents().len(),
        obstacles = world.obstacles().len(),
        "loaded world from {}",
        path.display()
    );
    Ok(world)
}

/// Write the world back as JSON with an explicit obstacle list, so that
/// loading the result reproduces the world exactly.
pub fn save_world(world: &World, path: impl AsRef<Path>) -> Result<(), WorldError> {
    let path = path.as_ref();

    let mut agents: Vec<(Position, Agent)> =
        world.agents().iter().map(|(p, a)| (*p, *a)).collect();
    agents.sort_by_key(|(p, _)| *p);

    let mut obstacles: Vec<(Position, Obstacle)> =
        world.obstacles().iter().map(|(p, o)| (*p, *o)).collect();
    obstacles.sort_by_key(|(p, _)| *p);

    let file = WorldFile {
        map: world.map().original_filename().to_string(),
        tick: world.tick(),
        agents: agents
            .into_iter()
            .map(|(p, a)| AgentFile {
                position: [p.x, p.y],
                goal: Some([a.goal.x, a.goal.y]),
            })
            .collect(),
        obstacles: Some(ObstaclesFile {
            tile_probability: Some(world.obstacle_settings().tile_probability),
            obstacle_movement: Some(ObstacleMovementFile {
                move_probability: DistributionFile {
                    parameters: [
                        world.obstacle_settings().move_probability.mean,
                        world.obstacle_settings().move_probability.std_dev,
                    ],
                },
            }),
            list: Some(
                obstacles
                    .into_iter()
                    .map(|(p, o)| ObstacleFile {
                        position: [p.x, p.y],
                        next_move: o.next_move,
                        move_probability: DistributionFile {
                            parameters: [o.move_distribution.mean, o.move_distribution.std_dev],
                        },
                    })
                    .collect(),
            ),
        }),
    };

    let text = serde_json::to_string_pretty(&file)
        .map_err(|e| WorldError::BadFormat(e.to_string()))?;
    std::fs::write(path, text).map_err(|e| WorldError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn open_map(width: i32, height: i32) -> Arc<Map> {
        let mut text = format!("type octile\nheight {}\nwidth {}\nmap\n", height, width);
        for _ in 0..height {
            text.push_str(&".".repeat(width as usize));
            text.push('\n');
        }
        Arc::new(Map::from_reader(text.as_bytes(), "test.map").unwrap())
    }

    #[test]
    fn test_get_priority_agent_over_obstacle_over_map() {
        let mut w = World::new(open_map(3, 3), ObstacleSettings::default());

        let a = w.create_agent(Position::new(2, 2));
        w.put_agent(Position::new(0, 0), a);
        let o = w.create_obstacle(MoveDistribution {
            mean: 5.0,
            std_dev: 1.0,
        });
        w.put_obstacle(Position::new(1, 0), o);

        assert_eq!(w.get(Position::new(0, 0)), Tile::Agent);
        assert_eq!(w.get(Position::new(1, 0)), Tile::Obstacle);
        assert_eq!(w.get(Position::new(2, 0)), Tile::Free);
    }

    #[test]
    #[should_panic(expected = "put_agent")]
    fn test_put_agent_on_occupied_cell_panics() {
        let mut w = World::new(open_map(2, 1), ObstacleSettings::default());
        let a = w.create_agent(Position::new(1, 0));
        let b = w.create_agent(Position::new(1, 0));
        w.put_agent(Position::new(0, 0), a);
        w.put_agent(Position::new(0, 0), b);
    }

    #[test]
    #[should_panic(expected = "remove_agent")]
    fn test_remove_absent_agent_panics() {
        let mut w = World::new(open_map(2, 1), ObstacleSettings::default());
        w.remove_agent(Position::new(0, 0));
    }

    #[test]
    fn test_next_tick_moves_due_obstacle() {
        let mut w = World::new(open_map(5, 5), ObstacleSettings::default());
        let start = Position::new(2, 2);
        let mut o = w.create_obstacle(MoveDistribution {
            mean: 3.0,
            std_dev: 0.0,
        });
        o.next_move = 1;
        w.put_obstacle(start, o);

        let mut rng = StdRng::seed_from_u64(7);
        w.next_tick(&mut rng);

        assert_eq!(w.obstacles().len(), 1);
        let (&pos, moved) = w.obstacles().iter().next().unwrap();
        assert!(crate::geometry::neighbours(pos, start));
        assert!(moved.next_move > 1);
    }

    #[test]
    fn test_blocked_obstacle_retries_next_tick() {
        // Single free cell: the obstacle can never move, but must stay due.
        let text = "type octile\nheight 3\nwidth 3\nmap\n@@@\n@.@\n@@@\n";
        let map = Arc::new(Map::from_reader(text.as_bytes(), "cell.map").unwrap());
        let mut w = World::new(map, ObstacleSettings::default());
        let mut o = w.create_obstacle(MoveDistribution {
            mean: 2.0,
            std_dev: 0.0,
        });
        o.next_move = 1;
        w.put_obstacle(Position::new(1, 1), o);

        let mut rng = StdRng::seed_from_u64(7);
        w.next_tick(&mut rng);
        w.next_tick(&mut rng);

        let o = w.obstacles()[&Position::new(1, 1)];
        assert_eq!(o.next_move, 1);
    }

    #[test]
    fn test_world_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("omapf-world-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let map_path = dir.join("round.map");
        std::fs::write(&map_path, "type octile\nheight 3\nwidth 3\nmap\n...\n.@.\n...\n")
            .unwrap();
        let world_path = dir.join("round.json");
        std::fs::write(
            &world_path,
            r#"{
                "map": "round.map",
                "agents": [
                    {"position": [0, 0], "goal": [2, 2]},
                    {"position": [2, 0]}
                ],
                "obstacles": {
                    "list": [
                        {"position": [0, 2], "next_move": 4,
                         "move_probability": {"parameters": [5.0, 1.0]}}
                    ]
                }
            }"#,
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let world = load_world(&world_path, &mut rng).unwrap();
        assert_eq!(world.agents().len(), 2);
        // Goal defaults to the position when absent.
        assert_eq!(
            world.get_agent(Position::new(2, 0)).unwrap().goal,
            Position::new(2, 0)
        );
        assert_eq!(world.obstacles().len(), 1);

        let saved = dir.join("saved.json");
        save_world(&world, &saved).unwrap();
        let reloaded = load_world(&saved, &mut rng).unwrap();
        assert_eq!(world, reloaded);
    }

    #[test]
    fn test_malformed_world_rejected() {
        let dir = std::env::temp_dir().join(format!("omapf-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let world_path = dir.join("bad.json");
        std::fs::write(&world_path, "{ not json").unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        match load_world(&world_path, &mut rng) {
            Err(WorldError::BadFormat(_)) => {}
            other => panic!("expected BadFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_agent_on_wall_rejected() {
        let dir = std::env::temp_dir().join(format!("omapf-wall-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("wall.map"),
            "type octile\nheight 1\nwidth 2\nmap\n.@\n",
        )
        .unwrap();
        let world_path = dir.join("wall.json");
        std::fs::write(
            &world_path,
            r#"{"map": "wall.map", "agents": [{"position": [1, 0]}]}"#,
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        assert!(load_world(&world_path, &mut rng).is_err());
    }
}
