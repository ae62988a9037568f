mod action;
mod algorithm;
mod config;
mod geometry;
mod map;
mod predictor;
mod solver;
mod world;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Cli, Config};
use solver::{make_solver, solved, SolverOptions};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path))?;
            Config::from_yaml_str(&text)?
        }
        None => Config::default(),
    };
    let config = config.override_from_command_line(&cli)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut world = world::load_world(&config.world, &mut rng)
        .with_context(|| format!("loading world {}", config.world))?;

    let should_stop = Arc::new(AtomicBool::new(false));
    let options = SolverOptions {
        window: config.window,
        rejoin_limit: config.rejoin_limit,
        obstacle_penalty: config.obstacle_penalty,
        obstacle_threshold: config.obstacle_threshold,
        predictor_horizon: config.predictor_horizon,
        use_predictor: config.use_predictor,
    };
    let mut planner = make_solver(config.solver, &options, should_stop);

    info!(
        agents = world.agents().len(),
        obstacles = world.obstacles().len(),
        "running {} on {}",
        planner.name(),
        config.world
    );

    let mut ticks = 0;
    while ticks < config.max_ticks && !solved(&world) {
        let joint = planner.get_action(world.clone(), &mut rng);
        action::apply(&joint, &mut world);
        world.next_tick(&mut rng);
        ticks += 1;
    }

    if solved(&world) {
        info!("solved in {} ticks", ticks);
    } else {
        info!("tick budget of {} exhausted", config.max_ticks);
    }
    for (name, value) in planner.stat_names().iter().zip(planner.stat_values()) {
        info!("{}: {}", name, value);
    }

    Ok(())
}
