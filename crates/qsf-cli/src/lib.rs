//! # QSF CLI
//!
//! Command-line tools for the QSF engine.
//!
//! ## Commands
//! - `link-types` - Validate a link type registry file and print the type chains
//! - `simulate` - Run a headless movement scenario and report the outcome
//! - `default-config` - Print the default engine configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::{Quat, Vec3};
use serde::Serialize;

use qsf_core::{DeltaTime, EngineConfig, Entity, Transform, World};
use qsf_link::{LinkDirection, LinkType, LinkTypeId, LinkTypeManager, LinkTypeRegistryConfig};
use qsf_movement::Simulation;

/// QSF Engine CLI
#[derive(Parser)]
#[command(name = "qsf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate a link type registry and print every type
    LinkTypes {
        /// Registry file (JSON)
        registry: PathBuf,
    },

    /// Run a headless movement scenario
    Simulate {
        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Link type registry file (JSON)
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Number of rendered frames
        #[arg(short, long, default_value = "120")]
        frames: u32,

        /// Frame time in seconds
        #[arg(long, default_value = "0.016")]
        frame_time: f64,

        /// Movables circling the origin
        #[arg(short, long, default_value = "4")]
        movables: u32,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default engine configuration
    DefaultConfig,
}

/// Headless scenario parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioOptions {
    pub frames: u32,
    pub frame_time: f64,
    pub movables: u32,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            frames: 120,
            frame_time: 0.016,
            movables: 4,
        }
    }
}

/// Final state of one movable
#[derive(Debug, Clone, Serialize)]
pub struct MovableSummary {
    pub entity: u64,
    pub position: [f32; 3],
    pub rendered: [f32; 3],
    pub moving: bool,
    pub linked_child: bool,
}

/// Outcome of a headless scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub frames: u32,
    pub ticks: u64,
    pub changed_transforms: usize,
    pub anchors: usize,
    pub links: usize,
    pub movables: Vec<MovableSummary>,
}

/// Angular speed of the circling movables, radians per second
const ORBIT_SPEED: f32 = 1.0;

/// Speed of the carrier, units per second
const CARRIER_SPEED: f32 = 2.0;

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::LinkTypes { registry } => {
            let (manager, order) = load_registry(&registry)?;
            log::info!("{} link types in {}", manager.len(), registry.display());
            for type_id in order {
                if let Some(link_type) = manager.get(type_id) {
                    log::info!("  {}", describe_link_type(&manager, link_type));
                }
            }
        }

        Commands::Simulate {
            config,
            registry,
            frames,
            frame_time,
            movables,
            json,
        } => {
            let engine_config = match config {
                Some(path) => EngineConfig::from_json_file(&path)
                    .with_context(|| format!("loading engine config {}", path.display()))?,
                None => EngineConfig::default(),
            };
            let link_types = match registry {
                Some(path) => load_registry(&path)?.0,
                None => LinkTypeManager::new(),
            };
            let options = ScenarioOptions {
                frames,
                frame_time,
                movables,
            };

            log::info!("Simulating {} frames of {:.4}s...", frames, frame_time);
            let summary = run_scenario(&engine_config, link_types, &options)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                log::info!(
                    "{} ticks, {} rendered transform updates, {} links between {} anchors",
                    summary.ticks,
                    summary.changed_transforms,
                    summary.links,
                    summary.anchors
                );
                for movable in &summary.movables {
                    log::info!(
                        "  entity {:#x}: position {:?}, rendered {:?}, moving {}, linked {}",
                        movable.entity,
                        movable.position,
                        movable.rendered,
                        movable.moving,
                        movable.linked_child
                    );
                }
            }
        }

        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
        }
    }

    Ok(())
}

/// Load and register a link type registry file.
///
/// Returns the manager and the ids in registration order.
pub fn load_registry(path: &Path) -> Result<(LinkTypeManager, Vec<LinkTypeId>)> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading link type registry {}", path.display()))?;
    let config = LinkTypeRegistryConfig::from_json_str(&json)
        .with_context(|| format!("parsing link type registry {}", path.display()))?;

    let mut manager = LinkTypeManager::new();
    let order = manager
        .register_from_config(&config)
        .with_context(|| format!("registering link types from {}", path.display()))?;
    Ok((manager, order))
}

/// One-line description of a link type and its inheritance chain
pub fn describe_link_type(manager: &LinkTypeManager, link_type: &LinkType) -> String {
    let chain: Vec<&str> = link_type
        .inherited_type_ids()
        .iter()
        .map(|id| manager.get(*id).map_or("?", LinkType::class_name))
        .collect();
    let multiplicity = |direction| {
        if link_type.supports_multiple_connections(direction) {
            "many"
        } else {
            "one"
        }
    };
    format!(
        "{} [{}] chain {} forward {} backward {}",
        link_type.class_name(),
        link_type.id(),
        chain.join(" > "),
        multiplicity(LinkDirection::Forward),
        multiplicity(LinkDirection::Backward)
    )
}

/// Run movables around the origin plus a carrier with a passenger.
///
/// Halfway through, the carrier is warped back to the origin.
pub fn run_scenario(
    config: &EngineConfig,
    link_types: LinkTypeManager,
    options: &ScenarioOptions,
) -> Result<ScenarioSummary> {
    let mut sim = Simulation::with_link_types(config, link_types)?;

    let mut orbiters = Vec::with_capacity(options.movables as usize);
    for i in 0..options.movables {
        let angle = std::f32::consts::TAU * i as f32 / options.movables as f32;
        let position = Quat::from_rotation_y(angle) * Vec3::new(5.0, 0.0, 0.0);
        orbiters.push(sim.spawn_movable(Transform::from_position(position))?);
    }

    let carrier = sim.spawn_movable(Transform::IDENTITY)?;
    let passenger = sim.spawn_movable(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)))?;
    sim.attach_to_container(passenger, carrier)?;

    let mut step = scenario_step(orbiters, carrier);
    let mut changed_transforms = 0;
    for frame in 0..options.frames {
        if frame == options.frames / 2 {
            log::debug!("Warping carrier back to the origin at frame {}", frame);
            sim.warp(carrier, Vec3::ZERO, Quat::IDENTITY)?;
        }

        let report = sim.advance(options.frame_time, &mut step)?;
        changed_transforms += report.changed;
        log::trace!(
            "Frame {}: {} ticks, alpha {:.3}, {} changed",
            frame,
            report.ticks,
            report.alpha,
            report.changed
        );
    }

    let movables = sim
        .movables()
        .map(|movable| MovableSummary {
            entity: movable.entity().to_bits(),
            position: movable.position().to_array(),
            rendered: movable.rendered_transform().position.to_array(),
            moving: movable.is_moving(),
            linked_child: movable.is_linked_child(),
        })
        .collect();

    Ok(ScenarioSummary {
        frames: options.frames,
        ticks: sim.time().tick_count(),
        changed_transforms,
        anchors: sim.links().anchor_count(),
        links: sim.links().link_count(),
        movables,
    })
}

fn scenario_step(orbiters: Vec<Entity>, carrier: Entity) -> impl FnMut(&mut World, DeltaTime) {
    move |world, dt| {
        let dt = dt.as_secs_f32();
        let turn = Quat::from_rotation_y(ORBIT_SPEED * dt);
        for entity in &orbiters {
            if let Some(transform) = world.get_component_mut::<Transform>(*entity) {
                transform.position = turn * transform.position;
                transform.rotation = (turn * transform.rotation).normalize();
            }
        }
        if let Some(transform) = world.get_component_mut::<Transform>(carrier) {
            transform.translate(Vec3::X * CARRIER_SPEED * dt);
        }
    }
}
