//! Simulation driver
//!
//! Runs the two strictly separated phases of a frame: zero or more fixed
//! ticks, then one render interpolation pass. The interpolation of each
//! movable only touches that movable, so it runs in parallel; publishing
//! the results into the world and placing linked children happens
//! afterwards on the calling thread.

use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use rayon::prelude::*;

use qsf_core::{DeltaTime, EngineConfig, Entity, Prototype, TimeManager, Transform, World};
use qsf_link::{LinkHandle, LinkSystem, LinkTypeId, LinkTypeManager};

use crate::error::{MovementError, MovementResult};
use crate::movable::MovableComponent;

/// Name of the link type carrying movables inside containers
pub const CONTAINER_LINK_TYPE_NAME: &str = "Container";

/// Id of the container link type.
///
/// Container to carried child; a container carries many children, a child
/// sits in at most one container.
pub const fn container_link_type() -> LinkTypeId {
    LinkTypeId::from_name(CONTAINER_LINK_TYPE_NAME)
}

/// Rendered transform published for the renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform(pub Transform);

/// What one call to [`Simulation::advance`] did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    /// Ticks run this frame
    pub ticks: u32,
    /// Interpolation factor used for rendering
    pub alpha: f32,
    /// Movables whose rendered transform changed
    pub changed: usize,
}

/// World, link graph and movables of one map, driven at a fixed tick rate
pub struct Simulation {
    world: World,
    links: LinkSystem,
    time: TimeManager,
    movables: BTreeMap<Entity, MovableComponent>,
    container_link_type: LinkTypeId,
}

impl Simulation {
    /// Create a simulation with only the container link type registered
    pub fn new(config: &EngineConfig) -> MovementResult<Self> {
        Self::with_link_types(config, LinkTypeManager::new())
    }

    /// Create a simulation using `link_types`, adding the container type if missing
    pub fn with_link_types(config: &EngineConfig, mut link_types: LinkTypeManager) -> MovementResult<Self> {
        config.validate()?;

        let container_link_type = container_link_type();
        if !link_types.contains(container_link_type) {
            link_types.register_link_type(container_link_type, None, CONTAINER_LINK_TYPE_NAME, true, false)?;
        }

        log::info!(
            "Simulation for map {} at {} ticks/s (max {} per frame)",
            config.map_id,
            config.tick_rate,
            config.max_ticks_per_frame
        );

        Ok(Self {
            world: World::with_map_id(config.map_id),
            links: LinkSystem::new(link_types),
            time: config.time_manager(),
            movables: BTreeMap::new(),
            container_link_type,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn links(&self) -> &LinkSystem {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut LinkSystem {
        &mut self.links
    }

    pub fn time(&self) -> &TimeManager {
        &self.time
    }

    pub fn time_mut(&mut self) -> &mut TimeManager {
        &mut self.time
    }

    pub fn container_link_type(&self) -> LinkTypeId {
        self.container_link_type
    }

    /// Movable of an entity
    pub fn movable(&self, entity: Entity) -> Option<&MovableComponent> {
        self.movables.get(&entity)
    }

    /// Movable of an entity, for overrides and bias changes
    pub fn movable_mut(&mut self, entity: Entity) -> Option<&mut MovableComponent> {
        self.movables.get_mut(&entity)
    }

    /// All movables in entity order
    pub fn movables(&self) -> impl Iterator<Item = &MovableComponent> {
        self.movables.values()
    }

    /// Number of movables
    pub fn movable_count(&self) -> usize {
        self.movables.len()
    }

    /// Spawn an entity with a simulation transform and a movable
    pub fn spawn_movable(&mut self, transform: Transform) -> MovementResult<Entity> {
        let entity = self.world.spawn();
        let prototype = Prototype::new(self.world.map_id(), entity);
        let tick_duration = self.time.tick_duration().as_secs_f32();

        let mut movable = MovableComponent::new(prototype, transform, tick_duration)?;
        if let Err(err) = movable.attach_container_proxy(&mut self.links, self.container_link_type) {
            self.world.despawn(entity);
            return Err(err);
        }

        self.world.add_component(entity, transform);
        self.world.add_component(entity, RenderTransform(transform));
        self.movables.insert(entity, movable);
        log::debug!("Spawned movable {:?} at {}", entity, transform.position);
        Ok(entity)
    }

    /// Despawn a movable entity, disconnecting all of its links
    pub fn despawn(&mut self, entity: Entity) -> MovementResult<bool> {
        let Some(movable) = self.movables.get_mut(&entity) else {
            return Ok(false);
        };
        movable.detach_container_proxy(&mut self.links);
        if let Err(err) = self.links.destroy_link_anchor_cascading(&movable.prototype()) {
            // Someone else still observes the anchor; the movable stays as it was
            movable.attach_container_proxy(&mut self.links, self.container_link_type)?;
            return Err(err.into());
        }
        self.movables.remove(&entity);
        self.world.despawn(entity);
        log::debug!("Despawned movable {:?}", entity);
        Ok(true)
    }

    /// Put `child` into `container`, taking it out of any previous one
    pub fn attach_to_container(&mut self, child: Entity, container: Entity) -> MovementResult<LinkHandle> {
        let container = self
            .world
            .prototype(container)
            .ok_or(MovementError::DeadEntity(container))?;
        let movable = self.movables.get(&child).ok_or(MovementError::NotMovable(child))?;
        Ok(movable.container_proxy().connect_to(&mut self.links, &container)?)
    }

    /// Take `child` out of its container; false if it was not in one
    pub fn detach_from_container(&mut self, child: Entity) -> MovementResult<bool> {
        let movable = self.movables.get(&child).ok_or(MovementError::NotMovable(child))?;
        Ok(movable.container_proxy().disconnect_all(&mut self.links) > 0)
    }

    /// Move an entity instantly, skipping interpolation
    pub fn warp(&mut self, entity: Entity, position: Vec3, rotation: Quat) -> MovementResult<()> {
        let movable = self
            .movables
            .get_mut(&entity)
            .ok_or(MovementError::NotMovable(entity))?;
        movable.warp_to_position(position, rotation);

        let transform = self
            .world
            .get_component_mut::<Transform>(entity)
            .ok_or(MovementError::MissingTransform(entity))?;
        transform.position = position;
        transform.rotation = rotation;
        Ok(())
    }

    /// Advance by one rendered frame.
    ///
    /// Runs every tick that is due, calling `step` once per tick to move the
    /// simulation transforms, then interpolates all movables.
    pub fn advance<F>(&mut self, frame_dt: f64, mut step: F) -> MovementResult<FrameReport>
    where
        F: FnMut(&mut World, DeltaTime),
    {
        let ticks = self.time.begin_frame(frame_dt);
        for _ in 0..ticks {
            self.tick(&mut step)?;
        }

        let alpha = self.time.interpolation_alpha();
        let changed = self.render_frame(alpha);
        Ok(FrameReport { ticks, alpha, changed })
    }

    /// Run a single fixed tick.
    ///
    /// On failure every movable is rolled back out of the tick and the tick
    /// time stays unconsumed, so a later frame can retry.
    pub fn tick<F>(&mut self, step: F) -> MovementResult<()>
    where
        F: FnOnce(&mut World, DeltaTime),
    {
        let started = self
            .movables
            .values_mut()
            .try_for_each(MovableComponent::on_tick_start);
        if let Err(err) = started {
            self.abort_tick();
            return Err(err);
        }

        step(&mut self.world, self.time.tick_duration());

        let simulated: Result<Vec<Transform>, Entity> = self
            .movables
            .keys()
            .map(|entity| {
                self.world
                    .get_component::<Transform>(*entity)
                    .copied()
                    .ok_or(*entity)
            })
            .collect();
        let simulated = match simulated {
            Ok(simulated) => simulated,
            Err(entity) => {
                self.abort_tick();
                return Err(MovementError::MissingTransform(entity));
            }
        };

        for (movable, transform) in self.movables.values_mut().zip(&simulated) {
            movable.on_tick_end(transform)?;
        }

        self.time.consume_tick();
        tracing::trace!(tick = self.time.tick_count(), "Simulation tick");
        Ok(())
    }

    fn abort_tick(&mut self) {
        let aborted = self
            .movables
            .values_mut()
            .map(MovableComponent::abort_tick)
            .filter(|aborted| *aborted)
            .count();
        log::warn!("Tick {} aborted, {} movables rolled back", self.time.tick_count() + 1, aborted);
    }

    /// Interpolate every movable at `alpha` and publish what changed.
    ///
    /// Returns the number of rendered transforms that changed.
    pub fn render_frame(&mut self, alpha: f32) -> usize {
        let mut changed: Vec<Entity> = self
            .movables
            .par_iter_mut()
            .filter_map(|(entity, movable)| movable.apply_interpolation(alpha).then_some(*entity))
            .collect();

        changed.extend(self.place_linked_children());

        for entity in &changed {
            if let Some(movable) = self.movables.get(entity) {
                self.world
                    .add_component(*entity, RenderTransform(*movable.rendered_transform()));
            }
        }

        tracing::trace!(alpha, changed = changed.len(), "Interpolation pass");
        changed.len()
    }

    /// Linked children follow their container's rendered transform.
    ///
    /// Nested containers settle one level per frame.
    fn place_linked_children(&mut self) -> Vec<Entity> {
        let map_id = self.world.map_id();
        let followers: Vec<(Entity, Entity)> = self
            .movables
            .iter()
            .filter(|(_, movable)| movable.is_linked_child())
            .filter_map(|(entity, movable)| {
                movable
                    .container(&self.links)
                    .filter(|container| container.map_id == map_id)
                    .map(|container| (*entity, container.entity))
            })
            .collect();

        let mut moved = Vec::new();
        for (entity, container) in followers {
            let carrier = match self.movables.get(&container) {
                Some(movable) => Some(*movable.rendered_transform()),
                None => self.world.get_component::<Transform>(container).copied(),
            };
            let Some(carrier) = carrier else {
                continue;
            };
            if let Some(movable) = self.movables.get_mut(&entity) {
                if movable.follow_container(&carrier) {
                    moved.push(entity);
                }
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use qsf_link::{LinkDirection, LinkError, LinkProxy};

    use crate::movable::TickPhase;

    fn config(tick_rate: f64) -> EngineConfig {
        EngineConfig {
            tick_rate,
            ..EngineConfig::default()
        }
    }

    fn push_x(entities: Vec<Entity>) -> impl FnMut(&mut World, DeltaTime) {
        move |world, _dt| {
            for entity in &entities {
                if let Some(transform) = world.get_component_mut::<Transform>(*entity) {
                    transform.position.x += 1.0;
                }
            }
        }
    }

    fn rendered(sim: &Simulation, entity: Entity) -> Vec3 {
        sim.world()
            .get_component::<RenderTransform>(entity)
            .map(|render| render.0.position)
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Simulation::new(&config(0.0)),
            Err(MovementError::Config(_))
        ));
    }

    #[test]
    fn test_advance_interpolates_between_ticks() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let entity = sim.spawn_movable(Transform::IDENTITY).unwrap();

        let report = sim.advance(0.15, push_x(vec![entity])).unwrap();
        assert_eq!(report.ticks, 1);
        assert!((report.alpha - 0.5).abs() < 1e-3);
        assert_eq!(report.changed, 1);

        assert!(rendered(&sim, entity).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-3));
        let movable = sim.movable(entity).unwrap();
        assert!(movable.position().abs_diff_eq(Vec3::X, 1e-6));
        assert!(movable.is_moving());
    }

    #[test]
    fn test_ticks_capped_per_frame() {
        let mut sim = Simulation::new(&EngineConfig {
            tick_rate: 30.0,
            max_ticks_per_frame: 2,
            ..EngineConfig::default()
        })
        .unwrap();
        sim.spawn_movable(Transform::IDENTITY).unwrap();

        let report = sim.advance(0.25, |_, _| {}).unwrap();
        assert_eq!(report.ticks, 2);
        assert_eq!(sim.time().tick_count(), 2);
    }

    #[test]
    fn test_paused_runs_no_ticks() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        sim.time_mut().pause();
        let report = sim.advance(0.2, |_, _| {}).unwrap();
        assert_eq!(report.ticks, 0);
    }

    #[test]
    fn test_warp_shows_immediately() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let entity = sim.spawn_movable(Transform::IDENTITY).unwrap();
        sim.advance(0.15, push_x(vec![entity])).unwrap();

        let destination = Vec3::new(50.0, 0.0, 0.0);
        sim.warp(entity, destination, Quat::IDENTITY).unwrap();
        assert_eq!(sim.render_frame(0.3), 1);
        assert!(rendered(&sim, entity).abs_diff_eq(destination, 1e-5));

        let simulated = sim.world().get_component::<Transform>(entity).unwrap();
        assert!(simulated.position.abs_diff_eq(destination, 1e-5));
    }

    #[test]
    fn test_linked_child_rides_container() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let vehicle = sim.spawn_movable(Transform::IDENTITY).unwrap();
        let passenger = sim
            .spawn_movable(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)))
            .unwrap();
        sim.attach_to_container(passenger, vehicle).unwrap();

        sim.advance(0.15, push_x(vec![vehicle])).unwrap();
        assert!(rendered(&sim, passenger).abs_diff_eq(Vec3::new(0.5, 1.0, 0.0), 1e-3));

        assert!(sim.detach_from_container(passenger).unwrap());
        assert!(!sim.detach_from_container(passenger).unwrap());
    }

    #[test]
    fn test_despawn_container_releases_children() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let vehicle = sim.spawn_movable(Transform::IDENTITY).unwrap();
        let passenger = sim.spawn_movable(Transform::IDENTITY).unwrap();
        sim.attach_to_container(passenger, vehicle).unwrap();
        assert!(sim.movable(passenger).unwrap().is_linked_child());

        assert!(sim.despawn(vehicle).unwrap());
        assert!(!sim.despawn(vehicle).unwrap());
        assert!(!sim.movable(passenger).unwrap().is_linked_child());
        assert_eq!(sim.links().link_count(), 0);
        assert!(!sim.world().is_alive(vehicle));
    }

    #[test]
    fn test_despawn_refused_while_observed() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let vehicle = sim.spawn_movable(Transform::IDENTITY).unwrap();
        let passenger = sim.spawn_movable(Transform::IDENTITY).unwrap();
        sim.attach_to_container(passenger, vehicle).unwrap();

        let prototype = sim.movable(vehicle).unwrap().prototype();
        let mut observer = LinkProxy::new();
        observer
            .register_at(sim.links_mut(), &prototype, container_link_type(), LinkDirection::Forward)
            .unwrap();

        assert!(matches!(
            sim.despawn(vehicle),
            Err(MovementError::Link(LinkError::AnchorHasProxies { proxies: 1, .. }))
        ));
        assert!(sim.world().is_alive(vehicle));
        assert!(sim.movable(vehicle).unwrap().container_proxy().is_registered());
        assert!(sim.movable(passenger).unwrap().is_linked_child());

        assert!(observer.unregister(sim.links_mut()));
        assert!(sim.despawn(vehicle).unwrap());
        assert!(!sim.movable(passenger).unwrap().is_linked_child());
    }

    #[test]
    fn test_attach_to_dead_container() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let vehicle = sim.spawn_movable(Transform::IDENTITY).unwrap();
        let passenger = sim.spawn_movable(Transform::IDENTITY).unwrap();
        sim.despawn(vehicle).unwrap();

        assert!(matches!(
            sim.attach_to_container(passenger, vehicle),
            Err(MovementError::DeadEntity(_))
        ));
    }

    #[test]
    fn test_recovers_after_failed_tick() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let first = sim.spawn_movable(Transform::IDENTITY).unwrap();
        let second = sim.spawn_movable(Transform::IDENTITY).unwrap();
        sim.world_mut().remove_component::<Transform>(first);

        let result = sim.advance(0.15, push_x(vec![second]));
        assert!(matches!(result, Err(MovementError::MissingTransform(entity)) if entity == first));
        assert_eq!(sim.movable(first).unwrap().phase(), TickPhase::Idle);
        assert_eq!(sim.movable(second).unwrap().phase(), TickPhase::Idle);
        assert_eq!(sim.time().tick_count(), 0);

        // The unconsumed tick runs again once the transform is back
        sim.world_mut().add_component(first, Transform::IDENTITY);
        let report = sim.advance(0.1, push_x(vec![second])).unwrap();
        assert_eq!(report.ticks, 2);
        assert_eq!(sim.time().tick_count(), 2);
        assert!(sim.movable(second).unwrap().position().abs_diff_eq(Vec3::new(3.0, 0.0, 0.0), 1e-5));
        assert_eq!(sim.movable(first).unwrap().phase(), TickPhase::Idle);
    }

    #[test]
    fn test_missing_transform_fails_tick() {
        let mut sim = Simulation::new(&config(10.0)).unwrap();
        let entity = sim.spawn_movable(Transform::IDENTITY).unwrap();
        sim.world_mut().remove_component::<Transform>(entity);

        assert!(matches!(
            sim.advance(0.15, |_, _| {}),
            Err(MovementError::MissingTransform(_))
        ));
    }
}
