//! Movable component
//!
//! Keeps two transforms per entity: the authoritative simulation transform,
//! updated once per fixed tick, and the rendered transform recomputed every
//! frame by blending the last two tick samples.
//!
//! Per tick the owner calls [`MovableComponent::on_tick_start`], lets the
//! simulation move the entity, then hands the resulting transform to
//! [`MovableComponent::on_tick_end`]. Every frame
//! [`MovableComponent::apply_interpolation`] produces the visible transform.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use qsf_core::{Entity, Prototype, Transform};
use qsf_link::{LinkDirection, LinkEvent, LinkProxy, LinkProxyListener, LinkSystem, LinkTypeId};

use crate::error::{MovementError, MovementResult};
use crate::tick_interpolation::TickInterpolationHelper;

/// Squared speed above which a movable counts as moving
pub const MOVING_EPSILON_SQUARED: f32 = 1e-6;

/// Rendered transforms closer than this are considered unchanged
const RENDER_EPSILON: f32 = 1e-6;

/// Where a movable is in its tick/frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Rendered transform matches the simulation, nothing to blend
    Idle,
    /// Between `on_tick_start` and `on_tick_end`
    TickActive,
    /// A former/current pair is ready for blending
    InterpolationReady,
}

/// Internal state flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovableFlags {
    pub interpolation_active: bool,
    /// Carried by a container; the rendered transform follows it
    pub linked_child: bool,
    /// Hard reset this tick, never blended
    pub warped: bool,
    pub in_tick_update: bool,
    /// Report moving regardless of velocity
    pub moving_override: bool,
    pub has_bias: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Derivatives {
    velocity: Vec3,
    angular_velocity: Vec3,
    acceleration: Vec3,
    angular_acceleration: Vec3,
}

/// Persistent part of a movable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MovableState {
    flags: MovableFlags,
    former: Transform,
    former_velocity: Vec3,
    former_angular_velocity: Vec3,
    current: Transform,
    transform_bias: Transform,
}

/// Counts container links ending at the movable
struct ContainerListener {
    container_links: Arc<AtomicUsize>,
}

impl LinkProxyListener for ContainerListener {
    fn on_link_added(&mut self, _event: &LinkEvent) {
        self.container_links.fetch_add(1, Ordering::Relaxed);
    }

    fn on_link_removed(&mut self, _event: &LinkEvent) {
        let _ = self
            .container_links
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| count.checked_sub(1));
    }
}

/// Movement state of one entity
#[derive(Debug)]
pub struct MovableComponent {
    prototype: Prototype,
    tick_duration: f32,
    flags: MovableFlags,

    former: Transform,
    former_velocity: Vec3,
    former_angular_velocity: Vec3,
    current: Transform,
    derivatives: Cell<Option<Derivatives>>,

    transform_bias: Transform,
    rendered: Transform,
    interpolation: TickInterpolationHelper,

    container_proxy: LinkProxy,
    container_links: Arc<AtomicUsize>,
}

impl MovableComponent {
    /// Create a movable resting at `transform`
    pub fn new(prototype: Prototype, transform: Transform, tick_duration: f32) -> MovementResult<Self> {
        if !(tick_duration.is_finite() && tick_duration > 0.0) {
            return Err(MovementError::InvalidTickDuration(tick_duration));
        }

        let container_links = Arc::new(AtomicUsize::new(0));
        let container_proxy = LinkProxy::with_listener(ContainerListener {
            container_links: Arc::clone(&container_links),
        });

        Ok(Self {
            prototype,
            tick_duration,
            flags: MovableFlags::default(),
            former: transform,
            former_velocity: Vec3::ZERO,
            former_angular_velocity: Vec3::ZERO,
            current: transform,
            derivatives: Cell::new(None),
            transform_bias: Transform::IDENTITY,
            rendered: transform,
            interpolation: TickInterpolationHelper::new(transform),
            container_proxy,
            container_links,
        })
    }

    pub fn prototype(&self) -> Prototype {
        self.prototype
    }

    pub fn entity(&self) -> Entity {
        self.prototype.entity
    }

    pub fn flags(&self) -> MovableFlags {
        self.flags
    }

    /// Current phase, derived from the flags
    pub fn phase(&self) -> TickPhase {
        if self.flags.in_tick_update {
            TickPhase::TickActive
        } else if self.flags.interpolation_active {
            TickPhase::InterpolationReady
        } else {
            TickPhase::Idle
        }
    }

    /// Simulation position
    pub fn position(&self) -> Vec3 {
        self.current.position
    }

    /// Simulation rotation
    pub fn rotation(&self) -> Quat {
        self.current.rotation
    }

    /// Simulation transform
    pub fn transform(&self) -> &Transform {
        &self.current
    }

    /// Transform at the start of the last tick
    pub fn former_transform(&self) -> &Transform {
        &self.former
    }

    pub fn former_position(&self) -> Vec3 {
        self.former.position
    }

    pub fn former_rotation(&self) -> Quat {
        self.former.rotation
    }

    pub fn former_velocity(&self) -> Vec3 {
        self.former_velocity
    }

    pub fn former_angular_velocity(&self) -> Vec3 {
        self.former_angular_velocity
    }

    /// Visible transform produced by the last interpolation
    pub fn rendered_transform(&self) -> &Transform {
        &self.rendered
    }

    /// Linear velocity over the last completed tick
    pub fn velocity(&self) -> Vec3 {
        self.derivatives().velocity
    }

    /// Angular velocity over the last completed tick, as a scaled axis per second
    pub fn angular_velocity(&self) -> Vec3 {
        self.derivatives().angular_velocity
    }

    pub fn acceleration(&self) -> Vec3 {
        self.derivatives().acceleration
    }

    pub fn angular_acceleration(&self) -> Vec3 {
        self.derivatives().angular_acceleration
    }

    fn derivatives(&self) -> Derivatives {
        if let Some(cached) = self.derivatives.get() {
            return cached;
        }

        let dt = self.tick_duration;
        let velocity = self.interpolation.linear_change() / dt;
        let angular_velocity = self.interpolation.angular_change() / dt;
        let derivatives = Derivatives {
            velocity,
            angular_velocity,
            acceleration: (velocity - self.former_velocity) / dt,
            angular_acceleration: (angular_velocity - self.former_angular_velocity) / dt,
        };
        self.derivatives.set(Some(derivatives));
        derivatives
    }

    /// True if forced by the override, or the speed exceeds a small epsilon
    pub fn is_moving(&self) -> bool {
        self.flags.moving_override || self.velocity().length_squared() > MOVING_EPSILON_SQUARED
    }

    /// Force [`is_moving`](Self::is_moving) to report true
    pub fn set_moving_override(&mut self, moving: bool) {
        self.flags.moving_override = moving;
    }

    /// Offset applied in local space on top of the blended transform
    pub fn transform_bias(&self) -> Option<&Transform> {
        self.flags.has_bias.then_some(&self.transform_bias)
    }

    /// Set or clear the transform bias; takes effect with the next interpolation
    pub fn set_transform_bias(&mut self, bias: Option<Transform>) {
        self.flags.has_bias = bias.is_some();
        self.transform_bias = bias.unwrap_or(Transform::IDENTITY);
        self.flags.interpolation_active = true;
    }

    /// Capture the current transform as the former sample
    pub fn on_tick_start(&mut self) -> MovementResult<()> {
        if self.flags.in_tick_update {
            return Err(MovementError::TickInProgress(self.entity()));
        }
        self.refresh_linked_child();

        self.former = self.current;
        self.flags.warped = false;
        self.flags.in_tick_update = true;
        Ok(())
    }

    /// Take the simulated transform and arm the interpolation segment
    pub fn on_tick_end(&mut self, simulated: &Transform) -> MovementResult<()> {
        if !self.flags.in_tick_update {
            return Err(MovementError::NoTickInProgress(self.entity()));
        }
        self.flags.in_tick_update = false;

        if self.flags.warped {
            self.former = *simulated;
            self.former_velocity = Vec3::ZERO;
            self.former_angular_velocity = Vec3::ZERO;
        } else {
            let previous = self.derivatives();
            self.former_velocity = previous.velocity;
            self.former_angular_velocity = previous.angular_velocity;
        }

        self.current = *simulated;
        self.interpolation.set_segment(self.former, self.current);
        self.derivatives.set(None);

        let settled = self.former.abs_diff_eq(&self.current, RENDER_EPSILON)
            && self.rendered.abs_diff_eq(&self.visible(self.current), RENDER_EPSILON);
        self.flags.interpolation_active = self.flags.warped || !settled;
        Ok(())
    }

    /// Leave an unfinished tick without taking a simulated transform.
    ///
    /// The former sample goes back to the start of the armed segment, so the
    /// next frame blends exactly as it would have before the tick started.
    /// Returns false if no tick was in progress.
    pub fn abort_tick(&mut self) -> bool {
        if !self.flags.in_tick_update {
            return false;
        }
        self.flags.in_tick_update = false;
        self.former = *self.interpolation.from();
        true
    }

    /// Move instantly; the next interpolation shows the new transform unblended
    pub fn warp_to_position(&mut self, position: Vec3, rotation: Quat) {
        let warped = Transform::new(position, rotation, self.current.scale);
        self.current = warped;
        self.former = warped;
        self.former_velocity = Vec3::ZERO;
        self.former_angular_velocity = Vec3::ZERO;
        self.interpolation.reset(warped);
        self.derivatives.set(None);
        self.flags.warped = true;
        self.flags.interpolation_active = true;
        log::debug!("Warped entity {:?} to {}", self.entity(), position);
    }

    /// Blend the last two tick samples at `t` in `[0, 1]`.
    ///
    /// Returns whether the rendered transform changed.
    pub fn apply_interpolation(&mut self, t: f32) -> bool {
        self.refresh_linked_child();
        if self.flags.in_tick_update || self.flags.linked_child || !self.flags.interpolation_active {
            return false;
        }

        let blended = if self.flags.warped {
            self.current
        } else {
            self.interpolation.evaluate(t)
        };
        self.set_rendered(self.visible(blended))
    }

    /// Place a linked child relative to its container's rendered transform
    pub fn follow_container(&mut self, container: &Transform) -> bool {
        self.set_rendered(self.visible(container.compose(&self.current)))
    }

    fn visible(&self, transform: Transform) -> Transform {
        if self.flags.has_bias {
            transform.compose(&self.transform_bias)
        } else {
            transform
        }
    }

    fn set_rendered(&mut self, rendered: Transform) -> bool {
        let changed = !rendered.abs_diff_eq(&self.rendered, RENDER_EPSILON);
        self.rendered = rendered;
        changed
    }

    /// Register the container proxy backward at this movable's own anchor
    pub fn attach_container_proxy(
        &mut self,
        links: &mut LinkSystem,
        container_link_type: LinkTypeId,
    ) -> MovementResult<()> {
        self.container_proxy
            .register_at(links, &self.prototype, container_link_type, LinkDirection::Backward)?;
        let existing = self.container_proxy.connection_map(links).len();
        self.container_links.store(existing, Ordering::Relaxed);
        self.refresh_linked_child();
        Ok(())
    }

    /// Release the container proxy registration
    pub fn detach_container_proxy(&mut self, links: &mut LinkSystem) -> bool {
        self.container_proxy.unregister(links)
    }

    /// Proxy observing the container link
    pub fn container_proxy(&self) -> &LinkProxy {
        &self.container_proxy
    }

    /// Prototype of the container carrying this movable
    pub fn container(&self, links: &LinkSystem) -> Option<Prototype> {
        self.container_proxy.remote::<Prototype>(links)
    }

    /// Check if a container link currently ends here
    pub fn is_linked_child(&self) -> bool {
        self.container_links.load(Ordering::Relaxed) > 0
    }

    fn refresh_linked_child(&mut self) {
        let linked = self.is_linked_child();
        if linked != self.flags.linked_child {
            self.flags.linked_child = linked;
            // Leaving a container resumes blending from wherever it was shown
            self.flags.interpolation_active = true;
        }
    }

    /// Encode the persistent state
    pub fn serialize(&self) -> MovementResult<Vec<u8>> {
        let mut flags = self.flags;
        flags.in_tick_update = false;
        let state = MovableState {
            flags,
            former: self.former,
            former_velocity: self.former_velocity,
            former_angular_velocity: self.former_angular_velocity,
            current: self.current,
            transform_bias: self.transform_bias,
        };
        Ok(bincode::serialize(&state)?)
    }

    /// Restore state written by [`serialize`](Self::serialize).
    ///
    /// Identity and link registration are kept; the rendered transform snaps
    /// to the restored simulation transform.
    pub fn deserialize(&mut self, bytes: &[u8]) -> MovementResult<()> {
        let state: MovableState = bincode::deserialize(bytes)?;

        self.flags = MovableFlags {
            linked_child: self.is_linked_child(),
            in_tick_update: false,
            ..state.flags
        };
        self.former = state.former;
        self.former_velocity = state.former_velocity;
        self.former_angular_velocity = state.former_angular_velocity;
        self.current = state.current;
        self.transform_bias = state.transform_bias;
        self.interpolation.set_segment(self.former, self.current);
        self.derivatives.set(None);
        self.rendered = self.visible(self.current);
        Ok(())
    }
}
