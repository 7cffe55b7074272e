//! Tick interpolation
//!
//! Blends between the transforms of the last two simulation ticks. The
//! segment is rebuilt lazily on the first evaluation after it changes.
//! Position moves linearly and rotation at constant angular velocity along
//! the shortest arc.

use glam::{Quat, Vec3};

use qsf_core::Transform;
use qsf_core::math::{apply_rotation_delta, rotation_delta};

/// Constant-rate segment between two transforms
#[derive(Debug, Clone, Copy, PartialEq)]
struct InterpolationSegment {
    linear_change: Vec3,
    angular_change: Vec3,
    scale_change: Vec3,
}

impl InterpolationSegment {
    fn between(from: &Transform, to: &Transform) -> Self {
        Self {
            linear_change: to.position - from.position,
            angular_change: rotation_delta(from.rotation, to.rotation),
            scale_change: to.scale - from.scale,
        }
    }
}

/// Former/current transform pair of one movable
#[derive(Debug, Clone)]
pub struct TickInterpolationHelper {
    from: Transform,
    to: Transform,
    segment: Option<InterpolationSegment>,
}

impl TickInterpolationHelper {
    /// Create a helper resting at `transform`
    pub fn new(transform: Transform) -> Self {
        Self {
            from: transform,
            to: transform,
            segment: None,
        }
    }

    /// Start of the segment
    pub fn from(&self) -> &Transform {
        &self.from
    }

    /// End of the segment
    pub fn to(&self) -> &Transform {
        &self.to
    }

    /// Replace the segment and mark it dirty
    pub fn set_segment(&mut self, from: Transform, to: Transform) {
        self.from = from;
        self.to = to;
        self.segment = None;
    }

    /// Collapse the segment onto a single transform
    pub fn reset(&mut self, transform: Transform) {
        self.set_segment(transform, transform);
    }

    /// Check if the segment needs rebuilding before the next evaluation
    pub fn is_dirty(&self) -> bool {
        self.segment.is_none()
    }

    /// Position change over the whole segment
    pub fn linear_change(&self) -> Vec3 {
        self.to.position - self.from.position
    }

    /// Rotation over the whole segment as a scaled axis
    pub fn angular_change(&self) -> Vec3 {
        rotation_delta(self.from.rotation, self.to.rotation)
    }

    /// Transform at fraction `t` of the segment, `t` clamped to `[0, 1]`
    pub fn evaluate(&mut self, t: f32) -> Transform {
        let t = t.clamp(0.0, 1.0);
        if t <= 0.0 {
            return self.from;
        }
        if t >= 1.0 {
            return self.to;
        }

        let from = self.from;
        let to = self.to;
        let segment = *self
            .segment
            .get_or_insert_with(|| InterpolationSegment::between(&from, &to));

        Transform {
            position: from.position + segment.linear_change * t,
            rotation: blend_rotation(from.rotation, segment.angular_change, t),
            scale: from.scale + segment.scale_change * t,
        }
    }
}

fn blend_rotation(from: Quat, angular_change: Vec3, t: f32) -> Quat {
    apply_rotation_delta(from, angular_change * t)
}
