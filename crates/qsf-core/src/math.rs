//! Math utilities
//!
//! Re-exports from glam and the small amount of rotation math the movement
//! layer needs on top of it.

pub use glam::{Quat, Vec3};

/// Rotation taking `from` to `to` along the shortest arc, as a scaled axis
/// (axis times angle in radians).
pub fn rotation_delta(from: Quat, to: Quat) -> Vec3 {
    let mut delta = to * from.inverse();
    // q and -q are the same rotation; pick the short way round
    if delta.w < 0.0 {
        delta = -delta;
    }
    delta.normalize().to_scaled_axis()
}

/// Rotate `rotation` by a scaled-axis delta
pub fn apply_rotation_delta(rotation: Quat, delta: Vec3) -> Quat {
    (Quat::from_scaled_axis(delta) * rotation).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_delta_roundtrip() {
        let from = Quat::from_rotation_y(0.2);
        let to = Quat::from_rotation_y(0.9);

        let delta = rotation_delta(from, to);
        assert!(delta.abs_diff_eq(Vec3::new(0.0, 0.7, 0.0), 1e-5));

        let rebuilt = apply_rotation_delta(from, delta);
        assert!(rebuilt.abs_diff_eq(to, 1e-5));
    }

    #[test]
    fn test_rotation_delta_takes_short_arc() {
        let from = Quat::IDENTITY;
        let to = -Quat::from_rotation_z(0.1);

        let delta = rotation_delta(from, to);
        assert!((delta.length() - 0.1).abs() < 1e-5);
    }
}
