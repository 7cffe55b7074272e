//! # QSF Movement
//!
//! Fixed-rate simulation with variable-rate rendering for moving entities.
//!
//! - **Tick interpolation**: Constant-rate blending between the last two tick samples
//! - **Movables**: Per-entity simulation/rendered transform pair, warps, bias and velocity
//! - **Simulation**: Frame driver running ticks, then a parallel interpolation pass

pub mod error;
pub mod movable;
pub mod simulation;
pub mod tick_interpolation;

pub use error::{MovementError, MovementResult};
pub use movable::{MOVING_EPSILON_SQUARED, MovableComponent, MovableFlags, TickPhase};
pub use simulation::{
    CONTAINER_LINK_TYPE_NAME, FrameReport, RenderTransform, Simulation, container_link_type,
};
pub use tick_interpolation::TickInterpolationHelper;
