//! Movement errors

use thiserror::Error;

use qsf_core::{ConfigError, Entity};
use qsf_link::LinkError;

/// Movement and simulation errors
#[derive(Error, Debug)]
pub enum MovementError {
    #[error("Tick already in progress for entity {0:?}")]
    TickInProgress(Entity),

    #[error("No tick in progress for entity {0:?}")]
    NoTickInProgress(Entity),

    #[error("Invalid tick duration: {0}")]
    InvalidTickDuration(f32),

    #[error("Entity {0:?} has no movable component")]
    NotMovable(Entity),

    #[error("Entity {0:?} is not alive")]
    DeadEntity(Entity),

    #[error("Entity {0:?} has no simulation transform")]
    MissingTransform(Entity),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for movement operations
pub type MovementResult<T> = Result<T, MovementError>;
