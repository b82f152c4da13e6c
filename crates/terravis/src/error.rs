//! Error types for visibility analysis.

use terravis_tin::TinError;
use thiserror::Error;

/// Errors that can occur while building or querying visibility.
#[derive(Error, Debug)]
pub enum VisibilityError {
    /// The surface is unusable for visibility analysis.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// The surface collaborator rejected an operation.
    #[error("invalid mesh: {0}")]
    Surface(#[from] TinError),

    /// The eye is off the surface or over a void.
    #[error("eye is outside the surface")]
    EyeOutsideSurface,

    /// The eye is below the surface at its own position.
    #[error("eye is below the surface")]
    EyeBelowSurface,

    /// The target is off the surface or over a void.
    #[error("target is outside the surface")]
    TargetOutsideSurface,

    /// The target is below the surface at its own position.
    #[error("target is below the surface")]
    TargetBelowSurface,

    /// A table, pool or trace could not grow.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The angle index sweep found inconsistent events.
    #[error("angle index corrupt: {0}")]
    IndexCorrupt(String),

    /// Invalid settings.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// Result type for visibility operations.
pub type Result<T> = std::result::Result<T, VisibilityError>;

/// Entries added whenever a growable table runs out of room.
pub const GROWTH_CHUNK: usize = 1000;

/// Make room for at least one more element, growing in [`GROWTH_CHUNK`] steps.
pub(crate) fn reserve_chunk<T>(v: &mut Vec<T>, what: &str) -> Result<()> {
    if v.len() == v.capacity() {
        v.try_reserve_exact(GROWTH_CHUNK)
            .map_err(|e| VisibilityError::OutOfMemory(format!("{what}: {e}")))?;
    }
    Ok(())
}
