//! Error types for triangulated surfaces.

use thiserror::Error;

/// Errors raised while building or editing a [`Tin`](crate::Tin).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TinError {
    /// Mesh has no triangles.
    #[error("mesh is empty")]
    Empty,

    /// A triangle references a point that does not exist.
    #[error("triangle {triangle} references point {point} but the mesh has {count} points")]
    IndexOutOfRange {
        /// Offending triangle.
        triangle: usize,
        /// Referenced point id.
        point: usize,
        /// Number of points in the mesh.
        count: usize,
    },

    /// A triangle has repeated or collinear vertices.
    #[error("triangle {0} is degenerate")]
    DegenerateTriangle(usize),

    /// A directed edge appears in more than one triangle.
    #[error("edge {0}-{1} is shared by more than two triangles")]
    NonManifoldEdge(usize, usize),

    /// A location lies outside every triangle.
    #[error("point ({0}, {1}) is outside the surface")]
    OutsideSurface(f64, f64),

    /// Constrained segment insertion could not complete.
    #[error("constrained insertion failed: {0}")]
    InsertionFailed(String),
}

/// Result type for surface operations.
pub type Result<T> = std::result::Result<T, TinError>;
