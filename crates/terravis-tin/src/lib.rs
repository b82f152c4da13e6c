#![warn(missing_docs)]

//! Triangulated terrain surfaces for the terravis visibility engine.
//!
//! The visibility algorithms only talk to the [`Surface`] trait. [`Tin`] is
//! the in-memory implementation: a counter-clockwise triangulation with void
//! flags, constant-time neighbour queries, a grid index for point location,
//! and constrained segment insertion that preserves the surface shape.
//!
//! # Example
//!
//! ```ignore
//! use terravis_tin::{Surface, Tin};
//!
//! let tin = Tin::from_grid(11, 11, 10.0, |x, y| (x * 0.1).sin() + y * 0.05)?;
//! let z = tin.locate(42.0, 17.0).elevation();
//! ```

pub mod accel;
pub mod error;
mod insert;
pub mod surface;
pub mod tin;

pub use accel::TriangleGrid;
pub use error::{Result, TinError};
pub use surface::{DrapeKind, DrapePoint, Location, PointId, Surface};
pub use tin::Tin;
