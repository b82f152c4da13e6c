#![warn(missing_docs)]

//! Terrain line-of-sight and viewshed analysis over triangulated surfaces.
//!
//! A [`VisibilityIndex`] captures everything seen from one eye: the
//! silhouette edges of the surface (the horizon table), simplified and
//! indexed by azimuth. Point, edge and line queries run against the index;
//! the radial and region viewsheds and the whole-surface sweeps emit tagged
//! features through a [`FeatureSink`].
//!
//! # Example
//!
//! ```ignore
//! use terravis::{build_visibility_index, is_point_visible, VisibilitySettings};
//! use terravis_tin::Tin;
//! use terravis_math::Point3;
//!
//! let tin = Tin::from_grid(51, 51, 2.0, |x, y| (x * 0.1).sin() * (y * 0.1).cos())?;
//! let eye = Point3::new(50.0, 50.0, 4.0);
//! let index = build_visibility_index(&tin, &eye, &VisibilitySettings::default())?;
//!
//! let seen = is_point_visible(&index, &Point3::new(90.0, 10.0, 1.0));
//! ```

pub mod error;
pub mod feature;
pub mod horizon;
pub mod index;
pub mod query;
pub mod radial;
pub mod region;
pub mod settings;
pub mod simplify;
pub mod sweep;
pub mod trace;

pub use error::{Result, VisibilityError, GROWTH_CHUNK};
pub use feature::{FeatureSink, Visibility};
pub use horizon::{build_horizon_table, HorizonLine, HorizonTable};
pub use index::{
    build_visibility_index, check_eye, check_target, ensure_current, AngleBreakpoint, AngleIndex,
    EventKind, VisibilityIndex,
};
pub use query::{
    edge_visibility, is_point_visible, line_visibility, point_visible_brute_force,
    query_line_visibility, query_point_visible, EdgeVisibility, LineVerdict, LineVisibility,
};
pub use radial::{radial_viewshed, radial_visibility, RadialSpacing};
pub use region::{region_viewshed, ViewshedPolygon};
pub use settings::VisibilitySettings;
pub use simplify::{prune_covered_lines, simplify};
pub use sweep::{
    point_visibility_by_drape, tin_lines_visibility, tin_points_visibility, visibility_lattice,
    SweepSummary, VisibilityLattice,
};
pub use trace::{LineOfSightTrace, StoreMode, TraceSegment};
