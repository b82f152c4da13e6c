//! Tagged output features.

use serde::{Deserialize, Serialize};
use terravis_math::Point3;

/// Visibility tag attached to every emitted feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Seen from the eye.
    Visible,
    /// Hidden by terrain.
    Invisible,
}

impl Visibility {
    /// Tag for a boolean visibility flag.
    pub fn from_flag(visible: bool) -> Self {
        if visible {
            Visibility::Visible
        } else {
            Visibility::Invisible
        }
    }

    /// Whether this is [`Visibility::Visible`].
    pub fn is_visible(self) -> bool {
        self == Visibility::Visible
    }
}

/// Receiver for points, polylines and rings produced by the sweeps.
pub trait FeatureSink {
    /// Accept one feature. A single point is a one-element slice.
    fn emit(&mut self, tag: Visibility, geometry: &[Point3]);
}

impl<F> FeatureSink for F
where
    F: FnMut(Visibility, &[Point3]),
{
    fn emit(&mut self, tag: Visibility, geometry: &[Point3]) {
        self(tag, geometry)
    }
}
