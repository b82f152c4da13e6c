//! Visibility engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VisibilityError};

/// Tuning parameters shared by index construction and the sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilitySettings {
    /// Run the iterative partial-clipping simplifier after pruning.
    pub iterative_simplification: bool,
    /// Deactivate horizon lines wholly hidden behind a nearer line.
    pub prune_covered_lines: bool,
    /// Upper bound on iterative simplification passes.
    pub max_simplify_passes: usize,
    /// Height added to mesh points before the point sweep tests them.
    pub point_offset: f64,
    /// Height added to mesh edges in the line sweep and to triangle
    /// centroids in the region viewshed.
    pub line_offset: f64,
    /// Break segments shorter than this are discarded.
    pub break_line_tolerance: f64,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            iterative_simplification: false,
            prune_covered_lines: true,
            max_simplify_passes: 32,
            point_offset: 1e-6,
            line_offset: 1e-5,
            break_line_tolerance: 1e-6,
        }
    }
}

impl VisibilitySettings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_simplify_passes == 0 {
            return Err(VisibilityError::Unsupported(
                "max_simplify_passes must be at least 1".into(),
            ));
        }
        if !self.point_offset.is_finite() || self.point_offset < 0.0 {
            return Err(VisibilityError::Unsupported(
                "point_offset must be a non-negative number".into(),
            ));
        }
        if !self.line_offset.is_finite() || self.line_offset < 0.0 {
            return Err(VisibilityError::Unsupported(
                "line_offset must be a non-negative number".into(),
            ));
        }
        if !self.break_line_tolerance.is_finite() || self.break_line_tolerance <= 0.0 {
            return Err(VisibilityError::Unsupported(
                "break_line_tolerance must be positive".into(),
            ));
        }
        Ok(())
    }
}
