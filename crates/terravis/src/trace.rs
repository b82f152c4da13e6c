//! Line-of-sight trace accumulator.
//!
//! A trace is an ordered list of `(point, visible)` entries. Every query and
//! sweep stores run boundaries in pairs, so entries `2k` and `2k + 1` are the
//! two ends of one visible or invisible run.

use terravis_math::Point3;

use crate::error::{reserve_chunk, Result};
use crate::feature::{FeatureSink, Visibility};

/// Suppression rule applied by [`LineOfSightTrace::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Always store.
    Always,
    /// Skip when the flag equals the last stored flag.
    SkipSameVisibility,
    /// Skip when the point equals the last stored point.
    SkipSamePoint,
}

/// One run read back from a trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSegment {
    /// Run start.
    pub start: Point3,
    /// Run end.
    pub end: Point3,
    /// Whether the run is visible.
    pub visible: bool,
}

impl TraceSegment {
    /// 3D length of the run.
    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }
}

/// Visible and invisible run boundaries along a path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineOfSightTrace {
    entries: Vec<(Point3, bool)>,
}

impl LineOfSightTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the trace is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored entries in order.
    pub fn entries(&self) -> &[(Point3, bool)] {
        &self.entries
    }

    /// Append an entry unless `mode` suppresses it. Returns whether the
    /// entry was stored.
    pub fn push(&mut self, point: Point3, visible: bool, mode: StoreMode) -> Result<bool> {
        if let Some(&(last_point, last_visible)) = self.entries.last() {
            let skip = match mode {
                StoreMode::Always => false,
                StoreMode::SkipSameVisibility => last_visible == visible,
                StoreMode::SkipSamePoint => last_point == point,
            };
            if skip {
                return Ok(false);
            }
        }
        reserve_chunk(&mut self.entries, "line of sight trace")?;
        self.entries.push((point, visible));
        Ok(true)
    }

    /// Consecutive entry pairs as runs. A trailing unpaired entry is ignored.
    pub fn segments(&self) -> impl Iterator<Item = TraceSegment> + '_ {
        self.entries.chunks_exact(2).map(|pair| TraceSegment {
            start: pair[0].0,
            end: pair[1].0,
            visible: pair[0].1,
        })
    }

    /// Total length of visible runs.
    pub fn visible_length(&self) -> f64 {
        self.segments()
            .filter(|s| s.visible)
            .map(|s| s.length())
            .sum()
    }

    /// Total length of invisible runs.
    pub fn invisible_length(&self) -> f64 {
        self.segments()
            .filter(|s| !s.visible)
            .map(|s| s.length())
            .sum()
    }

    /// Whole-path verdict: invisible when more of it is hidden than seen.
    pub fn majority_verdict(&self) -> Visibility {
        Visibility::from_flag(self.invisible_length() <= self.visible_length())
    }

    /// Emit every run as a two-point polyline.
    pub fn emit<F: FeatureSink + ?Sized>(&self, sink: &mut F) {
        for s in self.segments() {
            sink.emit(Visibility::from_flag(s.visible), &[s.start, s.end]);
        }
    }
}
