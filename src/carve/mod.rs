//! Seam carving: the per-seam GPU pipeline and the orchestrator driving it.
//!
//! A vertical seam removes one column: the cost map is accumulated row by
//! row (top to bottom) and the seam holds one x coordinate per row. A
//! horizontal seam is the transpose: columns left to right, one y per column.

mod engine;
mod inspect;
mod pipeline;
mod resources;
mod session;

use std::cmp::Ordering;

pub use engine::GpuSeamEngine;
pub use inspect::SeamTrace;
pub use session::{
    CarveSession, CarveState, CarveStats, HistorySummary, SeamEngine, SeamJob, TickReport,
};

/// Workgroup width of the line-parallel kernels (cost, reduction).
pub const LINE_WORKGROUP_SIZE: u32 = 256;
/// Workgroup edge of the 2D kernels (prepare, energy, remove).
pub const TILE_WORKGROUP_SIZE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Removes a column; one x coordinate per row.
    Vertical,
    /// Removes a row; one y coordinate per column.
    Horizontal,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Vertical, Axis::Horizontal];

    pub(crate) fn as_u32(self) -> u32 {
        match self {
            Self::Vertical => 0,
            Self::Horizontal => 1,
        }
    }

    /// Number of lines the cost map is accumulated over (rows for vertical).
    pub fn line_count(self, size: Dimensions) -> u32 {
        match self {
            Self::Vertical => size.height,
            Self::Horizontal => size.width,
        }
    }

    /// Entries per line; the seam coordinate ranges over `0..line_extent`.
    pub fn line_extent(self, size: Dimensions) -> u32 {
        match self {
            Self::Vertical => size.width,
            Self::Horizontal => size.height,
        }
    }

    /// Size after removing one seam along this axis.
    pub fn shrink(self, size: Dimensions) -> Dimensions {
        match self {
            Self::Vertical => Dimensions::new(size.width.saturating_sub(1), size.height),
            Self::Horizontal => Dimensions::new(size.width, size.height.saturating_sub(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn fits_within(self, max: u32) -> bool {
        self.width <= max && self.height <= max
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Cheapest seam endpoint found by the reducer.
///
/// The GPU stores it as `vec2<u32>(cost_bits, index)`. Reinterpreting a
/// non-negative IEEE-754 float as `u32` preserves its ordering, so records
/// compare as `(cost_bits, index)`: lowest cost first, lowest index on ties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinIndexRecord {
    pub cost: f32,
    pub index: u32,
}

impl MinIndexRecord {
    pub fn encode(self) -> [u32; 2] {
        [self.cost.to_bits(), self.index]
    }

    pub fn decode(raw: [u32; 2]) -> Self {
        Self {
            cost: f32::from_bits(raw[0]),
            index: raw[1],
        }
    }

    fn key(self) -> (u32, u32) {
        (self.cost.to_bits(), self.index)
    }
}

impl Eq for MinIndexRecord {}

impl PartialOrd for MinIndexRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinIndexRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

pub(crate) fn workgroups(extent: u32, size: u32) -> u32 {
    extent.div_ceil(size)
}
