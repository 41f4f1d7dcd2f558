//! Grid inference and acceptance boxes
//!
//! Reward positions sit at the centers of cells of a regular floor grid. The
//! cell pitch is not configured; it is inferred from the layout as the
//! smallest positive spacing between distinct coordinates on each horizontal
//! axis. A commit counts as a hit when it lands inside an axis-aligned box of
//! half-extents `cell * tolerance_fraction` around the reward center.
//!
//! ```text
//!        half_x   half_x
//!       ├───────┼───────┤
//!   ┌───────────────────────┐ ─┬─
//!   │                       │  │ half_z
//!   │           ●           │ ─┼─
//!   │        (reward)       │  │ half_z
//!   └───────────────────────┘ ─┴─
//! ```
//!
//! A tolerance fraction below 0.5 keeps the boxes of neighbouring cells from
//! overlapping.

use serde::{Deserialize, Serialize};

use crate::geometry::Position3D;

/// Grid pitch used on an axis whose spacing cannot be inferred
pub const DEFAULT_CELL_SPACING: f64 = 10.3;

/// Default acceptance half-extent as a fraction of the cell size
pub const DEFAULT_TOLERANCE_FRACTION: f64 = 0.45;

/// Coordinates closer than this are treated as the same grid line
pub const MIN_DISTINCT_SPACING: f64 = 0.01;

/// Inferred cell size of the active layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridExtents {
    /// Cell size along X
    pub cell_width: f64,
    /// Cell size along Z
    pub cell_depth: f64,
}

impl GridExtents {
    /// Infer the cell size from reward positions, falling back per axis
    pub fn infer(positions: &[Position3D], fallback_spacing: f64) -> Self {
        let xs: Vec<f64> = positions.iter().map(|p| p.x).collect();
        let zs: Vec<f64> = positions.iter().map(|p| p.z).collect();

        Self {
            cell_width: min_axis_spacing(xs).unwrap_or(fallback_spacing),
            cell_depth: min_axis_spacing(zs).unwrap_or(fallback_spacing),
        }
    }

    pub fn uniform(spacing: f64) -> Self {
        Self {
            cell_width: spacing,
            cell_depth: spacing,
        }
    }

    pub fn acceptance(&self, tolerance_fraction: f64) -> AcceptanceBox {
        AcceptanceBox {
            half_x: self.cell_width * tolerance_fraction,
            half_z: self.cell_depth * tolerance_fraction,
        }
    }
}

impl Default for GridExtents {
    fn default() -> Self {
        Self::uniform(DEFAULT_CELL_SPACING)
    }
}

/// Smallest spacing above [`MIN_DISTINCT_SPACING`] between sorted values.
/// `None` when fewer than two distinct values exist.
fn min_axis_spacing(mut values: Vec<f64>) -> Option<f64> {
    values.sort_by(|a, b| a.total_cmp(b));
    values
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .filter(|d| *d > MIN_DISTINCT_SPACING)
        .min_by(|a, b| a.total_cmp(b))
}

/// Closed, axis-aligned acceptance region around a reward center
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceBox {
    pub half_x: f64,
    pub half_z: f64,
}

impl AcceptanceBox {
    /// `dx <= half_x && dz <= half_z`
    #[inline]
    pub fn contains(&self, center: &Position3D, candidate: &Position3D) -> bool {
        let (dx, dz) = candidate.horizontal_offset(center);
        self.contains_offset(dx, dz)
    }

    #[inline]
    pub fn contains_offset(&self, dx: f64, dz: f64) -> bool {
        dx <= self.half_x && dz <= self.half_z
    }
}

/// Converts a layout into acceptance boxes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridToleranceResolver {
    pub tolerance_fraction: f64,
    pub fallback_spacing: f64,
}

impl GridToleranceResolver {
    pub fn new(tolerance_fraction: f64) -> Self {
        Self {
            tolerance_fraction,
            fallback_spacing: DEFAULT_CELL_SPACING,
        }
    }

    pub fn with_fallback_spacing(mut self, spacing: f64) -> Self {
        self.fallback_spacing = spacing;
        self
    }

    pub fn extents(&self, positions: &[Position3D]) -> GridExtents {
        GridExtents::infer(positions, self.fallback_spacing)
    }

    pub fn resolve(&self, positions: &[Position3D]) -> AcceptanceBox {
        self.extents(positions).acceptance(self.tolerance_fraction)
    }
}

impl Default for GridToleranceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_FRACTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Vec<Position3D> {
        vec![
            Position3D::planar(0.0, 0.0),
            Position3D::planar(10.0, 0.0),
            Position3D::planar(20.0, 0.0),
        ]
    }

    #[test]
    fn test_min_adjacent_spacing() {
        let extents = GridExtents::infer(&row(), DEFAULT_CELL_SPACING);
        assert!((extents.cell_width - 10.0).abs() < 1e-12);
        // all z equal: no inferable spacing
        assert_eq!(extents.cell_depth, DEFAULT_CELL_SPACING);
    }

    #[test]
    fn test_spacing_independent_of_order() {
        let mut shuffled = row();
        shuffled.reverse();
        shuffled.swap(0, 1);
        let a = GridExtents::infer(&row(), DEFAULT_CELL_SPACING);
        let b = GridExtents::infer(&shuffled, DEFAULT_CELL_SPACING);
        assert_eq!(a, b);
    }

    #[test]
    fn test_uneven_spacing_takes_minimum() {
        let positions = vec![
            Position3D::planar(0.0, 0.0),
            Position3D::planar(30.0, 4.0),
            Position3D::planar(36.0, 20.0),
        ];
        let extents = GridExtents::infer(&positions, DEFAULT_CELL_SPACING);
        assert!((extents.cell_width - 6.0).abs() < 1e-12);
        assert!((extents.cell_depth - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_reward_falls_back_on_both_axes() {
        let extents = GridExtents::infer(&[Position3D::planar(3.0, 7.0)], 10.3);
        assert_eq!(extents, GridExtents::uniform(10.3));
    }

    #[test]
    fn test_jitter_below_threshold_ignored() {
        let positions = vec![
            Position3D::planar(0.0, 0.0),
            Position3D::planar(0.005, 10.0),
            Position3D::planar(10.0, 20.0),
        ];
        let extents = GridExtents::infer(&positions, DEFAULT_CELL_SPACING);
        assert!((extents.cell_width - 9.995).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_applies_fraction() {
        let resolver = GridToleranceResolver::new(0.45);
        let acceptance = resolver.resolve(&row());
        assert!((acceptance.half_x - 4.5).abs() < 1e-12);
        assert!((acceptance.half_z - 10.3 * 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_center_always_inside() {
        let center = Position3D::new(5.0, 1.0, -3.0);
        for fraction in [0.001, 0.1, 0.45] {
            let acceptance = GridExtents::uniform(10.0).acceptance(fraction);
            assert!(acceptance.contains(&center, &center));
        }
    }

    #[test]
    fn test_box_is_closed_and_axis_aligned() {
        let acceptance = AcceptanceBox {
            half_x: 4.0,
            half_z: 2.0,
        };
        let center = Position3D::origin();

        // exactly on the boundary
        assert!(acceptance.contains(&center, &Position3D::planar(4.0, 2.0)));
        // corner of the box is inside even though it is outside a radius of 4
        assert!(acceptance.contains(&center, &Position3D::planar(-3.9, 1.9)));
        // just past the edge on either axis
        assert!(!acceptance.contains(&center, &Position3D::planar(4.0 + 1e-9, 0.0)));
        assert!(!acceptance.contains(&center, &Position3D::planar(0.0, -2.0 - 1e-9)));
    }
}
