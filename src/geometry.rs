//! Arena geometry: world positions and reward labels
//!
//! The arena is a flat grid of cells on the horizontal X/Z plane. Y is height
//! and never takes part in acceptance decisions.
//!
//! Rewards are labelled by their index in the configuration:
//! index 0 → 'A', 1 → 'B', and so on up to 'Z'.

use serde::{Deserialize, Serialize};

/// Highest number of rewards a configuration can carry (labels 'A'..='Z')
pub const MAX_REWARDS: usize = 26;

/// A point in world space. Missing coordinates deserialize as 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position3D {
    /// Left/right
    pub x: f64,
    /// Height
    pub y: f64,
    /// Forward/back
    pub z: f64,
}

impl Position3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Position on the floor plane (y = 0)
    pub fn planar(x: f64, z: f64) -> Self {
        Self { x, y: 0.0, z }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Absolute per-axis offsets `(dx, dz)` on the horizontal plane
    #[inline]
    pub fn horizontal_offset(&self, other: &Position3D) -> (f64, f64) {
        ((self.x - other.x).abs(), (self.z - other.z).abs())
    }

    /// Euclidean distance on the horizontal plane
    pub fn planar_distance(&self, other: &Position3D) -> f64 {
        let (dx, dz) = self.horizontal_offset(other);
        (dx * dx + dz * dz).sqrt()
    }

    /// Move at most `max_step` towards `target` on the horizontal plane.
    /// Height is kept.
    pub fn step_towards(&self, target: &Position3D, max_step: f64) -> Position3D {
        let dx = target.x - self.x;
        let dz = target.z - self.z;
        let dist = (dx * dx + dz * dz).sqrt();
        if dist <= max_step || dist == 0.0 {
            return Position3D::new(target.x, self.y, target.z);
        }
        let scale = max_step / dist;
        Position3D::new(self.x + dx * scale, self.y, self.z + dz * scale)
    }
}

impl std::fmt::Display for Position3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Dominant horizontal direction of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Heading {
    North,
    South,
    East,
    West,
    Stationary,
}

impl Heading {
    /// Classify the step `from → to`. +Z is north, +X is east.
    pub fn between(from: &Position3D, to: &Position3D) -> Self {
        let dx = to.x - from.x;
        let dz = to.z - from.z;
        if dx == 0.0 && dz == 0.0 {
            Heading::Stationary
        } else if dz.abs() >= dx.abs() {
            if dz > 0.0 {
                Heading::North
            } else {
                Heading::South
            }
        } else if dx > 0.0 {
            Heading::East
        } else {
            Heading::West
        }
    }
}

/// Label for reward `index` ('A' + index)
///
/// Indices past 'Z' are clamped; configurations larger than [`MAX_REWARDS`]
/// are refused at load time.
#[inline]
pub fn reward_letter(index: usize) -> char {
    let offset = index.min(MAX_REWARDS - 1) as u8;
    (b'A' + offset) as char
}

/// Dash-joined labels for a visiting order, e.g. "A-B-C-D"
pub fn sequence_label(order: &[usize]) -> String {
    order
        .iter()
        .map(|&i| reward_letter(i).to_string())
        .collect::<Vec<_>>()
        .join("-")
}
