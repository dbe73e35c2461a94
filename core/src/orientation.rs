//! Heading and relative-direction algebra.
//!
//! A [`Heading`] is an absolute facing on the grid; a [`RelativeDirection`] only
//! means something relative to a current heading. Composition walks the compass
//! cycle North → East → South → West, with Forward, Right, Back and Left adding
//! 0, 1, 2 and 3 quarter turns respectively.
//!
//! Range readings are reported in a different, fixed order: the
//! [`CANONICAL_ORDER`] `[North, South, West, East]` rotated so that the current
//! heading comes first. This is *not* the compass cycle and must be kept as is,
//! since measured and simulated readings are compared component-wise.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::LocalizationError;

/// Absolute facing direction on the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Heading {
    #[default]
    North,
    East,
    South,
    West,
}

/// Fixed heading sequence used to order range measurements.
pub const CANONICAL_ORDER: [Heading; 4] = [
    Heading::North,
    Heading::South,
    Heading::West,
    Heading::East,
];

impl Heading {
    /// Headings in compass (clockwise) order.
    pub const COMPASS: [Heading; 4] = [
        Heading::North,
        Heading::East,
        Heading::South,
        Heading::West,
    ];

    fn compass_index(self) -> usize {
        match self {
            Heading::North => 0,
            Heading::East => 1,
            Heading::South => 2,
            Heading::West => 3,
        }
    }

    /// Unit step `(di, dj)` in column/row space. Rows grow southwards.
    pub fn delta(self) -> (i64, i64) {
        match self {
            Heading::North => (0, -1),
            Heading::South => (0, 1),
            Heading::East => (1, 0),
            Heading::West => (-1, 0),
        }
    }

    /// Heading obtained by turning `relative` from `self`.
    pub fn absolute(self, relative: RelativeDirection) -> Heading {
        Self::COMPASS[(self.compass_index() + relative.offset()) % 4]
    }

    /// Inverse of [`Heading::absolute`]: the turn that takes `self` to `target`.
    pub fn relative_to(self, target: Heading) -> RelativeDirection {
        RelativeDirection::from_offset(target.compass_index() + 4 - self.compass_index())
    }

    /// The canonical order rotated so that `self` is first.
    pub fn measurement_order(self) -> [Heading; 4] {
        // Every heading appears exactly once in CANONICAL_ORDER.
        let start = CANONICAL_ORDER
            .iter()
            .position(|&h| h == self)
            .unwrap_or(0);
        std::array::from_fn(|k| CANONICAL_ORDER[(start + k) % 4])
    }

    pub fn name(self) -> &'static str {
        match self {
            Heading::North => "north",
            Heading::East => "east",
            Heading::South => "south",
            Heading::West => "west",
        }
    }
}

impl Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Heading {
    type Err = LocalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "north" | "n" => Ok(Heading::North),
            "east" | "e" => Ok(Heading::East),
            "south" | "s" => Ok(Heading::South),
            "west" | "w" => Ok(Heading::West),
            other => Err(LocalizationError::InvalidParameter(format!(
                "unknown heading '{other}'"
            ))),
        }
    }
}

/// Direction relative to the agent's current heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelativeDirection {
    Forward,
    Right,
    Back,
    Left,
}

impl RelativeDirection {
    pub const ALL: [RelativeDirection; 4] = [
        RelativeDirection::Forward,
        RelativeDirection::Right,
        RelativeDirection::Back,
        RelativeDirection::Left,
    ];

    /// Number of clockwise quarter turns.
    pub fn offset(self) -> usize {
        match self {
            RelativeDirection::Forward => 0,
            RelativeDirection::Right => 1,
            RelativeDirection::Back => 2,
            RelativeDirection::Left => 3,
        }
    }

    fn from_offset(offset: usize) -> RelativeDirection {
        Self::ALL[offset % 4]
    }

    pub fn name(self) -> &'static str {
        match self {
            RelativeDirection::Forward => "forward",
            RelativeDirection::Right => "right",
            RelativeDirection::Back => "back",
            RelativeDirection::Left => "left",
        }
    }
}

impl Display for RelativeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RelativeDirection {
    type Err = LocalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forward" | "f" => Ok(RelativeDirection::Forward),
            "right" | "r" => Ok(RelativeDirection::Right),
            "back" | "b" => Ok(RelativeDirection::Back),
            "left" | "l" => Ok(RelativeDirection::Left),
            other => Err(LocalizationError::InvalidParameter(format!(
                "unknown relative direction '{other}'"
            ))),
        }
    }
}
