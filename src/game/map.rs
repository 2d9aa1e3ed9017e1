//! Tile grid maps
//!
//! Maps are line-based ASCII grids: `#` is a wall, `S` the start tile,
//! `G` the goal tile, anything else is open space. World coordinates are
//! in tile units with the origin at the top-left corner of tile (0, 0).

use serde::Serialize;

use super::vector::Vec2;

/// A parsed, immutable map
#[derive(Debug, Clone, Serialize)]
pub struct GridMap {
    pub width: usize,
    pub height: usize,
    /// Raw rows, kept for clients that render or path-find on the grid
    pub lines: Vec<String>,
    /// Centre of the start tile
    pub start: Vec2,
    /// Centre of the goal tile
    pub goal: Vec2,
    #[serde(skip)]
    walls: Vec<bool>,
}

/// Reasons a map document is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMap {
    #[error("Map is empty")]
    Empty,

    #[error("Map rows must have equal width (row {row} has {found}, expected {expected})")]
    UnequalRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Map missing start (S)")]
    MissingStart,

    #[error("Map missing goal (G)")]
    MissingGoal,

    #[error("Map has more than one start (S)")]
    DuplicateStart,

    #[error("Map has more than one goal (G)")]
    DuplicateGoal,
}

impl GridMap {
    /// Parse a map document. Blank rows and trailing whitespace are ignored.
    pub fn parse(text: &str) -> Result<Self, MalformedMap> {
        let lines: Vec<String> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        let width = match lines.first() {
            Some(first) => first.chars().count(),
            None => return Err(MalformedMap::Empty),
        };
        let height = lines.len();

        let mut walls = vec![false; width * height];
        let mut start = None;
        let mut goal = None;

        for (y, line) in lines.iter().enumerate() {
            let found = line.chars().count();
            if found != width {
                return Err(MalformedMap::UnequalRows {
                    row: y,
                    expected: width,
                    found,
                });
            }

            for (x, ch) in line.chars().enumerate() {
                let center = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
                match ch {
                    '#' => walls[y * width + x] = true,
                    'S' if start.is_some() => return Err(MalformedMap::DuplicateStart),
                    'S' => start = Some(center),
                    'G' if goal.is_some() => return Err(MalformedMap::DuplicateGoal),
                    'G' => goal = Some(center),
                    _ => {}
                }
            }
        }

        Ok(Self {
            width,
            height,
            lines,
            start: start.ok_or(MalformedMap::MissingStart)?,
            goal: goal.ok_or(MalformedMap::MissingGoal)?,
            walls,
        })
    }

    /// Whether tile `(x, y)` is solid. Everything outside the grid is solid.
    pub fn is_wall(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 {
            return true;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return true;
        }
        self.walls[y * self.width + x]
    }
}
