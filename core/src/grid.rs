//! Occupancy grid and its geometric queries.
//!
//! Cells are addressed either by coordinates `(i, j)` (column, row) or by a flat
//! index `j * cols + i`. Everything outside `0 <= i < cols`, `0 <= j < rows` is
//! treated as occupied. That border is a query-time convention; it is never
//! stored, so any finite grid bounds every ray cast against it.
//!
//! Maps can be built in memory, parsed from ASCII art (`#` obstacle, `.` free),
//! decoded from the flat `[rows, cols, cell...]` layout written by the legacy
//! map editor, or loaded from JSON/YAML/TOML by file extension.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{LocalizationError, Result};

pub const OBSTACLE_SYMBOL: char = '#';
pub const FREE_SYMBOL: char = '.';

/// Immutable occupancy grid with `rows x cols` cells (`true` = obstacle).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    occupancy: Vec<bool>,
}

impl Grid {
    /// Build a grid from its logical triple.
    ///
    /// Fails with [`LocalizationError::Format`] when `occupancy.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, occupancy: Vec<bool>) -> Result<Grid> {
        let expected = rows.checked_mul(cols).ok_or_else(|| {
            LocalizationError::Format(format!("{rows} x {cols} grid overflows the index space"))
        })?;
        if occupancy.len() != expected {
            return Err(LocalizationError::Format(format!(
                "{rows} x {cols} grid needs {expected} cells, got {}",
                occupancy.len()
            )));
        }
        Ok(Grid {
            rows,
            cols,
            occupancy,
        })
    }

    /// A grid without obstacles; only the implicit border bounds it.
    pub fn open(rows: usize, cols: usize) -> Grid {
        Grid {
            rows,
            cols,
            occupancy: vec![false; rows * cols],
        }
    }

    /// Decode the map editor's flat layout `[rows, cols, cell...]`, non-zero = obstacle.
    pub fn from_legacy(model: &[u32]) -> Result<Grid> {
        let [rows, cols, cells @ ..] = model else {
            return Err(LocalizationError::Format(
                "legacy map is missing its rows/cols header".to_string(),
            ));
        };
        Grid::new(
            *rows as usize,
            *cols as usize,
            cells.iter().map(|&c| c != 0).collect(),
        )
    }

    /// Parse ASCII art. Blank lines are skipped; all rows must have the same width.
    pub fn from_ascii(text: &str) -> Result<Grid> {
        let mut cols = None;
        let mut occupancy = Vec::new();
        let mut rows = 0;
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let width = line.chars().count();
            match cols {
                None => cols = Some(width),
                Some(expected) if expected != width => {
                    return Err(LocalizationError::Format(format!(
                        "line {} has {width} cells, expected {expected}",
                        line_number + 1
                    )));
                }
                Some(_) => {}
            }
            for symbol in line.chars() {
                match symbol {
                    OBSTACLE_SYMBOL => occupancy.push(true),
                    FREE_SYMBOL => occupancy.push(false),
                    other => {
                        return Err(LocalizationError::Format(format!(
                            "unknown map symbol '{other}' on line {}",
                            line_number + 1
                        )));
                    }
                }
            }
            rows += 1;
        }
        Grid::new(rows, cols.unwrap_or(0), occupancy)
    }

    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(self.occupancy.len() + self.rows);
        for row in self.occupancy.chunks(self.cols.max(1)) {
            out.extend(row.iter().map(|&occupied| {
                if occupied {
                    OBSTACLE_SYMBOL
                } else {
                    FREE_SYMBOL
                }
            }));
            out.push('\n');
        }
        out
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored cells.
    pub fn len(&self) -> usize {
        self.occupancy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    /// Longest possible straight run of free cells.
    pub fn max_range(&self) -> usize {
        self.rows.max(self.cols)
    }

    fn in_bounds(&self, i: i64, j: i64) -> bool {
        i >= 0 && j >= 0 && (i as u64) < self.cols as u64 && (j as u64) < self.rows as u64
    }

    /// True if `(i, j)` lies outside the grid or holds an obstacle.
    pub fn is_occupied_or_border(&self, i: i64, j: i64) -> bool {
        match self.to_index(i, j) {
            Some(index) => self.occupancy[index],
            None => true,
        }
    }

    /// Occupancy of a stored cell, `None` if `index` is past the end of the grid.
    pub fn is_occupied(&self, index: usize) -> Option<bool> {
        self.occupancy.get(index).copied()
    }

    /// Flat index of `(i, j)`, `None` outside the grid.
    pub fn to_index(&self, i: i64, j: i64) -> Option<usize> {
        if self.in_bounds(i, j) {
            Some(j as usize * self.cols + i as usize)
        } else {
            None
        }
    }

    /// Coordinates `(i, j)` of a flat index.
    pub fn to_coordinates(&self, index: usize) -> (i64, i64) {
        debug_assert!(index < self.occupancy.len(), "index {index} outside grid");
        let cols = self.cols.max(1);
        ((index % cols) as i64, (index / cols) as i64)
    }

    /// Indices of every in-bounds cell without an obstacle, ascending.
    pub fn free_cells(&self) -> Vec<usize> {
        self.occupancy
            .iter()
            .enumerate()
            .filter_map(|(index, &occupied)| (!occupied).then_some(index))
            .collect()
    }

    /// Load a map, choosing the format by extension (.txt/.map/.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Grid> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("txt") | Some("map") => {
                let mut text = String::new();
                File::open(p)?.read_to_string(&mut text)?;
                Grid::from_ascii(&text)
            }
            Some("json") => {
                let file: GridFile = serde_json::from_reader(File::open(p)?)?;
                Grid::try_from(file)
            }
            Some("yaml") | Some("yml") => {
                let file: GridFile = serde_yaml::from_reader(File::open(p)?)?;
                Grid::try_from(file)
            }
            Some("toml") => {
                let mut text = String::new();
                File::open(p)?.read_to_string(&mut text)?;
                let file: GridFile = toml::from_str(&text)?;
                Grid::try_from(file)
            }
            _ => Err(LocalizationError::InvalidParameter(format!(
                "unsupported map extension: {}",
                p.display()
            ))),
        }
    }

    /// Write a map, choosing the format by extension (.txt/.map/.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        let contents = match extension(p).as_deref() {
            Some("txt") | Some("map") => self.to_ascii(),
            Some("json") => serde_json::to_string_pretty(&GridFile::from(self))?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(&GridFile::from(self))?,
            Some("toml") => toml::to_string(&GridFile::from(self))?,
            _ => {
                return Err(LocalizationError::InvalidParameter(format!(
                    "unsupported map extension: {}",
                    p.display()
                )));
            }
        };
        File::create(p)?.write_all(contents.as_bytes())?;
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

impl Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii())
    }
}

/// Serialized map layout; any non-zero cell is an obstacle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridFile {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<u8>,
}

impl From<&Grid> for GridFile {
    fn from(grid: &Grid) -> Self {
        GridFile {
            rows: grid.rows,
            cols: grid.cols,
            cells: grid.occupancy.iter().map(|&o| o as u8).collect(),
        }
    }
}

impl TryFrom<GridFile> for Grid {
    type Error = LocalizationError;

    fn try_from(file: GridFile) -> Result<Grid> {
        Grid::new(
            file.rows,
            file.cols,
            file.cells.into_iter().map(|c| c != 0).collect(),
        )
    }
}
