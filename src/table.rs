//! Calibration tables: a fixed 8×8 grid of cells.
//!
//! Two instances exist on the ECU side, the MAP fuelling table and the
//! throttle correction table. Both share the same shape and column axis
//! (engine RPM); only the row axis differs.

use std::fmt;

/// Number of rows in a calibration table.
pub const ROWS: usize = 8;
/// Number of columns in a calibration table.
pub const COLS: usize = 8;
/// Total number of cells.
pub const CELLS: usize = ROWS * COLS;

/// Which of the two calibration tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TableKind {
    /// MAP fuelling table (rows = manifold pressure, kPa).
    Fuel,
    /// Throttle correction table (rows = throttle opening, %).
    Throttle,
}

impl TableKind {
    pub const ALL: [TableKind; 2] = [TableKind::Fuel, TableKind::Throttle];

    /// Row axis label for row `row` (MAP 10..80 or throttle 0..70).
    pub fn row_label(self, row: usize) -> u32 {
        match self {
            Self::Fuel => 10 + row as u32 * 10,
            Self::Throttle => row as u32 * 10,
        }
    }

    /// Column axis label: engine RPM, 1000..4500 in 500 steps.
    pub fn col_label(col: usize) -> u32 {
        1000 + col as u32 * 500
    }

    /// Header for the row axis column.
    pub fn axis_name(self) -> &'static str {
        match self {
            Self::Fuel => "MAP \\ RPM",
            Self::Throttle => "Throttle %",
        }
    }

    /// Parse a user-facing name (`fuel`, `map`, `throttle`, `tps`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fuel" | "map" => Some(Self::Fuel),
            "throttle" | "tps" => Some(Self::Throttle),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fuel => write!(f, "MAP_Fuelling"),
            Self::Throttle => write!(f, "Throttle Correction"),
        }
    }
}

/// A fixed 8×8 grid of `f32` cells, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationTable {
    cells: [[f32; COLS]; ROWS],
}

impl CalibrationTable {
    /// All-zero table.
    pub fn new() -> Self {
        Self { cells: [[0.0; COLS]; ROWS] }
    }

    /// Table with every cell set to `value`.
    pub fn filled(value: f32) -> Self {
        Self { cells: [[value; COLS]; ROWS] }
    }

    pub fn from_rows(cells: [[f32; COLS]; ROWS]) -> Self {
        Self { cells }
    }

    /// Cell value, or `None` if out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.cells.get(row)?.get(col).copied()
    }

    /// Mutable reference to a cell, or `None` if out of range.
    pub fn cell_mut(&mut self, row: usize, col: usize) -> Option<&mut f32> {
        self.cells.get_mut(row)?.get_mut(col)
    }

    /// Set a cell. Returns `false` (and leaves the table untouched) if out of range.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> bool {
        match self.cell_mut(row, col) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.cells = [[value; COLS]; ROWS];
    }

    pub fn rows(&self) -> &[[f32; COLS]; ROWS] {
        &self.cells
    }

    /// Iterate `(row, col, value)` in row-major (wire) order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().enumerate().map(move |(c, &v)| (r, c, v)))
    }

    /// Render with axis labels for `kind`, one decimal per cell.
    pub fn display(&self, kind: TableKind) -> TableDisplay<'_> {
        TableDisplay { table: self, kind }
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
impl CalibrationTable {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Write the table to `path` as JSON.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        let text = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Read a table previously written by [`save`](Self::save).
    pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Labelled grid view returned by [`CalibrationTable::display`].
pub struct TableDisplay<'a> {
    table: &'a CalibrationTable,
    kind: TableKind,
}

impl fmt::Display for TableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        write!(f, "{:>10}", self.kind.axis_name())?;
        for col in 0..COLS {
            write!(f, " {:>7}", TableKind::col_label(col))?;
        }
        writeln!(f)?;
        for (row, cells) in self.table.cells.iter().enumerate() {
            write!(f, "{:>10}", self.kind.row_label(row))?;
            for v in cells {
                write!(f, " {v:>7.1}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
