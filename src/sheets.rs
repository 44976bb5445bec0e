use std::fmt;
use std::future::Future;

use crate::error::Result;

/// Largest row range the proxy requests from a tab
pub const MAX_ROWS: usize = 1000;

/// Columns A through Z
pub const MAX_COLS: usize = 26;

/// Storage that holds the spreadsheet tabs
///
/// Row numbers are 1-based spreadsheet rows; row 1 is the header row.
/// Implementations may omit trailing empty cells and rows when reading.
pub trait SheetsBackend: Send + Sync + 'static {
    /// Values inside `range` of `tab`, row-major
    fn read_range(
        &self,
        tab: &str,
        range: &CellRange,
    ) -> impl Future<Output = Result<Vec<Vec<String>>>> + Send;

    /// Append a row after the last non-empty row of `tab`
    fn append_row(&self, tab: &str, row: &[String]) -> impl Future<Output = Result<()>> + Send;

    /// Overwrite the cells of `row_number` starting at column A
    fn write_row(
        &self,
        tab: &str,
        row_number: usize,
        row: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove `row_number`, shifting later rows up
    fn delete_row(&self, tab: &str, row_number: usize) -> impl Future<Output = Result<()>> + Send;
}

/// Rectangular block of cells, 1-based and inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

impl CellRange {
    /// The whole readable area, A1:Z1000
    pub fn data() -> Self {
        CellRange {
            first_row: 1,
            first_col: 1,
            last_row: MAX_ROWS,
            last_col: MAX_COLS,
        }
    }

    /// The header row, A1:Z1
    pub fn header() -> Self {
        Self::row(1)
    }

    /// A single row, A{n}:Z{n}
    pub fn row(row_number: usize) -> Self {
        CellRange {
            first_row: row_number,
            first_col: 1,
            last_row: row_number,
            last_col: MAX_COLS,
        }
    }

    /// Parse `A1:Z1000` style ranges
    pub fn parse(text: &str) -> Option<Self> {
        let (start, end) = text.split_once(':')?;
        let (first_row, first_col) = parse_cell_name(start)?;
        let (last_row, last_col) = parse_cell_name(end)?;
        if first_row > last_row || first_col > last_col {
            return None;
        }
        Some(CellRange {
            first_row,
            first_col,
            last_row,
            last_col,
        })
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            col_to_letter(self.first_col),
            self.first_row,
            col_to_letter(self.last_col),
            self.last_row
        )
    }
}

/// Convert a 1-based column number to letters (1 = A, 27 = AA)
pub fn col_to_letter(col: usize) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Convert column letters to a 1-based column number
pub fn letter_to_col(letters: &str) -> usize {
    letters.chars().fold(0, |acc, c| {
        acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)
    })
}

/// Split a cell name such as `B12` into (row, col)
pub fn parse_cell_name(cell_name: &str) -> Option<(usize, usize)> {
    let mut letters = String::new();
    let mut digits = String::new();

    for c in cell_name.chars() {
        if c.is_ascii_alphabetic() {
            if !digits.is_empty() {
                return None;
            }
            letters.push(c);
        } else if c.is_ascii_digit() {
            digits.push(c);
        } else {
            return None;
        }
    }

    if letters.is_empty() || digits.is_empty() {
        return None;
    }

    let row = digits.parse::<usize>().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, letter_to_col(&letters)))
}

/// A1 notation for a range on a named tab, e.g. `'Site Updates'!A1:Z1000`
///
/// The title is always quoted; embedded single quotes are doubled.
pub fn a1_notation(tab: &str, range: &CellRange) -> String {
    format!("'{}'!{}", tab.replace('\'', "''"), range)
}
