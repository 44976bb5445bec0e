//! In-memory backend used by demo mode and tests

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use crate::error::{ProxyError, Result};
use crate::sheets::{CellRange, SheetsBackend};

/// Tabs held in memory, each a list of rows
#[derive(Debug, Default)]
pub struct MemorySheets {
    tabs: RwLock<HashMap<String, Vec<Vec<String>>>>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style tab insertion
    pub fn with_tab<R, C>(self, name: &str, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.insert_tab(name, rows);
        self
    }

    /// Create or replace a tab
    pub fn insert_tab<R, C>(&self, name: &str, rows: R)
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        self.tabs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), rows);
    }

    /// Load tabs from JSON of the form `{ "Projects": [["id", "name"], ["1", "Sunshine"]] }`
    pub fn from_json(text: &str) -> Result<Self> {
        let tabs: HashMap<String, Vec<Vec<String>>> = serde_json::from_str(text)?;
        Ok(MemorySheets {
            tabs: RwLock::new(tabs),
        })
    }

    /// Load a JSON seed file
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Snapshot of a tab's rows as stored
    pub fn rows(&self, name: &str) -> Option<Vec<Vec<String>>> {
        self.tabs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn tab_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tabs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn with_rows_mut<T>(
        &self,
        tab: &str,
        f: impl FnOnce(&mut Vec<Vec<String>>) -> Result<T>,
    ) -> Result<T> {
        let mut tabs = self.tabs.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tabs
            .get_mut(tab)
            .ok_or_else(|| ProxyError::TabNotFound(tab.to_string()))?;
        f(rows)
    }
}

fn outside_grid(tab: &str, row_number: usize) -> ProxyError {
    ProxyError::Upstream {
        status: 400,
        message: format!("Row {} is outside the grid of \"{}\"", row_number, tab),
    }
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.is_empty())
}

// Trailing empty cells are omitted, as the values API does
fn trim_row(mut row: Vec<String>) -> Vec<String> {
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

impl SheetsBackend for MemorySheets {
    async fn read_range(&self, tab: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
        let tabs = self.tabs.read().unwrap_or_else(PoisonError::into_inner);
        let rows = tabs
            .get(tab)
            .ok_or_else(|| ProxyError::TabNotFound(tab.to_string()))?;

        let mut values: Vec<Vec<String>> = rows
            .iter()
            .skip(range.first_row - 1)
            .take(range.last_row + 1 - range.first_row)
            .map(|row| {
                let cells = row
                    .iter()
                    .skip(range.first_col - 1)
                    .take(range.last_col + 1 - range.first_col)
                    .cloned()
                    .collect();
                trim_row(cells)
            })
            .collect();

        while values.last().is_some_and(|row| row.is_empty()) {
            values.pop();
        }
        Ok(values)
    }

    async fn append_row(&self, tab: &str, row: &[String]) -> Result<()> {
        self.with_rows_mut(tab, |rows| {
            while rows.last().is_some_and(|r| is_blank(r)) {
                rows.pop();
            }
            rows.push(row.to_vec());
            Ok(())
        })
    }

    async fn write_row(&self, tab: &str, row_number: usize, row: &[String]) -> Result<()> {
        self.with_rows_mut(tab, |rows| {
            if row_number == 0 {
                return Err(outside_grid(tab, row_number));
            }
            if rows.len() < row_number {
                rows.resize(row_number, Vec::new());
            }
            let target = &mut rows[row_number - 1];
            if target.len() < row.len() {
                target.resize(row.len(), String::new());
            }
            target[..row.len()].clone_from_slice(row);
            Ok(())
        })
    }

    async fn delete_row(&self, tab: &str, row_number: usize) -> Result<()> {
        self.with_rows_mut(tab, |rows| {
            if row_number == 0 || row_number > rows.len() {
                return Err(outside_grid(tab, row_number));
            }
            rows.remove(row_number - 1);
            Ok(())
        })
    }
}
