use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Plain grid of string cells with per-cell backgrounds, hidden columns and
/// column-wide validation lists. Shared by the in-memory and JSON sheets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetData {
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
    /// row -> col -> color
    #[serde(default)]
    pub backgrounds: BTreeMap<usize, BTreeMap<usize, String>>,
    #[serde(default)]
    pub hidden_columns: BTreeSet<usize>,
    /// col -> accepted values; applies to data rows (row >= 2)
    #[serde(default)]
    pub validations: BTreeMap<usize, Vec<String>>,
}

fn check_address(row: usize, col: usize) -> Result<(), StoreError> {
    if row == 0 || col == 0 {
        return Err(StoreError::OutOfBounds { row, col });
    }
    Ok(())
}

impl SheetData {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn last_row(&self) -> usize {
        self.rows.len()
    }

    pub fn last_column(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        if row == 0 || col == 0 {
            return "";
        }
        self.rows
            .get(row - 1)
            .and_then(|r| r.get(col - 1))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn values(
        &self,
        row: usize,
        col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        check_address(row, col)?;
        Ok((row..row + num_rows)
            .map(|r| {
                (col..col + num_cols)
                    .map(|c| self.cell(r, c).to_string())
                    .collect()
            })
            .collect())
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        check_address(row, col)?;
        if self.rows.len() < row {
            self.rows.resize_with(row, Vec::new);
        }
        let cells = &mut self.rows[row - 1];
        if cells.len() < col {
            cells.resize(col, String::new());
        }
        cells[col - 1] = value.to_string();
        Ok(())
    }

    pub fn background(&self, row: usize, col: usize) -> Option<&str> {
        self.backgrounds
            .get(&row)
            .and_then(|cols| cols.get(&col))
            .map(String::as_str)
    }

    pub fn set_background(
        &mut self,
        row: usize,
        col: usize,
        color: Option<&str>,
    ) -> Result<(), StoreError> {
        check_address(row, col)?;
        match color {
            Some(color) => {
                self.backgrounds
                    .entry(row)
                    .or_default()
                    .insert(col, color.to_string());
            }
            None => {
                if let Some(cols) = self.backgrounds.get_mut(&row) {
                    cols.remove(&col);
                    if cols.is_empty() {
                        self.backgrounds.remove(&row);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validation_values(&self, row: usize, col: usize) -> Result<Option<Vec<String>>, StoreError> {
        check_address(row, col)?;
        if row < 2 {
            return Ok(None);
        }
        Ok(self.validations.get(&col).cloned())
    }

    pub fn append_row(&mut self, values: &[String]) -> usize {
        self.rows.push(values.to_vec());
        self.rows.len()
    }

    pub fn hide_column(&mut self, col: usize) -> Result<(), StoreError> {
        check_address(1, col)?;
        self.hidden_columns.insert(col);
        Ok(())
    }
}
