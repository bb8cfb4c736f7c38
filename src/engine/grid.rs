//! Risk segment grid for double-variable iterations
//!
//! Rows are the iteration's group indices, columns are the risk segments
//! produced by the previous iteration, and each cell names the resulting
//! risk segment.

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::risk_segments::RiskSegmentDetails;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSegmentGrid {
    rows: Vec<usize>,
    columns: Vec<usize>,
    cells: Vec<Vec<usize>>,
}

impl RiskSegmentGrid {
    pub fn new(rows: Vec<usize>, columns: Vec<usize>, cells: Vec<Vec<usize>>) -> EngineResult<Self> {
        let grid = Self { rows, columns, cells };
        grid.check_shape(&grid.cells)?;
        Ok(grid)
    }

    /// Every row maps each previous segment onto itself.
    pub fn identity(rows: Vec<usize>, columns: Vec<usize>) -> Self {
        let cells = rows.iter().map(|_| columns.clone()).collect();
        Self { rows, columns, cells }
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    fn row_position(&self, group: usize) -> Option<usize> {
        self.rows.iter().position(|&r| r == group)
    }

    fn column_position(&self, segment: usize) -> Option<usize> {
        self.columns.iter().position(|&c| c == segment)
    }

    /// Resulting segment for rows in `group` whose previous segment is `previous`
    pub fn get(&self, group: usize, previous: usize) -> Option<usize> {
        let r = self.row_position(group)?;
        let c = self.column_position(previous)?;
        Some(self.cells[r][c])
    }

    pub fn set(&mut self, group: usize, previous: usize, segment: usize) -> EngineResult<()> {
        let r = self
            .row_position(group)
            .ok_or(EngineError::InvalidGroupIndex(group))?;
        let c = self
            .column_position(previous)
            .ok_or(EngineError::UnknownRiskSegment(previous))?;
        self.cells[r][c] = segment;
        Ok(())
    }

    /// Replace every cell; the shape must match.
    pub fn set_cells(&mut self, cells: Vec<Vec<usize>>) -> EngineResult<()> {
        self.check_shape(&cells)?;
        self.cells = cells;
        Ok(())
    }

    /// Append an identity row for a new group
    pub fn add_row(&mut self, group: usize) -> EngineResult<()> {
        if self.row_position(group).is_some() {
            return Err(EngineError::DuplicateGroupIndex(group));
        }
        self.rows.push(group);
        self.cells.push(self.columns.clone());
        Ok(())
    }

    pub fn remove_row(&mut self, group: usize) -> EngineResult<()> {
        let r = self
            .row_position(group)
            .ok_or(EngineError::InvalidGroupIndex(group))?;
        self.rows.remove(r);
        self.cells.remove(r);
        Ok(())
    }

    /// Check that every column and every cell is a segment of `details`.
    pub fn validate(&self, details: &RiskSegmentDetails) -> EngineResult<()> {
        if let Some(&column) = self.columns.iter().find(|&&c| !details.contains(c)) {
            return Err(EngineError::InvalidGrid(format!(
                "column {} is not a risk segment",
                column
            )));
        }
        for (row, cells) in self.rows.iter().zip(&self.cells) {
            if let Some(&cell) = cells.iter().find(|&&s| !details.contains(s)) {
                return Err(EngineError::InvalidGrid(format!(
                    "row {} maps to unknown risk segment {}",
                    row, cell
                )));
            }
        }
        Ok(())
    }

    fn check_shape(&self, cells: &[Vec<usize>]) -> EngineResult<()> {
        if cells.len() != self.rows.len() {
            return Err(EngineError::InvalidGrid(format!(
                "expected {} rows, got {}",
                self.rows.len(),
                cells.len()
            )));
        }
        if let Some(bad) = cells.iter().find(|row| row.len() != self.columns.len()) {
            return Err(EngineError::InvalidGrid(format!(
                "expected {} columns per row, got {}",
                self.columns.len(),
                bad.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_grid() {
        let grid = RiskSegmentGrid::identity(vec![0, 1], vec![2, 3, 4]);
        assert_eq!(grid.get(1, 3), Some(3));
        assert_eq!(grid.get(5, 3), None);
    }

    #[test]
    fn test_shape_checked() {
        assert!(RiskSegmentGrid::new(vec![0], vec![0, 1], vec![vec![0]]).is_err());
        let mut grid = RiskSegmentGrid::identity(vec![0, 1], vec![0, 1]);
        assert!(grid.set_cells(vec![vec![0, 1]]).is_err());
        grid.set_cells(vec![vec![0, 0], vec![1, 1]]).unwrap();
        assert_eq!(grid.get(0, 1), Some(0));
    }

    #[test]
    fn test_rows_follow_groups() {
        let mut grid = RiskSegmentGrid::identity(vec![0, 1], vec![0, 1]);
        grid.add_row(4).unwrap();
        assert_eq!(grid.get(4, 1), Some(1));
        assert!(grid.add_row(4).is_err());
        grid.remove_row(0).unwrap();
        assert_eq!(grid.rows(), &[1, 4]);
    }

    #[test]
    fn test_validate_against_details() {
        let details = RiskSegmentDetails::standard();
        let mut grid = RiskSegmentGrid::identity(vec![0], vec![0, 1]);
        assert!(grid.validate(&details).is_ok());
        grid.set(0, 1, 99).unwrap();
        assert!(grid.validate(&details).is_err());
    }
}
