//! Cursor-based column-wise and row-wise read access.
//!
//! Readers own a small window of the most recently fetched rows so callers
//! scanning forward get cache-friendly batched reads instead of one column
//! dispatch per row. Readers are cursors, not row objects — nothing here is
//! meant to be stored as multi-row history.

use std::sync::Arc;

use crate::{
    buffer::Value,
    column::Column,
    error::{Error, Result},
};

const DEFAULT_BATCH: usize = 128;

/// Forward-only cursor over a single column's numeric view.
pub struct ColumnReader {
    column: Arc<Column>,
    batch: Vec<f64>,
    batch_start: usize,
    position: usize,
}

impl ColumnReader {
    /// # Errors
    ///
    /// [`Error::NotNumeric`] if `column` is not numeric-readable.
    pub fn new(column: Arc<Column>) -> Result<ColumnReader> {
        column.fill_doubles(&mut [], 0)?; // capability check, no-op read
        Ok(ColumnReader { column, batch: Vec::new(), batch_start: 0, position: 0 })
    }

    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.column.size()
    }

    /// Reads the value at the cursor and advances it by one row.
    pub fn read(&mut self) -> Option<f64> {
        if !self.has_remaining() {
            return None;
        }
        self.ensure_batch_contains(self.position);
        let value = self.batch[self.position - self.batch_start];
        self.position += 1;
        Some(value)
    }

    /// Moves the cursor so the next [`read`](Self::read) returns row `p`.
    pub fn set_position(&mut self, p: usize) {
        self.position = p;
    }

    fn ensure_batch_contains(&mut self, row: usize) {
        if !self.batch.is_empty() && row >= self.batch_start && row < self.batch_start + self.batch.len() {
            return;
        }
        let size = self.column.size();
        let len = DEFAULT_BATCH.min(size - row);
        let mut batch = vec![0.0; len];
        self.column.fill_doubles(&mut batch, row).expect("capability validated at construction");
        self.batch = batch;
        self.batch_start = row;
    }
}

/// Row-wise cursor over N columns in lock-step, sharing one dense buffer
/// per batch for cache locality.
pub struct RowReader {
    columns: Vec<Arc<Column>>,
    size: usize,
    position: usize,
}

impl RowReader {
    /// # Errors
    ///
    /// [`Error::HeightMismatch`] if the columns do not share one height.
    pub fn new(columns: Vec<Arc<Column>>) -> Result<RowReader> {
        let size = columns.first().map_or(0, |c| c.size());
        for c in &columns {
            if c.size() != size {
                return Err(Error::HeightMismatch { expected: size, found: c.size() });
            }
        }
        Ok(RowReader { columns, size, position: 0 })
    }

    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.size
    }

    pub fn set_position(&mut self, p: usize) {
        self.position = p;
    }

    /// Advances the cursor, returning a view over the current row.
    pub fn read(&mut self) -> Option<RowView<'_>> {
        if !self.has_remaining() {
            return None;
        }
        let row = self.position;
        self.position += 1;
        Some(RowView { columns: &self.columns, row })
    }
}

/// A single row accessed through its owning [`RowReader`]'s current
/// position. Not meant to be stored past the next [`RowReader::read`] call.
pub struct RowView<'a> {
    columns: &'a [Arc<Column>],
    row: usize,
}

impl RowView<'_> {
    /// Reads column `index` as a numeric value.
    ///
    /// # Errors
    ///
    /// [`Error::NotNumeric`] if that column is not numeric-readable.
    pub fn get_numeric(&self, index: usize) -> Result<f64> {
        let mut out = [0.0];
        self.columns[index].fill_doubles(&mut out, self.row)?;
        Ok(out[0])
    }

    /// Reads column `index` as a dictionary raw index.
    ///
    /// # Errors
    ///
    /// [`Error::NotCategorical`] if that column is not categorical.
    pub fn get_index(&self, index: usize) -> Result<i32> {
        let mut out = [0i32];
        self.columns[index].fill_ints(&mut out, self.row)?;
        Ok(out[0])
    }

    /// Reads column `index` as an object value.
    ///
    /// # Errors
    ///
    /// [`Error::NotObject`] if that column is not object-readable.
    pub fn get_object(&self, index: usize) -> Result<Value> {
        let mut out = [Value::Null];
        self.columns[index].fill_objects(&mut out, self.row)?;
        Ok(out[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_reader_advances_and_resets() {
        let column = Arc::new(Column::dense_real(Arc::from(vec![1.0, 2.0, 3.0, 4.0])));
        let mut reader = ColumnReader::new(column).unwrap();
        assert_eq!(reader.read(), Some(1.0));
        assert_eq!(reader.read(), Some(2.0));
        reader.set_position(0);
        assert_eq!(reader.read(), Some(1.0));
        reader.set_position(3);
        assert_eq!(reader.read(), Some(4.0));
        assert!(!reader.has_remaining());
    }

    #[test]
    fn row_reader_rejects_mismatched_heights() {
        let a = Arc::new(Column::dense_real(Arc::from(vec![1.0, 2.0])));
        let b = Arc::new(Column::dense_real(Arc::from(vec![1.0])));
        assert!(matches!(RowReader::new(vec![a, b]), Err(Error::HeightMismatch { .. })));
    }

    #[test]
    fn row_reader_reads_each_column_in_lock_step() {
        let a = Arc::new(Column::dense_real(Arc::from(vec![1.0, 2.0])));
        let b = Arc::new(Column::dense_real(Arc::from(vec![10.0, 20.0])));
        let mut reader = RowReader::new(vec![a, b]).unwrap();
        let row = reader.read().unwrap();
        assert_eq!(row.get_numeric(0).unwrap(), 1.0);
        assert_eq!(row.get_numeric(1).unwrap(), 10.0);
        let row = reader.read().unwrap();
        assert_eq!(row.get_numeric(0).unwrap(), 2.0);
        assert!(reader.read().is_none());
    }
}
