//! Labeled, height-uniform column containers.
//!
//! A [`Table`] is a bijection from unique labels to column positions plus a
//! uniform row count; it shares column references with whatever table or
//! view derived it rather than copying payloads.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    column::Column,
    error::{Error, Result},
    sort::Direction,
};

/// A single typed, closed metadata item a label may carry.
///
/// Closed rather than an open trait: attachment (add/remove/query-by-label)
/// is in scope, user-defined metadata taxonomies are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataItem {
    Description(String),
    Unit(String),
    Source(String),
    Flag(String),
}

/// An ordered, labeled collection of equal-height columns.
#[derive(Debug, Clone)]
pub struct Table {
    labels: Vec<String>,
    positions: HashMap<String, usize>,
    columns: Vec<Arc<Column>>,
    height: usize,
    metadata: HashMap<String, HashSet<MetadataItem>>,
}

impl Table {
    /// Assembles a table from parallel label/column vectors.
    ///
    /// # Errors
    ///
    /// [`Error::LabelColumnMismatch`] if the vectors differ in length;
    /// [`Error::DuplicateLabel`] if a label repeats;
    /// [`Error::HeightMismatch`] if columns disagree on row count.
    pub fn from_columns(labels: Vec<String>, columns: Vec<Arc<Column>>, height: usize) -> Result<Table> {
        if labels.len() != columns.len() {
            return Err(Error::LabelColumnMismatch { labels: labels.len(), columns: columns.len() });
        }
        let mut positions = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if positions.insert(label.clone(), i).is_some() {
                return Err(Error::DuplicateLabel(label.clone()));
            }
        }
        for column in &columns {
            if column.size() != height {
                return Err(Error::HeightMismatch { expected: height, found: column.size() });
            }
        }
        debug!(rows = height, columns = labels.len(), "assembled table");
        Ok(Table { labels, positions, columns, height, metadata: HashMap::new() })
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn position_of(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    /// # Errors
    ///
    /// [`Error::ColumnNotFound`] if no column is attached to `label`.
    pub fn column(&self, label: &str) -> Result<&Arc<Column>> {
        let pos = self.position_of(label).ok_or_else(|| Error::ColumnNotFound(label.to_string()))?;
        Ok(&self.columns[pos])
    }

    #[must_use]
    pub fn column_at(&self, position: usize) -> Option<&Arc<Column>> {
        self.columns.get(position)
    }

    /// Attaches one metadata item to `label`'s set.
    ///
    /// # Errors
    ///
    /// [`Error::ColumnNotFound`] if `label` is not present in this table.
    pub fn add_metadata(&mut self, label: &str, item: MetadataItem) -> Result<()> {
        if self.position_of(label).is_none() {
            return Err(Error::ColumnNotFound(label.to_string()));
        }
        self.metadata.entry(label.to_string()).or_default().insert(item);
        Ok(())
    }

    /// Detaches one metadata item from `label`'s set, if present.
    pub fn remove_metadata(&mut self, label: &str, item: &MetadataItem) {
        if let Some(items) = self.metadata.get_mut(label) {
            items.remove(item);
        }
    }

    #[must_use]
    pub fn metadata_for(&self, label: &str) -> Option<&HashSet<MetadataItem>> {
        self.metadata.get(label)
    }

    /// Serializes `label`'s metadata set to JSON, for callers that persist
    /// or transmit it outside this process.
    ///
    /// # Errors
    ///
    /// [`Error::Serde`] on serialization failure (unexpected for this closed
    /// enum, but the operation is fallible in general).
    pub fn metadata_json(&self, label: &str) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.metadata_for(label).cloned().unwrap_or_default())?)
    }

    /// Replaces `label`'s metadata set from a JSON value shaped like
    /// [`metadata_json`](Self::metadata_json)'s output.
    ///
    /// # Errors
    ///
    /// [`Error::ColumnNotFound`] if `label` is absent;
    /// [`Error::Serde`] if `json` doesn't match the expected shape.
    pub fn set_metadata_json(&mut self, label: &str, json: serde_json::Value) -> Result<()> {
        if self.position_of(label).is_none() {
            return Err(Error::ColumnNotFound(label.to_string()));
        }
        let items: HashSet<MetadataItem> = serde_json::from_value(json)?;
        self.metadata.insert(label.to_string(), items);
        Ok(())
    }

    /// Selects a subset of columns by label, preserving row order, with no
    /// payload copy — the derived table shares the same `Arc<Column>`s.
    ///
    /// # Errors
    ///
    /// [`Error::ColumnNotFound`] if any requested label is absent.
    pub fn select_columns(&self, labels: &[&str]) -> Result<Table> {
        let mut new_labels = Vec::with_capacity(labels.len());
        let mut new_columns = Vec::with_capacity(labels.len());
        for &label in labels {
            let column = self.column(label)?;
            new_labels.push(label.to_string());
            new_columns.push(Arc::clone(column));
        }
        let mut table = Table::from_columns(new_labels, new_columns, self.height)?;
        for &label in labels {
            if let Some(items) = self.metadata_for(label) {
                table.metadata.insert(label.to_string(), items.clone());
            }
        }
        Ok(table)
    }

    /// Selects/permutes rows by index, applying [`Column::map`] to every
    /// column with `prefer_view = true` (zero-copy mapped views).
    ///
    /// # Errors
    ///
    /// Propagates per-column mapping errors (none currently raisable by
    /// `map`, included for forward compatibility with fallible mappers).
    #[must_use]
    pub fn select_rows(&self, mapping: &[i32]) -> Table {
        let columns: Vec<Arc<Column>> = self.columns.iter().map(|c| c.map(mapping, true)).collect();
        Table {
            labels: self.labels.clone(),
            positions: self.positions.clone(),
            columns,
            height: mapping.len(),
            metadata: self.metadata.clone(),
        }
    }

    /// Sorts the table by one column's natural order, returning a new table
    /// with every column permuted identically.
    ///
    /// # Errors
    ///
    /// [`Error::ColumnNotFound`] if `by_label` is absent;
    /// [`Error::BadArgument`] if that column is not sortable.
    pub fn sort_by(&self, by_label: &str, direction: Direction) -> Result<Table> {
        let permutation = self.column(by_label)?.sort(direction)?;
        let mapping: Vec<i32> = permutation.iter().map(|&i| i as i32).collect();
        Ok(self.select_rows(&mapping))
    }

    /// A same-shape, zero-row table: every column replaced by
    /// [`Column::strip_data`], metadata preserved.
    #[must_use]
    pub fn strip_data(&self) -> Table {
        Table {
            labels: self.labels.clone(),
            positions: self.positions.clone(),
            columns: self.columns.iter().map(|c| Arc::new(c.strip_data())).collect(),
            height: 0,
            metadata: self.metadata.clone(),
        }
    }

    /// Starts a builder seeded with this table's labels/columns (no payload
    /// copy) so the caller can append or replace columns before rebuilding.
    #[must_use]
    pub fn builder(&self) -> TableBuilder {
        TableBuilder {
            labels: self.labels.clone(),
            columns: self.columns.clone(),
            height: self.height,
            metadata: self.metadata.clone(),
        }
    }
}

/// Incrementally assembles a [`Table`], either from scratch or seeded from
/// an existing one via [`Table::builder`].
#[derive(Debug, Default)]
pub struct TableBuilder {
    labels: Vec<String>,
    columns: Vec<Arc<Column>>,
    height: usize,
    metadata: HashMap<String, HashSet<MetadataItem>>,
}

impl TableBuilder {
    #[must_use]
    pub fn new() -> TableBuilder {
        TableBuilder { labels: Vec::new(), columns: Vec::new(), height: 0, metadata: HashMap::new() }
    }

    /// Appends a column. The first column fixes the table's height; every
    /// subsequent column must match it.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateLabel`] if `label` is already present;
    /// [`Error::HeightMismatch`] if `column.size()` disagrees with the
    /// height fixed by the first column added.
    pub fn with_column(mut self, label: impl Into<String>, column: Arc<Column>) -> Result<TableBuilder> {
        let label = label.into();
        if self.labels.iter().any(|l| l == &label) {
            return Err(Error::DuplicateLabel(label));
        }
        if self.columns.is_empty() {
            self.height = column.size();
        } else if column.size() != self.height {
            return Err(Error::HeightMismatch { expected: self.height, found: column.size() });
        }
        self.labels.push(label);
        self.columns.push(column);
        Ok(self)
    }

    #[must_use]
    pub fn with_metadata(mut self, label: impl Into<String>, item: MetadataItem) -> TableBuilder {
        self.metadata.entry(label.into()).or_default().insert(item);
        self
    }

    /// Freezes the builder into a [`Table`].
    ///
    /// # Errors
    ///
    /// Propagates [`Table::from_columns`]'s validation.
    pub fn build(self) -> Result<Table> {
        let mut table = Table::from_columns(self.labels, self.columns, self.height)?;
        table.metadata = self.metadata;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(values: Vec<f64>) -> Arc<Column> {
        Arc::new(Column::dense_real(Arc::from(values)))
    }

    #[test]
    fn from_columns_rejects_duplicate_labels() {
        let a = real(vec![1.0, 2.0]);
        let b = real(vec![3.0, 4.0]);
        let err = Table::from_columns(vec!["x".into(), "x".into()], vec![a, b], 2).unwrap_err();
        assert!(matches!(err, Error::DuplicateLabel(_)));
    }

    #[test]
    fn from_columns_rejects_height_mismatch() {
        let a = real(vec![1.0, 2.0]);
        let b = real(vec![3.0]);
        let err = Table::from_columns(vec!["x".into(), "y".into()], vec![a, b], 2).unwrap_err();
        assert!(matches!(err, Error::HeightMismatch { .. }));
    }

    #[test]
    fn select_columns_shares_storage_and_preserves_metadata() {
        let a = real(vec![1.0, 2.0]);
        let b = real(vec![3.0, 4.0]);
        let mut table = Table::from_columns(vec!["x".into(), "y".into()], vec![a, b], 2).unwrap();
        table.add_metadata("x", MetadataItem::Unit("m".into())).unwrap();

        let subset = table.select_columns(&["x"]).unwrap();
        assert_eq!(subset.column_count(), 1);
        assert!(Arc::ptr_eq(subset.column("x").unwrap(), table.column("x").unwrap()));
        assert_eq!(subset.metadata_for("x").unwrap().len(), 1);
    }

    #[test]
    fn sort_by_permutes_every_column_identically() {
        let x = real(vec![3.0, 1.0, 2.0]);
        let y = real(vec![30.0, 10.0, 20.0]);
        let table = Table::from_columns(vec!["x".into(), "y".into()], vec![x, y], 3).unwrap();
        let sorted = table.sort_by("x", Direction::Ascending).unwrap();

        let mut out = [0.0; 3];
        sorted.column("x").unwrap().fill_doubles(&mut out, 0).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
        sorted.column("y").unwrap().fill_doubles(&mut out, 0).unwrap();
        assert_eq!(out, [10.0, 20.0, 30.0]);
    }

    #[test]
    fn builder_round_trips_from_scratch_and_from_existing_table() {
        let fresh = TableBuilder::new()
            .with_column("x", real(vec![1.0]))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(fresh.height(), 1);

        let extended = fresh
            .builder()
            .with_column("y", real(vec![2.0]))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(extended.column_count(), 2);
        assert!(Arc::ptr_eq(extended.column("x").unwrap(), fresh.column("x").unwrap()));
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let mut table = Table::from_columns(vec!["x".into()], vec![real(vec![1.0])], 1).unwrap();
        table.add_metadata("x", MetadataItem::Unit("m".into())).unwrap();
        let json = table.metadata_json("x").unwrap();

        let mut other = Table::from_columns(vec!["x".into()], vec![real(vec![2.0])], 1).unwrap();
        other.set_metadata_json("x", json).unwrap();
        assert_eq!(other.metadata_for("x"), table.metadata_for("x"));
    }

    #[test]
    fn strip_data_yields_zero_rows_same_shape() {
        let table = Table::from_columns(vec!["x".into()], vec![real(vec![1.0, 2.0, 3.0])], 3).unwrap();
        let stripped = table.strip_data();
        assert_eq!(stripped.height(), 0);
        assert_eq!(stripped.column_count(), 1);
    }
}
