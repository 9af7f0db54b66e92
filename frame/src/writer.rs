//! Append-only row-wise table construction.

use std::sync::Arc;

use crate::{
    buffer::{CategoricalBuffer, DateTimeBuffer, DoubleBuffer, Int53Buffer, ObjectBuffer, TimeBuffer, Value},
    column::{Column, Type},
    dictionary::{DictKey, Dictionary},
    error::{Error, Result},
    table::Table,
    wire::TIME_MISSING,
};

/// Converts an object-column [`Value`] into the narrower [`DictKey`] domain a
/// dictionary can intern. `Value::Null` maps to the absent key (`None`).
fn value_to_dict_key(value: &Value) -> Result<Option<DictKey>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(DictKey::Bool(*b))),
        Value::Str(s) => Ok(Some(DictKey::Str(Arc::clone(s)))),
        Value::Int(_) | Value::Float(_) => Err(Error::BadArgument("categorical columns only intern bool or string values".into())),
    }
}

/// One column slot a [`RowWriter`] fills in, by its eventual [`Type`].
enum Slot {
    Real(DoubleBuffer),
    Int53(Int53Buffer),
    Time(TimeBuffer),
    Object(ObjectBuffer),
    Categorical { dictionary: Dictionary, buffer: CategoricalBuffer, kind: Type },
    DateTime { seconds: DateTimeBuffer, nanos: DateTimeBuffer },
}

impl Slot {
    fn set_numeric(&mut self, row: usize, value: f64) -> Result<()> {
        match self {
            Slot::Real(b) => b.set_safe(row, value),
            Slot::Int53(b) => b.set_safe(row, value),
            Slot::Time(b) => b.set_safe(row, value as i64),
            _ => Err(Error::NotNumeric),
        }
    }

    fn set_object(&mut self, row: usize, value: Value) -> Result<()> {
        match self {
            Slot::Object(b) => b.set_safe(row, value),
            Slot::Categorical { dictionary, buffer, .. } => {
                let key = value_to_dict_key(&value)?;
                let index = key.map_or(0, |k| dictionary.intern(k));
                buffer.set_safe(row, index)
            }
            _ => Err(Error::NotObject),
        }
    }

    /// Fills a datetime cell. `nanos` is ignored (written as 0) whenever
    /// `seconds` is [`TIME_MISSING`], matching the missing-pair convention
    /// [`Column::datetime_components`](crate::column::Column::datetime_components)
    /// exposes.
    fn set_date_time(&mut self, row: usize, seconds: i64, nanos: u32) -> Result<()> {
        match self {
            Slot::DateTime { seconds: s, nanos: n } => {
                s.set_safe(row, seconds)?;
                n.set_safe(row, if seconds == TIME_MISSING { 0 } else { i64::from(nanos) })
            }
            _ => Err(Error::NotObject),
        }
    }
}

/// Append-only row writer. `mov` advances the active row; `set` fills a
/// cell in it; `create` freezes the accumulated buffers into a [`Table`].
pub struct RowWriter {
    labels: Vec<String>,
    slots: Vec<Slot>,
    active_row: usize,
    height: usize,
}

impl RowWriter {
    #[must_use]
    pub fn new(labels: Vec<String>, column_kinds: Vec<Type>, height: usize, initialize_to_missing: bool) -> RowWriter {
        let slots = column_kinds
            .into_iter()
            .map(|kind| match kind {
                Type::Real => Slot::Real(if initialize_to_missing { DoubleBuffer::zeroed(height) } else { DoubleBuffer::with_capacity(height) }),
                Type::Int53 => Slot::Int53(Int53Buffer::missing(height)),
                Type::Time => Slot::Time(if initialize_to_missing { TimeBuffer::zeroed(height) } else { TimeBuffer::with_capacity(height) }),
                Type::Object => Slot::Object(if initialize_to_missing { ObjectBuffer::nulls(height) } else { ObjectBuffer::with_capacity(height) }),
                Type::Nominal | Type::CategoricalCustom => {
                    Slot::Categorical { dictionary: Dictionary::empty(), buffer: CategoricalBuffer::zeroed(height), kind }
                }
                Type::DateTime => Slot::DateTime {
                    seconds: if initialize_to_missing {
                        let mut b = DateTimeBuffer::zeroed(height);
                        for row in 0..height {
                            b.set_safe(row, TIME_MISSING).expect("row is in range by construction");
                        }
                        b
                    } else {
                        DateTimeBuffer::with_capacity(height)
                    },
                    nanos: DateTimeBuffer::zeroed(height),
                },
            })
            .collect();
        RowWriter { labels, slots, active_row: 0, height }
    }

    /// Advances the active row.
    pub fn advance(&mut self) {
        self.active_row += 1;
    }

    /// Fills a numeric cell in the active row.
    pub fn set_numeric(&mut self, column: usize, value: f64) -> Result<()> {
        self.slots[column].set_numeric(self.active_row, value)
    }

    /// Fills an object cell in the active row.
    pub fn set_object(&mut self, column: usize, value: Value) -> Result<()> {
        self.slots[column].set_object(self.active_row, value)
    }

    /// Fills a datetime cell in the active row, as seconds-since-epoch and
    /// nanos-of-second. Pass [`TIME_MISSING`](crate::wire::TIME_MISSING) for
    /// `seconds` to mark the row missing; `nanos` is then ignored.
    pub fn set_date_time(&mut self, column: usize, seconds: i64, nanos: u32) -> Result<()> {
        self.slots[column].set_date_time(self.active_row, seconds, nanos)
    }

    /// Freezes every slot and assembles a [`Table`].
    ///
    /// # Errors
    ///
    /// Propagates [`Error::LabelColumnMismatch`] if labels and slots
    /// disagree in count.
    pub fn create(self) -> Result<Table> {
        if self.labels.len() != self.slots.len() {
            return Err(Error::LabelColumnMismatch { labels: self.labels.len(), columns: self.slots.len() });
        }
        let columns: Vec<Arc<Column>> = self
            .slots
            .into_iter()
            .map(|slot| {
                Arc::new(match slot {
                    Slot::Real(b) => Column::from_dense_values_auto(Type::Real, b.freeze()),
                    Slot::Int53(b) => Column::from_dense_values_auto(Type::Int53, b.freeze()),
                    Slot::Time(b) => Column::from_time_buffer(b),
                    Slot::Object(b) => Column::from_object_buffer(b, None),
                    Slot::Categorical { dictionary, buffer, kind } => Column::from_categorical_buffer(kind, dictionary, buffer),
                    Slot::DateTime { seconds, nanos } => Column::from_datetime_buffers(seconds, Some(nanos)),
                })
            })
            .collect();
        Table::from_columns(self.labels, columns, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_fills_rows_and_freezes_a_table() {
        let mut writer = RowWriter::new(vec!["a".into(), "b".into()], vec![Type::Real, Type::Object], 2, true);
        writer.set_numeric(0, 1.0).unwrap();
        writer.set_object(1, Value::Str(Arc::from("x"))).unwrap();
        writer.advance();
        writer.set_numeric(0, 2.0).unwrap();
        writer.set_object(1, Value::Str(Arc::from("y"))).unwrap();
        let table = writer.create().unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.column_count(), 2);
    }

    #[test]
    fn writer_fills_and_freezes_a_datetime_column() {
        let mut writer = RowWriter::new(vec!["ts".into()], vec![Type::DateTime], 2, true);
        writer.set_date_time(0, 1_700_000_000, 500).unwrap();
        writer.advance();
        writer.set_date_time(0, crate::wire::TIME_MISSING, 0).unwrap();
        let table = writer.create().unwrap();

        let column = table.column_at(0).unwrap();
        assert_eq!(column.column_type(), Type::DateTime);
        assert_eq!(column.datetime_components(0).unwrap(), (1_700_000_000, 500));
        assert_eq!(column.datetime_components(1).unwrap(), (crate::wire::TIME_MISSING, 0));
    }
}
