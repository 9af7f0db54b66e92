//! Byte-buffer exchange format: the bit-exact wire contract by which columns
//! trade row data with externally managed buffers.
//!
//! `put_*` writes as many complete elements as fit in the remaining buffer
//! space and advances its cursor; partial elements are never written.
//! `read_*` builders accumulate `put(buf)` calls and finalize into a column
//! with `to_column()`, padding any rows never supplied with the missing
//! sentinel for that kind.

use std::sync::Arc;

use crate::{
    buffer::{CategoricalBuffer, DateTimeBuffer, DoubleBuffer, Int53Buffer, TimeBuffer},
    column::{Column, Type},
    dictionary::{DictKey, Dictionary},
    error::{Error, Result},
};

/// Byte order a caller chooses for a given buffer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Sentinel for missing `time`/`datetime`-seconds rows on the wire.
pub const TIME_MISSING: i64 = i64::MAX;

/// A cursor over a caller-owned byte buffer. Writes never leave a partial
/// element behind: callers must check [`WireBuffer::remaining`] before
/// assuming a full element will land.
pub struct WireBuffer<'a> {
    bytes: &'a mut [u8],
    position: usize,
    order: ByteOrder,
}

impl<'a> WireBuffer<'a> {
    #[must_use]
    pub fn new(bytes: &'a mut [u8], order: ByteOrder) -> WireBuffer<'a> {
        WireBuffer { bytes, position: 0, order }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    fn write(&mut self, bytes: &[u8]) {
        self.bytes[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
    }

    fn write_f64(&mut self, v: f64) {
        self.write(&match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    fn write_i64(&mut self, v: i64) {
        self.write(&match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    fn write_u32(&mut self, v: u32) {
        self.write(&match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    fn write_u16(&mut self, v: u16) {
        self.write(&match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    fn write_i32(&mut self, v: i32) {
        self.write(&match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        });
    }

    fn read_f64(&mut self) -> f64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[self.position..self.position + 8]);
        self.position += 8;
        match self.order {
            ByteOrder::Little => f64::from_le_bytes(raw),
            ByteOrder::Big => f64::from_be_bytes(raw),
        }
    }

    fn read_i64(&mut self) -> i64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[self.position..self.position + 8]);
        self.position += 8;
        match self.order {
            ByteOrder::Little => i64::from_le_bytes(raw),
            ByteOrder::Big => i64::from_be_bytes(raw),
        }
    }

    fn read_u32(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[self.position..self.position + 4]);
        self.position += 4;
        match self.order {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }

    fn read_u8(&mut self) -> u8 {
        let v = self.bytes[self.position];
        self.position += 1;
        v
    }

    fn read_u16(&mut self) -> u16 {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(&self.bytes[self.position..self.position + 2]);
        self.position += 2;
        match self.order {
            ByteOrder::Little => u16::from_le_bytes(raw),
            ByteOrder::Big => u16::from_be_bytes(raw),
        }
    }

    fn read_i32(&mut self) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[self.position..self.position + 4]);
        self.position += 4;
        match self.order {
            ByteOrder::Little => i32::from_le_bytes(raw),
            ByteOrder::Big => i32::from_be_bytes(raw),
        }
    }
}

fn check_row_offset(row_offset: usize, size: usize) -> Result<()> {
    if row_offset > size {
        return Err(Error::OutOfBounds { index: row_offset, len: size });
    }
    Ok(())
}

/// Writes `real`/`int53` rows (IEEE-754 doubles, `NaN` = missing) starting at
/// `row_offset`, as many as fit. Returns the count written.
///
/// # Errors
///
/// [`Error::BadArgument`] if `column` is not `Real` or `Int53`;
/// [`Error::OutOfBounds`] if `row_offset > column.size()`.
pub fn put_double(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    if column.column_type() != Type::Real && column.column_type() != Type::Int53 {
        return Err(Error::BadArgument("put_double requires a real or int53 column".into()));
    }
    check_row_offset(row_offset, column.size())?;
    let count = (buf.remaining() / 8).min(column.size() - row_offset);
    let mut scratch = vec![0.0; count];
    column.fill_doubles(&mut scratch, row_offset)?;
    for v in scratch {
        buf.write_f64(v);
    }
    Ok(count)
}

/// Writes `time` rows (signed 64-bit nanos-of-day, max value = missing).
///
/// # Errors
///
/// [`Error::BadArgument`] if `column` is not `Time`;
/// [`Error::OutOfBounds`] if `row_offset > column.size()`.
pub fn put_time(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    if column.column_type() != Type::Time {
        return Err(Error::BadArgument("put_time requires a time column".into()));
    }
    check_row_offset(row_offset, column.size())?;
    let count = (buf.remaining() / 8).min(column.size() - row_offset);
    let mut scratch = vec![0.0; count];
    column.fill_doubles(&mut scratch, row_offset)?;
    for v in scratch {
        buf.write_i64(if v.is_nan() { TIME_MISSING } else { v as i64 });
    }
    Ok(count)
}

/// Writes `datetime` seconds-since-epoch (signed 64-bit, max value =
/// missing).
///
/// # Errors
///
/// [`Error::BadArgument`] if `column` is not `DateTime`;
/// [`Error::OutOfBounds`] if `row_offset > column.size()`.
pub fn put_date_time_seconds(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    check_row_offset(row_offset, column.size())?;
    let count = (buf.remaining() / 8).min(column.size() - row_offset);
    for i in 0..count {
        let (seconds, _) = column.datetime_components(row_offset + i)?;
        buf.write_i64(seconds);
    }
    Ok(count)
}

/// Writes `datetime` nanos-of-second (unsigned 32-bit, 0 = missing, paired
/// with the missing seconds sentinel).
///
/// # Errors
///
/// [`Error::BadArgument`] if `column` is not `DateTime`;
/// [`Error::OutOfBounds`] if `row_offset > column.size()`.
pub fn put_date_time_nanos(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    check_row_offset(row_offset, column.size())?;
    let count = (buf.remaining() / 4).min(column.size() - row_offset);
    for i in 0..count {
        let (seconds, nanos) = column.datetime_components(row_offset + i)?;
        buf.write_u32(if seconds == TIME_MISSING { 0 } else { nanos });
    }
    Ok(count)
}

fn categorical_raw(column: &Column, row: usize) -> Result<u32> {
    let mut out = [0i32];
    column.fill_ints(&mut out, row)?;
    Ok(out[0] as u32)
}

/// Writes categorical raw indices as unsigned 8-bit values.
///
/// # Errors
///
/// [`Error::NotCategorical`] if `column` is not categorical;
/// [`Error::TooManyValues`] if the dictionary's maximal index exceeds what a
/// byte can hold; [`Error::OutOfBounds`] if `row_offset > column.size()`.
pub fn put_categorical_bytes(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    require_width(column, u8::MAX as u32)?;
    check_row_offset(row_offset, column.size())?;
    let count = buf.remaining().min(column.size() - row_offset);
    for i in 0..count {
        buf.write_u8(categorical_raw(column, row_offset + i)? as u8);
    }
    Ok(count)
}

/// Writes categorical raw indices as unsigned 16-bit values.
///
/// # Errors
///
/// Same as [`put_categorical_bytes`], scaled to the 16-bit width.
pub fn put_categorical_shorts(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    require_width(column, u16::MAX as u32)?;
    check_row_offset(row_offset, column.size())?;
    let count = (buf.remaining() / 2).min(column.size() - row_offset);
    for i in 0..count {
        buf.write_u16(categorical_raw(column, row_offset + i)? as u16);
    }
    Ok(count)
}

/// Writes categorical raw indices as signed 32-bit values.
///
/// # Errors
///
/// Same as [`put_categorical_bytes`]; 32-bit width never fails the cap check.
pub fn put_categorical_ints(column: &Column, row_offset: usize, buf: &mut WireBuffer) -> Result<usize> {
    require_width(column, i32::MAX as u32)?;
    check_row_offset(row_offset, column.size())?;
    let count = (buf.remaining() / 4).min(column.size() - row_offset);
    for i in 0..count {
        buf.write_i32(categorical_raw(column, row_offset + i)? as i32);
    }
    Ok(count)
}

fn require_width(column: &Column, max_value: u32) -> Result<()> {
    if !matches!(column.column_type(), Type::Nominal | Type::CategoricalCustom) {
        return Err(Error::NotCategorical);
    }
    let dictionary = column.get_dictionary().ok_or(Error::NotCategorical)?;
    if dictionary.maximal_index() > max_value {
        return Err(Error::TooManyValues(format!(
            "dictionary's maximal index {} exceeds the requested wire width ({max_value})",
            dictionary.maximal_index()
        )));
    }
    Ok(())
}

/// Accumulates `put` calls for a `real`/`int53` wire exchange, padding any
/// rows never supplied with `NaN`.
pub struct DoubleReadBuilder {
    data: Vec<f64>,
    filled: usize,
    as_int53: bool,
}

impl DoubleReadBuilder {
    #[must_use]
    pub fn real(length: usize) -> DoubleReadBuilder {
        DoubleReadBuilder { data: vec![f64::NAN; length], filled: 0, as_int53: false }
    }

    #[must_use]
    pub fn int53(length: usize) -> DoubleReadBuilder {
        DoubleReadBuilder { data: vec![f64::NAN; length], filled: 0, as_int53: true }
    }

    pub fn put(&mut self, buf: &mut WireBuffer) -> usize {
        let count = (buf.remaining() / 8).min(self.data.len() - self.filled);
        for i in 0..count {
            self.data[self.filled + i] = buf.read_f64();
        }
        self.filled += count;
        count
    }

    /// # Errors
    ///
    /// Propagates any error the underlying buffer raises while being filled;
    /// none are expected to occur, since every index here is in range by
    /// construction, but the fallible path is never panicked past.
    pub fn to_column(self) -> Result<Column> {
        if self.as_int53 {
            let mut b = Int53Buffer::missing(self.data.len());
            for (i, v) in self.data.into_iter().enumerate() {
                b.set_safe(i, v)?;
            }
            Ok(Column::from_int53_buffer(b))
        } else {
            let mut b = DoubleBuffer::zeroed(self.data.len());
            for (i, v) in self.data.into_iter().enumerate() {
                b.set_safe(i, v)?;
            }
            Ok(Column::from_real_buffer(b))
        }
    }
}

/// Accumulates `put` calls for a `time` wire exchange.
pub struct TimeReadBuilder {
    data: Vec<i64>,
    filled: usize,
}

impl TimeReadBuilder {
    #[must_use]
    pub fn new(length: usize) -> TimeReadBuilder {
        TimeReadBuilder { data: vec![TIME_MISSING; length], filled: 0 }
    }

    pub fn put(&mut self, buf: &mut WireBuffer) -> usize {
        let count = (buf.remaining() / 8).min(self.data.len() - self.filled);
        for i in 0..count {
            self.data[self.filled + i] = buf.read_i64();
        }
        self.filled += count;
        count
    }

    /// # Errors
    ///
    /// Propagates any error the underlying buffer raises while being filled;
    /// none are expected to occur, since every index here is in range by
    /// construction, but the fallible path is never panicked past.
    pub fn to_column(self) -> Result<Column> {
        let mut b = TimeBuffer::zeroed(self.data.len());
        for (i, v) in self.data.into_iter().enumerate() {
            b.set_safe(i, v)?;
        }
        Ok(Column::from_time_buffer(b))
    }
}

/// Accumulates separate `put_seconds`/`put_nanos` calls for a `datetime`
/// wire exchange; both halves must be filled before [`to_column`](Self::to_column).
pub struct DateTimeReadBuilder {
    seconds: Vec<i64>,
    nanos: Vec<u32>,
    seconds_filled: usize,
    nanos_filled: usize,
}

impl DateTimeReadBuilder {
    #[must_use]
    pub fn new(length: usize) -> DateTimeReadBuilder {
        DateTimeReadBuilder { seconds: vec![TIME_MISSING; length], nanos: vec![0; length], seconds_filled: 0, nanos_filled: 0 }
    }

    pub fn put_seconds(&mut self, buf: &mut WireBuffer) -> usize {
        let count = (buf.remaining() / 8).min(self.seconds.len() - self.seconds_filled);
        for i in 0..count {
            self.seconds[self.seconds_filled + i] = buf.read_i64();
        }
        self.seconds_filled += count;
        count
    }

    pub fn put_nanos(&mut self, buf: &mut WireBuffer) -> usize {
        let count = (buf.remaining() / 4).min(self.nanos.len() - self.nanos_filled);
        for i in 0..count {
            self.nanos[self.nanos_filled + i] = buf.read_u32();
        }
        self.nanos_filled += count;
        count
    }

    /// # Errors
    ///
    /// Propagates any error the underlying buffers raise while being filled;
    /// none are expected to occur, since every index here is in range by
    /// construction, but the fallible path is never panicked past.
    pub fn to_column(self) -> Result<Column> {
        let mut seconds_buf = DateTimeBuffer::zeroed(self.seconds.len());
        let mut nanos_buf = DateTimeBuffer::zeroed(self.nanos.len());
        for (i, v) in self.seconds.into_iter().enumerate() {
            seconds_buf.set_safe(i, v)?;
        }
        for (i, v) in self.nanos.into_iter().enumerate() {
            nanos_buf.set_safe(i, i64::from(v))?;
        }
        Ok(Column::from_datetime_buffers(seconds_buf, Some(nanos_buf)))
    }
}

/// Accumulates categorical wire reads against a caller-supplied, ordered
/// dictionary value set whose first element must be `null`.
pub struct CategoricalReadBuilder {
    kind: Type,
    values: Vec<Option<DictKey>>,
    raw: Vec<u32>,
    filled: usize,
}

impl CategoricalReadBuilder {
    /// # Errors
    ///
    /// [`Error::BadArgument`] if `values`'s first element is not `None`.
    pub fn new(kind: Type, length: usize, values: Vec<Option<DictKey>>) -> Result<CategoricalReadBuilder> {
        if values.first() != Some(&None) {
            return Err(Error::BadArgument("dictionary value set's first entry must be null".into()));
        }
        Ok(CategoricalReadBuilder { kind, values, raw: vec![0; length], filled: 0 })
    }

    /// # Errors
    ///
    /// [`Error::OutOfBounds`] if a raw index read from `buf` is ≥ the
    /// dictionary's size.
    pub fn put_bytes(&mut self, buf: &mut WireBuffer) -> Result<usize> {
        let count = buf.remaining().min(self.raw.len() - self.filled);
        for _ in 0..count {
            let v = buf.read_u8() as u32;
            self.push(v)?;
        }
        Ok(count)
    }

    /// # Errors
    ///
    /// Same as [`put_bytes`](Self::put_bytes).
    pub fn put_shorts(&mut self, buf: &mut WireBuffer) -> Result<usize> {
        let count = (buf.remaining() / 2).min(self.raw.len() - self.filled);
        for _ in 0..count {
            let v = buf.read_u16() as u32;
            self.push(v)?;
        }
        Ok(count)
    }

    /// # Errors
    ///
    /// Same as [`put_bytes`](Self::put_bytes).
    pub fn put_ints(&mut self, buf: &mut WireBuffer) -> Result<usize> {
        let count = (buf.remaining() / 4).min(self.raw.len() - self.filled);
        for _ in 0..count {
            let v = buf.read_i32() as u32;
            self.push(v)?;
        }
        Ok(count)
    }

    fn push(&mut self, raw_index: u32) -> Result<()> {
        if raw_index as usize >= self.values.len() {
            return Err(Error::OutOfBounds { index: raw_index as usize, len: self.values.len() });
        }
        self.raw[self.filled] = raw_index;
        self.filled += 1;
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::TooManyValues`] if a raw index accepted by [`push`](Self::push)
    /// (validated only against the caller-supplied dictionary length) exceeds
    /// what the packed categorical buffer can represent — reachable whenever
    /// the dictionary has more than 256 entries and a wide wire width
    /// (`put_shorts`/`put_ints`) supplied an index past the packed ceiling.
    pub fn to_column(self) -> Result<Column> {
        let dictionary = Dictionary::from_values(self.values.into_iter().skip(1).flatten());
        let mut buffer = CategoricalBuffer::zeroed(self.raw.len());
        for (i, v) in self.raw.into_iter().enumerate() {
            buffer.set_safe(i, v)?;
        }
        Ok(Column::from_categorical_buffer(self.kind, dictionary, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_round_trips_through_the_wire() {
        let column = Column::dense_real(Arc::from(vec![1.0, f64::NAN, -2.5, 3.0]));
        let mut bytes = vec![0u8; 32];
        let written = {
            let mut out = WireBuffer::new(&mut bytes, ByteOrder::Little);
            put_double(&column, 0, &mut out).unwrap()
        };
        assert_eq!(written, 4);

        let mut builder = DoubleReadBuilder::real(4);
        let mut input = WireBuffer::new(&mut bytes, ByteOrder::Little);
        builder.put(&mut input);
        let rebuilt = builder.to_column().unwrap();
        let mut out = [0.0; 4];
        rebuilt.fill_doubles(&mut out, 0).unwrap();
        assert_eq!(out[0], 1.0);
        assert!(out[1].is_nan());
        assert_eq!(out[2], -2.5);
        assert_eq!(out[3], 3.0);
    }

    #[test]
    fn categorical_wire_rejects_out_of_range_raw_index() {
        let mut builder = CategoricalReadBuilder::new(Type::Nominal, 2, vec![None, Some(DictKey::str("a"))]).unwrap();
        let mut bytes = vec![5u8, 0u8];
        let mut buf = WireBuffer::new(&mut bytes, ByteOrder::Little);
        assert!(matches!(builder.put_bytes(&mut buf), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn categorical_wire_rejects_raw_index_beyond_packed_ceiling_without_panicking() {
        let mut values = vec![None];
        values.extend((0..300).map(|i| Some(DictKey::str(format!("v{i}")))));
        let mut builder = CategoricalReadBuilder::new(Type::Nominal, 1, values).unwrap();
        // 260 is a valid raw index against a 301-entry dictionary but exceeds
        // the packed categorical buffer's 255 ceiling.
        let mut bytes = 260u16.to_le_bytes();
        let mut buf = WireBuffer::new(&mut bytes, ByteOrder::Little);
        builder.put_shorts(&mut buf).unwrap();
        assert!(matches!(builder.to_column(), Err(Error::TooManyValues(_))));
    }

    #[test]
    fn put_double_never_writes_a_partial_element() {
        let column = Column::dense_real(Arc::from(vec![1.0, 2.0]));
        let mut bytes = vec![0u8; 10]; // room for 1 element plus 2 spare bytes
        let mut buf = WireBuffer::new(&mut bytes, ByteOrder::Little);
        let written = put_double(&column, 0, &mut buf).unwrap();
        assert_eq!(written, 1);
        assert_eq!(buf.position(), 8);
    }
}
