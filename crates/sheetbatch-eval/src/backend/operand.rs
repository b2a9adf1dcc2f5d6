use std::sync::Arc;

use sheetbatch_common::{ErrorKind, Payload, TaggedValue};

use crate::repository::{RangeEntry, RangeRepository, RangeValues, SortKey};

/// Uniform read view over one argument of one instance. Dense values are
/// borrowed, memoized ranges are read straight from their repository entry.
#[derive(Debug)]
pub struct Operand<'a> {
    value: &'a TaggedValue,
    shared: Option<Arc<RangeEntry>>,
}

impl<'a> Operand<'a> {
    /// Resolve a memoized reference; a key missing from the repository is
    /// `#REF!`.
    pub fn resolve(value: &'a TaggedValue, ranges: &RangeRepository) -> Result<Self, ErrorKind> {
        let shared = match value.payload() {
            Payload::RangeRef { key, .. } => Some(ranges.get(key).ok_or(ErrorKind::Ref)?),
            _ => None,
        };
        Ok(Self { value, shared })
    }

    /// The value as passed in, memoized references included.
    pub fn original(&self) -> &'a TaggedValue {
        self.value
    }

    pub fn rows(&self) -> usize {
        match &self.shared {
            Some(entry) => entry.rows() as usize,
            None => self.value.rows() as usize,
        }
    }

    pub fn cols(&self) -> usize {
        match &self.shared {
            Some(entry) => entry.cols() as usize,
            None => self.value.cols() as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scalar(&self) -> bool {
        self.shared.is_none() && self.value.is_scalar()
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.value.as_error()
    }

    /// Scalar numeric view (floats, empty as 0, numeric text).
    pub fn number(&self) -> Option<f64> {
        if self.is_scalar() {
            self.value.coerce_number()
        } else {
            None
        }
    }

    /// Float data: a float scalar as a one-element slice, float arrays and
    /// float range entries as-is.
    pub fn floats(&self) -> Option<&[f64]> {
        if let Some(entry) = &self.shared {
            return match entry.values() {
                RangeValues::Float(v) => Some(v),
                RangeValues::Text(_) => None,
            };
        }
        match self.value.payload() {
            Payload::Float(n) => Some(std::slice::from_ref(n)),
            Payload::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn texts(&self) -> Option<&[String]> {
        if let Some(entry) = &self.shared {
            return match entry.values() {
                RangeValues::Text(v) => Some(v),
                RangeValues::Float(_) => None,
            };
        }
        match self.value.payload() {
            Payload::Text(s) => Some(std::slice::from_ref(s)),
            Payload::TextArray(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric data with scalars coerced; `None` for text arrays, errors and
    /// non-numeric text.
    pub fn numeric(&self) -> Option<Vec<f64>> {
        if let Some(v) = self.floats() {
            return Some(v.to_vec());
        }
        self.number().map(|n| vec![n])
    }

    /// Element at column-major `index` as an owned scalar.
    pub fn element(&self, index: usize) -> Option<TaggedValue> {
        match &self.shared {
            Some(entry) => entry.get(index),
            None if self.value.is_scalar() => (index == 0).then(|| self.value.clone()),
            None => self.value.element(index),
        }
    }

    /// Element at `(row, col)`.
    pub fn at(&self, row: usize, col: usize) -> Option<TaggedValue> {
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        self.element(col * self.rows() + row)
    }

    /// Ordinal key of the first-column entry in `row`.
    pub fn first_column_key(&self, row: usize) -> Option<SortKey<'_>> {
        if let Some(v) = self.floats() {
            return v.get(row).map(|n| SortKey::Number(*n));
        }
        if let Some(v) = self.texts() {
            return v.get(row).map(|s| SortKey::Text(s));
        }
        None
    }

    /// Sort order of the first column; borrowed from the entry when memoized.
    pub fn first_column_order(&self) -> std::borrow::Cow<'_, [u32]> {
        match &self.shared {
            Some(entry) => std::borrow::Cow::Borrowed(entry.sorted_index()),
            None => {
                let rows = if self.floats().is_some() || self.texts().is_some() {
                    self.rows()
                } else {
                    0
                };
                std::borrow::Cow::Owned(crate::repository::sorted_rows(rows, |r| {
                    self.first_column_key(r).unwrap_or(SortKey::Number(f64::NAN))
                }))
            }
        }
    }
}
