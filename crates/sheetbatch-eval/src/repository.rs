//! Run-scoped store of memoized ranges.
//!
//! Large ranges are materialized once per run and handed to the backend by
//! key instead of by value. Each entry also carries a sorted index over its
//! first column so lookups can binary-search without re-sorting.

use std::cmp::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use sheetbatch_common::{ErrorKind, Payload, RangeKey, RangeKind, TaggedValue, format_number};

/// Ordinal sort key: numbers before text, numbers numerically, text by
/// byte order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortKey<'a> {
    Number(f64),
    Text(&'a str),
}

impl SortKey<'_> {
    pub fn cmp_ordinal(&self, other: &SortKey<'_>) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
            (SortKey::Text(a), SortKey::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
        }
    }
}

/// Permutation of `0..rows` ordering the first column ascending.
pub fn sorted_rows<'a>(rows: usize, key: impl Fn(usize) -> SortKey<'a>) -> Vec<u32> {
    let mut order: Vec<u32> = (0..rows as u32).collect();
    order.sort_by(|a, b| key(*a as usize).cmp_ordinal(&key(*b as usize)));
    order
}

/// Binary search over `order` (as produced by [`sorted_rows`]). `Ok` holds the
/// sorted position of a match, `Err` the insertion point.
pub fn search_sorted<'a>(
    order: &[u32],
    key: impl Fn(usize) -> SortKey<'a>,
    needle: SortKey<'_>,
) -> Result<usize, usize> {
    order.binary_search_by(|row| key(*row as usize).cmp_ordinal(&needle))
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeValues {
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl RangeValues {
    pub fn len(&self) -> usize {
        match self {
            RangeValues::Float(v) => v.len(),
            RangeValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> RangeKind {
        match self {
            RangeValues::Float(_) => RangeKind::Float,
            RangeValues::Text(_) => RangeKind::Text,
        }
    }

    pub fn sort_key(&self, index: usize) -> SortKey<'_> {
        match self {
            RangeValues::Float(v) => SortKey::Number(v[index]),
            RangeValues::Text(v) => SortKey::Text(&v[index]),
        }
    }
}

/// Immutable, column-major range data plus its first-column sort order.
#[derive(Debug)]
pub struct RangeEntry {
    rows: u32,
    cols: u32,
    values: RangeValues,
    sorted_index: Vec<u32>,
}

impl RangeEntry {
    pub fn new(rows: u32, cols: u32, values: RangeValues) -> Self {
        debug_assert_eq!(rows as usize * cols as usize, values.len());
        let first_column = (rows as usize).min(values.len());
        let sorted_index = sorted_rows(first_column, |i| values.sort_key(i));
        Self {
            rows,
            cols,
            values,
            sorted_index,
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn kind(&self) -> RangeKind {
        self.values.kind()
    }

    pub fn values(&self) -> &RangeValues {
        &self.values
    }

    pub fn sorted_index(&self) -> &[u32] {
        &self.sorted_index
    }

    /// Element at column-major `index` as a scalar.
    pub fn get(&self, index: usize) -> Option<TaggedValue> {
        match &self.values {
            RangeValues::Float(v) => v.get(index).map(|n| TaggedValue::number(*n)),
            RangeValues::Text(v) => v.get(index).map(|s| TaggedValue::text(s.clone())),
        }
    }

    /// Binary search of the first column.
    pub fn search(&self, needle: SortKey<'_>) -> Result<usize, usize> {
        search_sorted(&self.sorted_index, |i| self.values.sort_key(i), needle)
    }

    /// Original row of the `pos`-th smallest first-column entry.
    pub fn row_at(&self, pos: usize) -> Option<usize> {
        self.sorted_index.get(pos).map(|r| *r as usize)
    }

    /// Dense copy of the entry.
    pub fn to_value(&self) -> TaggedValue {
        let built = match &self.values {
            RangeValues::Float(v) => TaggedValue::float_array(self.rows, self.cols, v.clone()),
            RangeValues::Text(v) => TaggedValue::text_array(self.rows, self.cols, v.clone()),
        };
        built.unwrap_or_else(|_| TaggedValue::error(ErrorKind::Ref))
    }
}

/// Concurrent store of range entries for one run.
#[derive(Debug, Default)]
pub struct RangeRepository {
    entries: DashMap<RangeKey, Arc<RangeEntry>>,
}

impl RangeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key`, building it on first use. Concurrent
    /// callers for the same key see a single build.
    pub fn get_or_create(
        &self,
        key: RangeKey,
        build: impl FnOnce() -> RangeEntry,
    ) -> Arc<RangeEntry> {
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(build()));
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &RangeKey) -> Option<Arc<RangeEntry>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, key: &RangeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Entry behind a memoized value; `None` for other payloads or unknown keys.
    pub fn resolve(&self, value: &TaggedValue) -> Option<Arc<RangeEntry>> {
        match value.payload() {
            Payload::RangeRef { key, .. } => self.get(key),
            _ => None,
        }
    }

    /// Replace memoized references by dense arrays; other values pass
    /// through unchanged.
    pub fn materialize(&self, value: &TaggedValue) -> TaggedValue {
        match value.payload() {
            Payload::RangeRef { .. } => match self.resolve(value) {
                Some(entry) => entry.to_value(),
                None => TaggedValue::error(ErrorKind::Ref),
            },
            _ => value.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Render a scalar for storage in a text range.
pub(crate) fn text_cell(value: &TaggedValue) -> String {
    match value.payload() {
        Payload::Float(n) => format_number(*n),
        Payload::Text(s) => s.clone(),
        Payload::Error(kind) => kind.to_string(),
        _ => String::new(),
    }
}
