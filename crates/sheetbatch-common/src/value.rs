use std::error::Error;
use std::fmt::{self, Display};

use crate::{ErrorKind, RangeKey};

/* ───────────────────────── Tagged values ─────────────────────────────
A `TaggedValue` is what flows between the engine and a compute backend,
and what crosses the IPC boundary. Its shape (scalar, dense array or
memoized range) and its kind (float, text, error, empty) are both derived
from the payload, so a "float array holding strings" cannot be built.
Array data is column-major: element (row, col) lives at col * rows + row.
--------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Array,
    MemoizedRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Float,
    Text,
    Error,
    Empty,
}

/// Element kind of a memoized range entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    Float,
    Text,
}

impl From<RangeKind> for Kind {
    fn from(kind: RangeKind) -> Self {
        match kind {
            RangeKind::Float => Kind::Float,
            RangeKind::Text => Kind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Float(f64),
    Text(String),
    Error(ErrorKind),
    Empty,
    FloatArray(Vec<f64>),
    TextArray(Vec<String>),
    /// Reference into the range repository; the data stays there.
    RangeRef { key: RangeKey, kind: RangeKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// `rows * cols` does not match the number of array elements.
    ShapeMismatch { rows: u32, cols: u32, len: usize },
}

impl Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::ShapeMismatch { rows, cols, len } => {
                write!(f, "array of {len} elements cannot be shaped {rows}x{cols}")
            }
        }
    }
}

impl Error for ValueError {}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedValue {
    rows: u32,
    cols: u32,
    payload: Payload,
}

impl TaggedValue {
    pub fn number(n: f64) -> Self {
        Self::scalar(Payload::Float(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::scalar(Payload::Text(s.into()))
    }

    pub fn error(kind: ErrorKind) -> Self {
        Self::scalar(Payload::Error(kind))
    }

    pub fn empty() -> Self {
        Self::scalar(Payload::Empty)
    }

    fn scalar(payload: Payload) -> Self {
        Self {
            rows: 1,
            cols: 1,
            payload,
        }
    }

    pub fn float_array(rows: u32, cols: u32, data: Vec<f64>) -> Result<Self, ValueError> {
        check_shape(rows, cols, data.len())?;
        Ok(Self {
            rows,
            cols,
            payload: Payload::FloatArray(data),
        })
    }

    pub fn text_array(rows: u32, cols: u32, data: Vec<String>) -> Result<Self, ValueError> {
        check_shape(rows, cols, data.len())?;
        Ok(Self {
            rows,
            cols,
            payload: Payload::TextArray(data),
        })
    }

    /// Reference a range repository entry of `rows × cols` cells.
    pub fn memoized(key: RangeKey, rows: u32, cols: u32, kind: RangeKind) -> Self {
        Self {
            rows,
            cols,
            payload: Payload::RangeRef { key, kind },
        }
    }

    /// Interpret stored cell text: error markers become errors, everything
    /// else stays text.
    pub fn from_stored_text(s: &str) -> Self {
        match ErrorKind::parse(s) {
            Some(kind) => Self::error(kind),
            None => Self::text(s),
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Number of elements described by the shape.
    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.payload, Payload::Empty)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn shape(&self) -> Shape {
        match self.payload {
            Payload::Float(_) | Payload::Text(_) | Payload::Error(_) | Payload::Empty => {
                Shape::Scalar
            }
            Payload::FloatArray(_) | Payload::TextArray(_) => Shape::Array,
            Payload::RangeRef { .. } => Shape::MemoizedRange,
        }
    }

    pub fn kind(&self) -> Kind {
        match &self.payload {
            Payload::Float(_) | Payload::FloatArray(_) => Kind::Float,
            Payload::Text(_) | Payload::TextArray(_) => Kind::Text,
            Payload::Error(_) => Kind::Error,
            Payload::Empty => Kind::Empty,
            Payload::RangeRef { kind, .. } => (*kind).into(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape() == Shape::Scalar
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<ErrorKind> {
        match self.payload {
            Payload::Error(kind) => Some(kind),
            _ => None,
        }
    }

    /// Numeric view of a scalar: floats as-is, empty as 0, numeric text
    /// parsed. Errors and non-numeric text have none.
    pub fn coerce_number(&self) -> Option<f64> {
        match &self.payload {
            Payload::Float(n) => Some(*n),
            Payload::Empty => Some(0.0),
            Payload::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Element `index` (column-major) of a scalar or dense array as a scalar.
    /// Scalars answer every index with themselves; memoized ranges need the
    /// repository and answer `None`.
    pub fn element(&self, index: usize) -> Option<TaggedValue> {
        match &self.payload {
            Payload::FloatArray(v) => v.get(index).map(|n| Self::number(*n)),
            Payload::TextArray(v) => v.get(index).map(|s| Self::text(s.clone())),
            Payload::RangeRef { .. } => None,
            _ => Some(self.clone()),
        }
    }
}

fn check_shape(rows: u32, cols: u32, len: usize) -> Result<(), ValueError> {
    if rows as usize * cols as usize != len || len == 0 {
        return Err(ValueError::ShapeMismatch { rows, cols, len });
    }
    Ok(())
}

/// Render a number the way it is written back into text cells: integral
/// values without a fractional part, everything else in shortest form.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Float(n) => f.write_str(&format_number(*n)),
            Payload::Text(s) => f.write_str(s),
            Payload::Error(kind) => write!(f, "{kind}"),
            Payload::Empty => Ok(()),
            Payload::FloatArray(_) => write!(f, "{{{}x{} float array}}", self.rows, self.cols),
            Payload::TextArray(_) => write!(f, "{{{}x{} text array}}", self.rows, self.cols),
            Payload::RangeRef { key, .. } => write!(f, "{{{key}}}"),
        }
    }
}

impl From<f64> for TaggedValue {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<&str> for TaggedValue {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<ErrorKind> for TaggedValue {
    fn from(kind: ErrorKind) -> Self {
        Self::error(kind)
    }
}
