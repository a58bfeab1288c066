//! Term data types, missing values and per-dtype capabilities

use crate::types::NAT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Data types that can be computed by terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 64-bit float, missing value NaN
    Float64,
    /// Nanoseconds since epoch, missing value NaT
    DatetimeNs,
    /// 64-bit integer, missing value -1 unless overridden
    Int64,
    /// Interned string labels, missing value `None` unless overridden
    Categorical,
    /// Boolean, missing value false
    Bool,
}

impl DType {
    /// Default missing-value sentinel for this dtype
    pub fn default_missing_value(&self) -> Scalar {
        match self {
            DType::Float64 => Scalar::Float(f64::NAN),
            DType::DatetimeNs => Scalar::Datetime(NAT),
            DType::Int64 => Scalar::Int(-1),
            DType::Categorical => Scalar::Str(None),
            DType::Bool => Scalar::Bool(false),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float64)
    }

    /// Dtypes a Factor may carry
    pub fn is_factor_dtype(&self) -> bool {
        matches!(self, DType::Float64 | DType::Int64 | DType::DatetimeNs)
    }

    /// Dtypes a Classifier may carry
    pub fn is_classifier_dtype(&self) -> bool {
        matches!(self, DType::Int64 | DType::Categorical)
    }

    /// Whether a scalar is a legal value for this dtype
    pub fn accepts(&self, value: &Scalar) -> bool {
        matches!(
            (self, value),
            (DType::Float64, Scalar::Float(_))
                | (DType::DatetimeNs, Scalar::Datetime(_))
                | (DType::Int64, Scalar::Int(_))
                | (DType::Categorical, Scalar::Str(_))
                | (DType::Bool, Scalar::Bool(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::DatetimeNs => "datetime64[ns]",
            DType::Int64 => "int64",
            DType::Categorical => "category",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value, also used for missing values and constants.
///
/// Floats compare and hash by bit pattern (with all NaNs collapsed) so that
/// scalars can participate in structural term identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Scalar {
    Float(f64),
    Datetime(i64),
    Int(i64),
    Str(Option<String>),
    Bool(bool),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Float(_) => DType::Float64,
            Scalar::Datetime(_) => DType::DatetimeNs,
            Scalar::Int(_) => DType::Int64,
            Scalar::Str(_) => DType::Categorical,
            Scalar::Bool(_) => DType::Bool,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) | Scalar::Datetime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(v) => v.as_deref(),
            _ => None,
        }
    }

    /// Whether this value is missing given a term's missing-value sentinel
    pub fn is_missing(&self, missing: &Scalar) -> bool {
        match self {
            Scalar::Float(v) => v.is_nan(),
            Scalar::Str(None) => true,
            other => other == missing,
        }
    }

    fn float_key(v: f64) -> u64 {
        if v.is_nan() {
            f64::NAN.to_bits()
        } else if v == 0.0 {
            0
        } else {
            v.to_bits()
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Float(a), Scalar::Float(b)) => Self::float_key(*a) == Self::float_key(*b),
            (Scalar::Datetime(a), Scalar::Datetime(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Float(v) => Self::float_key(*v).hash(state),
            Scalar::Datetime(v) | Scalar::Int(v) => v.hash(state),
            Scalar::Str(v) => v.hash(state),
            Scalar::Bool(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Datetime(v) if *v == NAT => write!(f, "NaT"),
            Scalar::Datetime(v) => write!(f, "{}ns", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Str(Some(s)) => write!(f, "'{}'", s),
            Scalar::Str(None) => write!(f, "None"),
            Scalar::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(Some(v.to_string()))
    }
}

/// `f64` usable as a hash key inside term parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct F64Key(pub f64);

impl PartialEq for F64Key {
    fn eq(&self, other: &Self) -> bool {
        Scalar::float_key(self.0) == Scalar::float_key(other.0)
    }
}

impl Eq for F64Key {}

impl Hash for F64Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Scalar::float_key(self.0).hash(state);
    }
}
