//! Dataset columns: the leaves of every term graph

use crate::error::{PipelineError, Result};
use crate::pipeline::classifiers::Classifier;
use crate::pipeline::dtype::{DType, Scalar};
use crate::pipeline::factors::Factor;
use crate::pipeline::filters::Filter;
use crate::pipeline::term::{role_for, Term, TermKind, TermRole, TermSpec};
use std::convert::TryFrom;
use std::fmt;

/// Extra coordinates selecting one slice of a periodic dataset, e.g.
/// quarterly fundamentals one report back is `("10-Q", -1)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeriodCoords {
    /// Reporting frequency label; a trailing `Y` means annual, `Q` or `T` quarterly
    pub dimension: String,
    /// 0 is the most recent period, -1 the one before
    pub period_offset: i32,
}

/// A loadable column of a dataset
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Column(Term);

impl Column {
    /// Column with the dtype's default missing value
    pub fn new(dataset: &str, name: &str, dtype: DType) -> Self {
        Column(Self::spec(dataset, name, dtype, None).intern())
    }

    /// Column with a caller-chosen missing value
    pub fn with_missing_value(dataset: &str, name: &str, dtype: DType, missing_value: Scalar) -> Result<Self> {
        Ok(Column(Self::spec(dataset, name, dtype, None).missing_value(missing_value).build()?))
    }

    /// Column of one slice of a periodic dataset
    pub fn periodic(dataset: &str, name: &str, dtype: DType, dimension: &str, period_offset: i32) -> Self {
        let period = PeriodCoords {
            dimension: dimension.to_string(),
            period_offset,
        };
        Column(Self::spec(dataset, name, dtype, Some(period)).intern())
    }

    fn spec(dataset: &str, name: &str, dtype: DType, period: Option<PeriodCoords>) -> TermSpec {
        TermSpec::new(
            TermKind::Column {
                dataset: dataset.to_string(),
                name: name.to_string(),
                period,
            },
            TermRole::Column,
            dtype,
        )
        .window_safe(true)
    }

    /// Slice coordinates, if the column belongs to a periodic dataset
    pub fn period(&self) -> Option<&PeriodCoords> {
        match self.0.kind() {
            TermKind::Column { period, .. } => period.as_ref(),
            _ => None,
        }
    }

    /// The same column in the slice `period_offset` periods back
    pub fn with_period_offset(&self, period_offset: i32) -> Result<Column> {
        let period = self.period().ok_or_else(|| {
            PipelineError::InvalidPeriodicInput(format!(
                "Column must belong to a DataSet with a period_offset coordinate but got: {}",
                self
            ))
        })?;
        let coords = PeriodCoords {
            dimension: period.dimension.clone(),
            period_offset,
        };
        let term = Self::spec(self.dataset(), self.name(), self.dtype(), Some(coords))
            .missing_value(self.missing_value().clone())
            .build()?;
        Ok(Column(term))
    }

    pub fn dataset(&self) -> &str {
        match self.0.kind() {
            TermKind::Column { dataset, .. } => dataset,
            _ => "",
        }
    }

    pub fn name(&self) -> &str {
        match self.0.kind() {
            TermKind::Column { name, .. } => name,
            _ => "",
        }
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype()
    }

    pub fn missing_value(&self) -> &Scalar {
        self.0.missing_value()
    }

    pub fn term(&self) -> &Term {
        &self.0
    }

    /// Most recent value of the column. Bool columns give filters, int and
    /// categorical columns give classifiers, everything else gives factors.
    pub fn latest(&self) -> Result<Term> {
        self.latest_masked(None)
    }

    /// Most recent value, computed only where `mask` holds
    pub fn latest_masked(&self, mask: Option<&Filter>) -> Result<Term> {
        self.0
            .derive(TermKind::Latest, role_for(self.dtype()), self.dtype())
            .missing_value(self.missing_value().clone())
            .mask(mask.map(|m| m.term().clone()))
            .window_length(1)
            .window_safe(true)
            .build()
    }

    pub fn latest_factor(&self) -> Result<Factor> {
        Factor::try_from(self.latest()?)
    }

    pub fn latest_filter(&self) -> Result<Filter> {
        Filter::try_from(self.latest()?)
    }

    pub fn latest_classifier(&self) -> Result<Classifier> {
        Classifier::try_from(self.latest()?)
    }

    /// Wrap a term known to be a column
    pub(crate) fn from_term(term: Term) -> Option<Self> {
        match term.kind() {
            TermKind::Column { .. } => Some(Column(term)),
            _ => None,
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.0.graph_repr(), self.dtype())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.graph_repr())
    }
}

impl From<Column> for Term {
    fn from(column: Column) -> Term {
        column.0
    }
}

impl From<&Column> for Term {
    fn from(column: &Column) -> Term {
        column.0.clone()
    }
}

/// Daily OHLCV pricing
pub struct EquityPricing;

impl EquityPricing {
    pub const NAME: &'static str = "EquityPricing";

    pub fn open() -> Column {
        Column::new(Self::NAME, "open", DType::Float64)
    }

    pub fn high() -> Column {
        Column::new(Self::NAME, "high", DType::Float64)
    }

    pub fn low() -> Column {
        Column::new(Self::NAME, "low", DType::Float64)
    }

    pub fn close() -> Column {
        Column::new(Self::NAME, "close", DType::Float64)
    }

    pub fn volume() -> Column {
        Column::new(Self::NAME, "volume", DType::Float64)
    }

    pub fn columns() -> Vec<Column> {
        vec![Self::open(), Self::high(), Self::low(), Self::close(), Self::volume()]
    }
}
