//! Pipeline Filters - boolean terms
//!
//! Filters are used to mask other computations and to screen the assets
//! that appear in a pipeline's output.

use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::dtype::{DType, Scalar};
use crate::pipeline::factors::Factor;
use crate::pipeline::term::{CustomKernel, CustomSpec, LogicalOp, Term, TermKind, TermRole, TermSpec};
use crate::types::{AssetId, Session};
use ndarray::Array1;
use std::any::TypeId;
use std::convert::TryFrom;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

/// User-defined windowed screen
///
/// Like [`CustomFactor`](crate::pipeline::CustomFactor), but writes one bool
/// per admitted asset. `out` starts all false.
pub trait CustomFilter: Send + Sync + 'static {
    fn name(&self) -> String;

    fn num_inputs(&self) -> Option<usize> {
        None
    }

    fn window_safe(&self) -> bool {
        false
    }

    fn compute(
        &self,
        today: Session,
        assets: &[AssetId],
        inputs: &[TermArray],
        out: &mut Array1<bool>,
    ) -> Result<()>;
}

/// A boolean term
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Filter(Term);

impl TryFrom<Term> for Filter {
    type Error = PipelineError;

    fn try_from(term: Term) -> Result<Self> {
        if term.role() == TermRole::Filter && term.dtype() == DType::Bool {
            Ok(Filter(term))
        } else {
            Err(PipelineError::TypeMismatch {
                context: format!("Filter from {}", term),
                expected: "Filter".to_string(),
                actual: format!("{:?} of dtype {}", term.role(), term.dtype()),
            })
        }
    }
}

impl From<Filter> for Term {
    fn from(filter: Filter) -> Term {
        filter.0
    }
}

impl From<&Filter> for Term {
    fn from(filter: &Filter) -> Term {
        filter.0.clone()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.0)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

fn wrap(term: Term) -> Filter {
    Filter(term)
}

impl Filter {
    pub fn term(&self) -> &Term {
        &self.0
    }

    pub fn window_safe(&self) -> bool {
        self.0.window_safe()
    }

    /// Filter whose values are supplied directly to the engine
    pub fn external(name: &str, window_safe: bool) -> Result<Filter> {
        TermSpec::new(
            TermKind::External { name: name.to_string() },
            TermRole::Filter,
            DType::Bool,
        )
        .window_safe(window_safe)
        .build()
        .map(wrap)
    }

    pub fn constant(value: bool) -> Result<Filter> {
        Term::constant(Scalar::Bool(value)).map(wrap)
    }

    /// Filter computed by a [`CustomFilter`] over trailing windows of `inputs`
    pub fn custom<F: CustomFilter>(
        filter: F,
        inputs: Vec<Term>,
        window_length: usize,
        mask: Option<&Filter>,
    ) -> Result<Filter> {
        let key = filter.name();
        if let Some(expected) = filter.num_inputs() {
            if expected != inputs.len() {
                return Err(PipelineError::WrongNumberOfInputs {
                    term: key,
                    expected,
                    actual: inputs.len(),
                });
            }
        }
        let window_safe = filter.window_safe();
        let spec = CustomSpec {
            key,
            type_id: TypeId::of::<F>(),
            kernel: CustomKernel::Filter(Arc::new(filter)),
        };
        TermSpec::new(TermKind::Custom(spec), TermRole::Filter, DType::Bool)
            .inputs(inputs)
            .mask(mask.map(|m| m.0.clone()))
            .window_length(window_length)
            .window_safe(window_safe)
            .build()
            .map(wrap)
    }

    /// True for a fixed set of assets
    pub fn static_assets(assets: impl IntoIterator<Item = AssetId>) -> Result<Filter> {
        let mut assets: Vec<AssetId> = assets.into_iter().collect();
        assets.sort_unstable();
        assets.dedup();
        TermSpec::new(TermKind::StaticAssets(assets), TermRole::Filter, DType::Bool)
            .window_safe(true)
            .build()
            .map(wrap)
    }

    pub fn single_asset(asset: AssetId) -> Result<Filter> {
        Self::static_assets([asset])
    }

    /// True where `input` had no missing value in any of the last `window_length` sessions
    pub fn all_present(input: impl Into<Term>, window_length: usize) -> Result<Filter> {
        let input = input.into();
        input
            .derive(TermKind::AllPresent, TermRole::Filter, DType::Bool)
            .window_length(window_length)
            .build()
            .map(wrap)
    }

    fn window_reduction(input: &Filter, kind: TermKind, window_length: usize) -> Result<Filter> {
        input
            .0
            .derive(kind, TermRole::Filter, DType::Bool)
            .window_length(window_length)
            .build()
            .map(wrap)
    }

    /// True where `input` held on every one of the last `window_length` sessions
    pub fn all(input: &Filter, window_length: usize) -> Result<Filter> {
        Self::window_reduction(input, TermKind::WindowAll, window_length)
    }

    /// True where `input` held on any of the last `window_length` sessions
    pub fn any(input: &Filter, window_length: usize) -> Result<Filter> {
        Self::window_reduction(input, TermKind::WindowAny, window_length)
    }

    /// True where `input` held on at least `n` of the last `window_length` sessions
    pub fn at_least_n(input: &Filter, window_length: usize, n: usize) -> Result<Filter> {
        Self::window_reduction(input, TermKind::AtLeastN { n }, window_length)
    }

    fn logical(op: LogicalOp, inputs: Vec<Term>) -> Result<Filter> {
        let window_safe = inputs.iter().all(Term::window_safe);
        TermSpec::new(TermKind::Logical(op), TermRole::Filter, DType::Bool)
            .inputs(inputs)
            .window_safe(window_safe)
            .build()
            .map(wrap)
    }

    pub fn and(&self, other: &Filter) -> Result<Filter> {
        Self::logical(LogicalOp::And, vec![self.0.clone(), other.0.clone()])
    }

    pub fn or(&self, other: &Filter) -> Result<Filter> {
        Self::logical(LogicalOp::Or, vec![self.0.clone(), other.0.clone()])
    }

    pub fn invert(&self) -> Result<Filter> {
        Self::logical(LogicalOp::Not, vec![self.0.clone()])
    }

    /// 1.0 where the filter holds, 0.0 elsewhere
    pub fn as_factor(&self) -> Result<Factor> {
        let term = self
            .0
            .derive(TermKind::AsFactor, TermRole::Factor, DType::Float64)
            .window_safe(self.window_safe())
            .build()?;
        Factor::try_from(term)
    }

    /// Value from `periods` sessions ago
    pub fn shift(&self, periods: usize) -> Result<Filter> {
        self.0.shifted(periods).map(wrap)
    }

    /// One asset's value broadcast to every asset
    pub fn slice(&self, asset: AssetId) -> Result<Filter> {
        self.0.sliced(asset).map(wrap)
    }
}

impl BitAnd for &Filter {
    type Output = Result<Filter>;

    fn bitand(self, rhs: &Filter) -> Result<Filter> {
        self.and(rhs)
    }
}

impl BitOr for &Filter {
    type Output = Result<Filter>;

    fn bitor(self, rhs: &Filter) -> Result<Filter> {
        self.or(rhs)
    }
}

impl Not for &Filter {
    type Output = Result<Filter>;

    fn not(self) -> Result<Filter> {
        self.invert()
    }
}
