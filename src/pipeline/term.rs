//! Pipeline Term - Core computational expression system
//!
//! Terms are immutable, reference-counted nodes. Two terms are equal when they
//! describe the same computation (operation, parameters, inputs, mask, dtype),
//! which lets the graph deduplicate identical nodes no matter how many times
//! the caller builds them.

use crate::error::{PipelineError, Result};
use crate::pipeline::classifiers::CustomClassifier;
use crate::pipeline::dataset::PeriodCoords;
use crate::pipeline::dtype::{DType, F64Key, Scalar};
use crate::pipeline::factors::CustomFactor;
use crate::pipeline::filters::CustomFilter;
use crate::pipeline::normalize::NormalizeOp;
use crate::pipeline::rank::RankMethod;
use crate::pipeline::summary::SummaryFunc;
use crate::types::AssetId;
use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// What kind of value a term produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermRole {
    /// Loadable dataset column, only consumable through windows
    Column,
    Factor,
    Filter,
    Classifier,
}

/// Elementwise arithmetic between float factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl ArithOp {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Pow => a.powf(b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Pow => "pow",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Pow => "**",
        }
    }
}

/// Comparison producing a Filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply<T: PartialOrd>(&self, a: T, b: T) -> bool {
        match self {
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullCheck {
    IsNan,
    NotNan,
    IsFinite,
    IsNull,
    NotNull,
}

/// String predicates on categorical classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrOp {
    Eq,
    Ne,
    StartsWith,
    EndsWith,
    Contains,
}

/// The user computation behind a custom term
#[derive(Clone)]
pub(crate) enum CustomKernel {
    Factor(Arc<dyn CustomFactor>),
    Filter(Arc<dyn CustomFilter>),
    Classifier(Arc<dyn CustomClassifier>),
}

/// Handle to a user-defined term, identified by its concrete type and key
#[derive(Clone)]
pub struct CustomSpec {
    pub(crate) key: String,
    pub(crate) type_id: TypeId,
    pub(crate) kernel: CustomKernel,
}

impl PartialEq for CustomSpec {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.key == other.key
    }
}

impl Eq for CustomSpec {}

impl Hash for CustomSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Debug for CustomSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Custom({})", self.key)
    }
}

/// The operation a term performs. Inputs live on the node, parameters here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// `period` is set for columns of one slice of a periodic dataset
    Column { dataset: String, name: String, period: Option<PeriodCoords> },
    /// Values supplied by the caller through an initial workspace
    External { name: String },
    Latest,
    Constant(Scalar),
    Custom(CustomSpec),
    /// Named field of a multi-output parent (inputs[0])
    Output { name: String, index: usize, count: usize },
    Rank { method: RankMethod, ascending: bool },
    GroupedTransform(NormalizeOp),
    Quantiles { bins: usize },
    Summary(SummaryFunc),
    Arithmetic(ArithOp),
    Negate,
    Abs,
    /// Filter read as 1.0 / 0.0
    AsFactor,
    /// True for the largest value per row, or per group when a classifier is given
    Maximum,
    Compare(CompareOp),
    Logical(LogicalOp),
    NullCheck(NullCheck),
    FillNa,
    Where,
    Shift { periods: usize },
    Clip { min: F64Key, max: F64Key },
    IsIn(Vec<Scalar>),
    StrPredicate { op: StrOp, value: String },
    PercentileBetween { min: F64Key, max: F64Key },
    Relabel(Vec<(String, Option<String>)>),
    Returns { exclude_window_length: usize },
    PercentChange,
    SimpleMovingAverage,
    ExponentialWeightedMovingAverage { decay_rate: F64Key },
    Vwap,
    AverageDollarVolume,
    StaticAssets(Vec<AssetId>),
    AllPresent,
    WindowAll,
    WindowAny,
    AtLeastN { n: usize },
    Everything,
    Slice { asset: AssetId },
}

impl TermKind {
    /// Whether inputs are consumed as trailing windows rather than aligned rows
    pub fn is_windowed(&self) -> bool {
        matches!(
            self,
            TermKind::Latest
                | TermKind::Custom(_)
                | TermKind::Shift { .. }
                | TermKind::Returns { .. }
                | TermKind::PercentChange
                | TermKind::SimpleMovingAverage
                | TermKind::ExponentialWeightedMovingAverage { .. }
                | TermKind::Vwap
                | TermKind::AverageDollarVolume
                | TermKind::AllPresent
                | TermKind::WindowAll
                | TermKind::WindowAny
                | TermKind::AtLeastN { .. }
        )
    }
}

#[derive(Debug)]
pub struct TermNode {
    kind: TermKind,
    role: TermRole,
    dtype: DType,
    missing_value: Scalar,
    inputs: Vec<Term>,
    mask: Option<Term>,
    window_length: usize,
    window_safe: bool,
    hash: u64,
}

/// A node in the computation graph
#[derive(Clone)]
pub struct Term(Arc<TermNode>);

/// Everything needed to build a [`Term`]
#[derive(Debug, Clone)]
pub struct TermSpec {
    pub kind: TermKind,
    pub role: TermRole,
    pub dtype: DType,
    pub missing_value: Scalar,
    pub inputs: Vec<Term>,
    pub mask: Option<Term>,
    pub window_length: usize,
    pub window_safe: bool,
}

impl TermSpec {
    pub fn new(kind: TermKind, role: TermRole, dtype: DType) -> Self {
        Self {
            kind,
            role,
            dtype,
            missing_value: dtype.default_missing_value(),
            inputs: Vec::new(),
            mask: None,
            window_length: 0,
            window_safe: false,
        }
    }

    pub fn inputs(mut self, inputs: Vec<Term>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn mask(mut self, mask: Option<Term>) -> Self {
        self.mask = mask;
        self
    }

    pub fn window_length(mut self, window_length: usize) -> Self {
        self.window_length = window_length;
        self
    }

    pub fn window_safe(mut self, window_safe: bool) -> Self {
        self.window_safe = window_safe;
        self
    }

    pub fn missing_value(mut self, missing_value: Scalar) -> Self {
        self.missing_value = missing_value;
        self
    }

    /// Validate structural rules and intern into a [`Term`]
    pub fn build(self) -> Result<Term> {
        let name = self.describe();
        if !self.dtype.accepts(&self.missing_value) {
            return Err(PipelineError::InvalidFillValue {
                term: name,
                dtype: self.dtype.to_string(),
                value: self.missing_value.to_string(),
            });
        }
        let windowed = self.kind.is_windowed();
        if windowed && self.window_length == 0 {
            return Err(PipelineError::InvalidWindowLength {
                term: name,
                reason: "windowed terms require window_length >= 1".to_string(),
            });
        }
        if !windowed && self.window_length != 0 {
            return Err(PipelineError::InvalidWindowLength {
                term: name,
                reason: "only windowed terms may declare a window_length".to_string(),
            });
        }
        for input in &self.inputs {
            if !windowed && input.role() == TermRole::Column {
                return Err(PipelineError::InvalidInput {
                    term: name,
                    reason: format!("column {} must be consumed through a window, e.g. .latest()", input),
                });
            }
            if input.output_names().is_some() && !matches!(self.kind, TermKind::Output { .. }) {
                return Err(PipelineError::MultiOutputTermUsedDirectly(input.to_string()));
            }
        }
        if let Some(mask) = &self.mask {
            if mask.role() != TermRole::Filter {
                return Err(PipelineError::TypeMismatch {
                    context: format!("mask of {}", name),
                    expected: "Filter".to_string(),
                    actual: format!("{:?}", mask.role()),
                });
            }
        }

        Ok(self.intern())
    }

    /// Hash and wrap without validation
    pub(crate) fn intern(self) -> Term {
        let mut hasher = DefaultHasher::new();
        self.kind.hash(&mut hasher);
        self.role.hash(&mut hasher);
        self.dtype.hash(&mut hasher);
        self.missing_value.hash(&mut hasher);
        for input in &self.inputs {
            input.0.hash.hash(&mut hasher);
        }
        self.mask.as_ref().map(|m| m.0.hash).hash(&mut hasher);
        self.window_length.hash(&mut hasher);
        self.window_safe.hash(&mut hasher);

        Term(Arc::new(TermNode {
            kind: self.kind,
            role: self.role,
            dtype: self.dtype,
            missing_value: self.missing_value,
            inputs: self.inputs,
            mask: self.mask,
            window_length: self.window_length,
            window_safe: self.window_safe,
            hash: hasher.finish(),
        }))
    }

    fn describe(&self) -> String {
        format!("{:?}", self.kind)
    }
}

impl Term {
    pub fn kind(&self) -> &TermKind {
        &self.0.kind
    }

    pub fn role(&self) -> TermRole {
        self.0.role
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    pub fn missing_value(&self) -> &Scalar {
        &self.0.missing_value
    }

    pub fn inputs(&self) -> &[Term] {
        &self.0.inputs
    }

    pub fn mask(&self) -> Option<&Term> {
        self.0.mask.as_ref()
    }

    pub fn window_length(&self) -> usize {
        self.0.window_length
    }

    /// Whether this term's output may feed another term's trailing window
    pub fn window_safe(&self) -> bool {
        self.0.window_safe
    }

    pub fn is_windowed(&self) -> bool {
        self.0.kind.is_windowed()
    }

    /// Output names for multi-output custom factors
    pub fn output_names(&self) -> Option<Vec<String>> {
        match &self.0.kind {
            TermKind::Custom(CustomSpec {
                kernel: CustomKernel::Factor(factor),
                ..
            }) => {
                let outputs = factor.outputs();
                if outputs.is_empty() {
                    None
                } else {
                    Some(outputs)
                }
            }
            _ => None,
        }
    }

    /// Every term this one reads, inputs first then mask
    pub fn dependencies(&self) -> impl Iterator<Item = &Term> {
        self.0.inputs.iter().chain(self.0.mask.iter())
    }

    /// Short description without inputs
    pub fn graph_repr(&self) -> String {
        match &self.0.kind {
            TermKind::Column {
                dataset,
                name,
                period: None,
            } => format!("{}.{}", dataset, name),
            TermKind::Column {
                dataset,
                name,
                period: Some(p),
            } => format!("{}<{}, {}>.{}", dataset, p.dimension, p.period_offset, name),
            TermKind::External { name } => name.clone(),
            TermKind::Latest => "Latest".to_string(),
            TermKind::Constant(v) => format!("Constant({})", v),
            TermKind::Custom(spec) => spec.key.clone(),
            TermKind::Output { name, .. } => match self.0.inputs.first() {
                Some(parent) => format!("{}.{}", parent.graph_repr(), name),
                None => name.clone(),
            },
            TermKind::Rank { method, .. } => format!("Rank(method='{}')", method),
            TermKind::GroupedTransform(op) => format!("GroupedRowTransform('{}')", op.name()),
            TermKind::Quantiles { bins } => format!("Quantiles({})", bins),
            TermKind::Summary(func) => format!("{}()", func.name()),
            TermKind::Arithmetic(op) => format!("Arithmetic({})", op.symbol()),
            TermKind::Compare(op) => format!("Compare({})", op.symbol()),
            other => {
                let debug = format!("{:?}", other);
                debug.split(['(', ' ', '{']).next().unwrap_or_default().to_string()
            }
        }
    }

    /// Spec for a term reading `self` as its only input
    pub(crate) fn derive(&self, kind: TermKind, role: TermRole, dtype: DType) -> TermSpec {
        TermSpec::new(kind, role, dtype).inputs(vec![self.clone()])
    }

    /// A term holding `value` in every cell
    pub fn constant(value: Scalar) -> Result<Term> {
        let dtype = value.dtype();
        TermSpec::new(TermKind::Constant(value), role_for(dtype), dtype)
            .window_safe(true)
            .build()
    }

    /// Fail with a dtype error unless this term is float64
    pub(crate) fn require_float(&self, method: &str) -> Result<()> {
        if self.dtype().is_float() {
            Ok(())
        } else {
            Err(PipelineError::UnsupportedDType {
                method: method.to_string(),
                dtype: self.dtype().to_string(),
            })
        }
    }

    /// Convert a fill value to this term's dtype where the conversion is lossless
    pub(crate) fn coerce_scalar(&self, value: Scalar) -> Result<Scalar> {
        let coerced = match (self.dtype(), value) {
            (DType::Float64, Scalar::Int(v)) => Scalar::Float(v as f64),
            (DType::DatetimeNs, Scalar::Int(v)) => Scalar::Datetime(v),
            (_, v) => v,
        };
        if self.dtype().accepts(&coerced) {
            Ok(coerced)
        } else {
            Err(PipelineError::InvalidFillValue {
                term: self.to_string(),
                dtype: self.dtype().to_string(),
                value: coerced.to_string(),
            })
        }
    }

    /// Boolean test of each cell against the missing value or non-finite floats
    pub(crate) fn null_check(&self, check: NullCheck) -> Result<Term> {
        let method = match check {
            NullCheck::IsNan => Some("isnan"),
            NullCheck::NotNan => Some("notnan"),
            NullCheck::IsFinite => Some("isfinite"),
            NullCheck::IsNull | NullCheck::NotNull => None,
        };
        if let Some(method) = method {
            self.require_float(method)?;
        }
        self.derive(TermKind::NullCheck(check), TermRole::Filter, DType::Bool)
            .window_safe(self.window_safe())
            .build()
    }

    /// Replace missing cells with the values of `fill`
    pub(crate) fn fill_missing(&self, fill: &Term) -> Result<Term> {
        if fill.dtype() != self.dtype() {
            return Err(PipelineError::TypeMismatch {
                context: format!("fillna of {}", self),
                expected: self.dtype().to_string(),
                actual: fill.dtype().to_string(),
            });
        }
        TermSpec::new(TermKind::FillNa, self.role(), self.dtype())
            .inputs(vec![self.clone(), fill.clone()])
            .missing_value(self.missing_value().clone())
            .window_safe(self.window_safe() && fill.window_safe())
            .build()
    }

    /// Keep cells where `cond` holds, take `other` elsewhere
    pub(crate) fn select_where(&self, cond: &Term, other: &Term) -> Result<Term> {
        if cond.role() != TermRole::Filter {
            return Err(PipelineError::TypeMismatch {
                context: format!("where condition of {}", self),
                expected: "Filter".to_string(),
                actual: format!("{:?}", cond.role()),
            });
        }
        if other.dtype() != self.dtype() {
            return Err(PipelineError::TypeMismatch {
                context: format!("where fill of {}", self),
                expected: self.dtype().to_string(),
                actual: other.dtype().to_string(),
            });
        }
        TermSpec::new(TermKind::Where, self.role(), self.dtype())
            .inputs(vec![self.clone(), cond.clone(), other.clone()])
            .missing_value(self.missing_value().clone())
            .window_safe(self.window_safe() && cond.window_safe() && other.window_safe())
            .build()
    }

    /// The cross-section from `periods` sessions earlier
    pub(crate) fn shifted(&self, periods: usize) -> Result<Term> {
        self.derive(TermKind::Shift { periods }, self.role(), self.dtype())
            .missing_value(self.missing_value().clone())
            .window_length(periods + 1)
            .window_safe(self.window_safe())
            .build()
    }

    /// One asset's column broadcast to every asset
    pub(crate) fn sliced(&self, asset: AssetId) -> Result<Term> {
        self.derive(TermKind::Slice { asset }, self.role(), self.dtype())
            .missing_value(self.missing_value().clone())
            .window_safe(self.window_safe())
            .build()
    }
}

/// Role a term of `dtype` takes when nothing else decides it
pub(crate) fn role_for(dtype: DType) -> TermRole {
    match dtype {
        DType::Bool => TermRole::Filter,
        DType::Int64 | DType::Categorical => TermRole::Classifier,
        DType::Float64 | DType::DatetimeNs => TermRole::Factor,
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let (a, b) = (&*self.0, &*other.0);
        a.hash == b.hash
            && a.kind == b.kind
            && a.role == b.role
            && a.dtype == b.dtype
            && a.missing_value == b.missing_value
            && a.window_length == b.window_length
            && a.window_safe == b.window_safe
            && a.inputs == b.inputs
            && a.mask == b.mask
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash.hash(state);
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            TermKind::Arithmetic(op) if self.0.inputs.len() == 2 => {
                write!(f, "({} {} {})", self.0.inputs[0], op.symbol(), self.0.inputs[1])
            }
            TermKind::Compare(op) if self.0.inputs.len() == 2 => {
                write!(f, "({} {} {})", self.0.inputs[0], op.symbol(), self.0.inputs[1])
            }
            TermKind::Latest | TermKind::Summary(_) if self.0.inputs.len() == 1 => {
                write!(f, "{}.{}", self.0.inputs[0], self.graph_repr().to_lowercase())
            }
            _ => f.write_str(&self.graph_repr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external(name: &str) -> Term {
        TermSpec::new(
            TermKind::External { name: name.to_string() },
            TermRole::Factor,
            DType::Float64,
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_structural_equality() {
        let a = external("f");
        let b = external("f");
        assert_eq!(a, b);
        assert_ne!(a, external("g"));

        let neg_a = TermSpec::new(TermKind::Negate, TermRole::Factor, DType::Float64)
            .inputs(vec![a])
            .build()
            .unwrap();
        let neg_b = TermSpec::new(TermKind::Negate, TermRole::Factor, DType::Float64)
            .inputs(vec![b])
            .build()
            .unwrap();
        assert_eq!(neg_a, neg_b);
    }

    #[test]
    fn test_window_safe_is_part_of_identity() {
        let safe = TermSpec::new(
            TermKind::External { name: "f".to_string() },
            TermRole::Factor,
            DType::Float64,
        )
        .window_safe(true)
        .build()
        .unwrap();
        assert_ne!(safe, external("f"));
    }

    #[test]
    fn test_windowed_requires_window_length() {
        let err = TermSpec::new(TermKind::SimpleMovingAverage, TermRole::Factor, DType::Float64)
            .inputs(vec![external("f")])
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWindowLength { .. }));
    }

    #[test]
    fn test_columns_need_windows() {
        let column = TermSpec::new(
            TermKind::Column {
                dataset: "DS".to_string(),
                name: "a".to_string(),
                period: None,
            },
            TermRole::Column,
            DType::Float64,
        )
        .window_safe(true)
        .build()
        .unwrap();
        let err = TermSpec::new(TermKind::Negate, TermRole::Factor, DType::Float64)
            .inputs(vec![column.clone()])
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));

        let latest = TermSpec::new(TermKind::Latest, TermRole::Factor, DType::Float64)
            .inputs(vec![column])
            .window_length(1)
            .build()
            .unwrap();
        assert_eq!(latest.to_string(), "DS.a.latest");
    }

    #[test]
    fn test_constant_roles() {
        assert_eq!(Term::constant(Scalar::Float(1.0)).unwrap().role(), TermRole::Factor);
        assert_eq!(Term::constant(Scalar::Bool(true)).unwrap().role(), TermRole::Filter);
        assert_eq!(Term::constant(Scalar::from("a")).unwrap().role(), TermRole::Classifier);
    }

    #[test]
    fn test_float_only_null_checks() {
        let ints = TermSpec::new(
            TermKind::External { name: "i".to_string() },
            TermRole::Factor,
            DType::Int64,
        )
        .build()
        .unwrap();
        let err = ints.null_check(NullCheck::IsNan).unwrap_err();
        assert_eq!(
            err.to_string(),
            "isnan() is only defined on Factors of dtype float64, but it was called on a Factor of dtype int64."
        );
        assert!(ints.null_check(NullCheck::IsNull).is_ok());
    }

    #[test]
    fn test_coerce_fill_values() {
        let f = external("f");
        assert_eq!(f.coerce_scalar(Scalar::Int(3)).unwrap(), Scalar::Float(3.0));
        assert!(matches!(
            f.coerce_scalar(Scalar::from("x")),
            Err(PipelineError::InvalidFillValue { .. })
        ));
    }

    #[test]
    fn test_missing_value_must_match_dtype() {
        let err = TermSpec::new(
            TermKind::External { name: "i".to_string() },
            TermRole::Factor,
            DType::Int64,
        )
        .missing_value(Scalar::Float(0.0))
        .build()
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFillValue { .. }));
    }
}
