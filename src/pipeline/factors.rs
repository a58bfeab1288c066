//! Pipeline Factors - numeric terms
//!
//! A [`Factor`] wraps a [`Term`] whose role is `Factor`. Every method builds a
//! new term and leaves the receiver untouched; identical calls produce equal
//! terms, so the graph computes them once.

use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::classifiers::Classifier;
use crate::pipeline::dtype::{DType, F64Key, Scalar};
use crate::pipeline::filters::Filter;
use crate::pipeline::normalize::NormalizeOp;
use crate::pipeline::quantiles::MISSING_BUCKET;
use crate::pipeline::rank::RankMethod;
use crate::pipeline::summary::SummaryFunc;
use crate::pipeline::term::{
    ArithOp, CompareOp, CustomKernel, CustomSpec, NullCheck, Term, TermKind, TermRole, TermSpec,
};
use crate::types::{AssetId, Session};
use ndarray::Array2;
use std::any::TypeId;
use std::convert::TryFrom;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// User-defined windowed computation
///
/// `compute` is called once per session with one trailing window per input,
/// each of shape `(window_length, assets.len())`, restricted to the assets
/// that pass the term's mask that day. `out` has one row per output (one row
/// for single-output factors) and starts filled with NaN.
pub trait CustomFactor: Send + Sync + 'static {
    /// Identity of the computation; two factors of the same type and name are the same term
    fn name(&self) -> String;

    /// Names of the outputs of a multi-output factor
    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Required number of inputs, if fixed
    fn num_inputs(&self) -> Option<usize> {
        None
    }

    /// Whether results may feed other windowed terms
    fn window_safe(&self) -> bool {
        false
    }

    fn compute(
        &self,
        today: Session,
        assets: &[AssetId],
        inputs: &[TermArray],
        out: &mut Array2<f64>,
    ) -> Result<()>;
}

/// A numeric term
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Factor(Term);

impl TryFrom<Term> for Factor {
    type Error = PipelineError;

    fn try_from(term: Term) -> Result<Self> {
        if term.role() == TermRole::Factor && term.dtype().is_factor_dtype() {
            Ok(Factor(term))
        } else {
            Err(PipelineError::TypeMismatch {
                context: format!("Factor from {}", term),
                expected: "Factor".to_string(),
                actual: format!("{:?} of dtype {}", term.role(), term.dtype()),
            })
        }
    }
}

impl From<Factor> for Term {
    fn from(factor: Factor) -> Term {
        factor.0
    }
}

impl From<&Factor> for Term {
    fn from(factor: &Factor) -> Term {
        factor.0.clone()
    }
}

impl fmt::Debug for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Factor({})", self.0)
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Anything usable as the right-hand side of factor arithmetic or comparisons
pub trait FactorOperand {
    fn into_factor(self) -> Result<Factor>;
}

impl FactorOperand for f64 {
    fn into_factor(self) -> Result<Factor> {
        Factor::constant(self)
    }
}

impl FactorOperand for &Factor {
    fn into_factor(self) -> Result<Factor> {
        Ok(self.clone())
    }
}

impl FactorOperand for Factor {
    fn into_factor(self) -> Result<Factor> {
        Ok(self)
    }
}

fn mask_term(mask: Option<&Filter>) -> Option<Term> {
    mask.map(|m| m.term().clone())
}

fn wrap(term: Term) -> Factor {
    Factor(term)
}

impl Factor {
    pub fn term(&self) -> &Term {
        &self.0
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype()
    }

    pub fn window_safe(&self) -> bool {
        self.0.window_safe()
    }

    /// Factor whose values are supplied directly to the engine
    pub fn external(name: &str, dtype: DType, missing_value: Option<Scalar>, window_safe: bool) -> Result<Factor> {
        if !dtype.is_factor_dtype() {
            return Err(PipelineError::TypeMismatch {
                context: format!("external factor {}", name),
                expected: "float64, int64 or datetime64[ns]".to_string(),
                actual: dtype.to_string(),
            });
        }
        let mut spec = TermSpec::new(
            TermKind::External { name: name.to_string() },
            TermRole::Factor,
            dtype,
        )
        .window_safe(window_safe);
        if let Some(missing) = missing_value {
            spec = spec.missing_value(missing);
        }
        spec.build().map(wrap)
    }

    pub fn constant(value: f64) -> Result<Factor> {
        Term::constant(Scalar::Float(value)).map(wrap)
    }

    /// Factor computed by a [`CustomFactor`] over trailing windows of `inputs`
    pub fn custom<F: CustomFactor>(
        factor: F,
        inputs: Vec<Term>,
        window_length: usize,
        mask: Option<&Filter>,
    ) -> Result<Factor> {
        let key = factor.name();
        if let Some(expected) = factor.num_inputs() {
            if expected != inputs.len() {
                return Err(PipelineError::WrongNumberOfInputs {
                    term: key,
                    expected,
                    actual: inputs.len(),
                });
            }
        }
        let window_safe = factor.window_safe();
        let spec = CustomSpec {
            key,
            type_id: TypeId::of::<F>(),
            kernel: CustomKernel::Factor(Arc::new(factor)),
        };
        TermSpec::new(TermKind::Custom(spec), TermRole::Factor, DType::Float64)
            .inputs(inputs)
            .mask(mask_term(mask))
            .window_length(window_length)
            .window_safe(window_safe)
            .build()
            .map(wrap)
    }

    /// One named field of a multi-output custom factor
    pub fn output(&self, name: &str) -> Result<Factor> {
        let names = self.0.output_names().unwrap_or_default();
        let index = names.iter().position(|n| n == name).ok_or_else(|| PipelineError::NoSuchOutput {
            term: self.to_string(),
            name: name.to_string(),
            available: names.clone(),
        })?;
        self.0
            .derive(
                TermKind::Output {
                    name: name.to_string(),
                    index,
                    count: names.len(),
                },
                TermRole::Factor,
                DType::Float64,
            )
            .window_safe(self.window_safe())
            .build()
            .map(wrap)
    }

    /// Every field of a multi-output factor, in declaration order
    pub fn outputs(&self) -> Result<Vec<Factor>> {
        self.0
            .output_names()
            .unwrap_or_default()
            .iter()
            .map(|name| self.output(name))
            .collect()
    }

    /// Row-wise rank. Masked and missing cells are NaN and take no part in ranking.
    pub fn rank(
        &self,
        method: RankMethod,
        ascending: bool,
        mask: Option<&Filter>,
        groupby: Option<&Classifier>,
    ) -> Result<Factor> {
        let mut inputs = vec![self.0.clone()];
        inputs.extend(groupby.map(|g| g.term().clone()));
        TermSpec::new(TermKind::Rank { method, ascending }, TermRole::Factor, DType::Float64)
            .inputs(inputs)
            .mask(mask_term(mask))
            .window_safe(true)
            .build()
            .map(wrap)
    }

    fn grouped_transform(&self, op: NormalizeOp, mask: Option<&Filter>, groupby: Option<&Classifier>) -> Result<Factor> {
        self.0.require_float(op.name())?;
        let window_safe = self.window_safe();
        let mut inputs = vec![self.0.clone()];
        inputs.extend(groupby.map(|g| g.term().clone()));
        TermSpec::new(TermKind::GroupedTransform(op), TermRole::Factor, DType::Float64)
            .inputs(inputs)
            .mask(mask_term(mask))
            .window_safe(window_safe)
            .build()
            .map(wrap)
    }

    /// Subtract the row (or group) mean
    pub fn demean(&self, mask: Option<&Filter>, groupby: Option<&Classifier>) -> Result<Factor> {
        self.grouped_transform(NormalizeOp::Demean, mask, groupby)
    }

    /// Demean and divide by the population standard deviation
    pub fn zscore(&self, mask: Option<&Filter>, groupby: Option<&Classifier>) -> Result<Factor> {
        self.grouped_transform(NormalizeOp::Zscore, mask, groupby)
    }

    /// Clip to the `[min, max]` percentiles of each row (or group)
    pub fn winsorize(
        &self,
        min_percentile: f64,
        max_percentile: f64,
        mask: Option<&Filter>,
        groupby: Option<&Classifier>,
    ) -> Result<Factor> {
        let op = NormalizeOp::winsorize(min_percentile, max_percentile)?;
        self.grouped_transform(op, mask, groupby)
    }

    /// Bucket each row into `bins` equal-population groups labelled `0..bins`
    pub fn quantiles(&self, bins: usize, mask: Option<&Filter>) -> Result<Classifier> {
        if bins == 0 {
            return Err(PipelineError::InvalidBins {
                method: "quantiles".to_string(),
                bins,
            });
        }
        let term = self
            .0
            .derive(TermKind::Quantiles { bins }, TermRole::Classifier, DType::Int64)
            .missing_value(Scalar::Int(MISSING_BUCKET))
            .mask(mask_term(mask))
            .build()?;
        Classifier::try_from(term)
    }

    pub fn quartiles(&self, mask: Option<&Filter>) -> Result<Classifier> {
        self.quantiles(4, mask)
    }

    pub fn quintiles(&self, mask: Option<&Filter>) -> Result<Classifier> {
        self.quantiles(5, mask)
    }

    pub fn deciles(&self, mask: Option<&Filter>) -> Result<Classifier> {
        self.quantiles(10, mask)
    }

    /// The `n` largest values per row (or group)
    pub fn top(&self, n: usize, mask: Option<&Filter>, groupby: Option<&Classifier>) -> Result<Filter> {
        if n == 1 {
            return self.maximum(mask, groupby);
        }
        self.rank(RankMethod::Ordinal, false, mask, groupby)?.le(n as f64)
    }

    /// True for the single largest value per row (or group); ties go to the first asset
    pub fn maximum(&self, mask: Option<&Filter>, groupby: Option<&Classifier>) -> Result<Filter> {
        self.0.require_float("maximum")?;
        let mut inputs = vec![self.0.clone()];
        inputs.extend(groupby.map(|g| g.term().clone()));
        let term = TermSpec::new(TermKind::Maximum, TermRole::Filter, DType::Bool)
            .inputs(inputs)
            .mask(mask_term(mask))
            .build()?;
        Filter::try_from(term)
    }

    /// The `n` smallest values per row (or group)
    pub fn bottom(&self, n: usize, mask: Option<&Filter>, groupby: Option<&Classifier>) -> Result<Filter> {
        self.rank(RankMethod::Ordinal, true, mask, groupby)?.le(n as f64)
    }

    /// True where the value lies between the `min` and `max` percentiles (0 to 100) of its row
    pub fn percentile_between(&self, min_percentile: f64, max_percentile: f64, mask: Option<&Filter>) -> Result<Filter> {
        self.0.require_float("percentile_between")?;
        if !(0.0 <= min_percentile && min_percentile < max_percentile && max_percentile <= 100.0) {
            return Err(PipelineError::BadPercentileBounds {
                method: "percentile_between".to_string(),
                min: min_percentile,
                max: max_percentile,
                upper: 100.0,
            });
        }
        let term = self
            .0
            .derive(
                TermKind::PercentileBetween {
                    min: F64Key(min_percentile),
                    max: F64Key(max_percentile),
                },
                TermRole::Filter,
                DType::Bool,
            )
            .mask(mask_term(mask))
            .build()?;
        Filter::try_from(term)
    }

    /// Row reduction broadcast back to every asset
    pub fn summary(&self, func: SummaryFunc, mask: Option<&Filter>) -> Result<Factor> {
        self.0.require_float(func.name())?;
        self.0
            .derive(TermKind::Summary(func), TermRole::Factor, DType::Float64)
            .mask(mask_term(mask))
            .build()
            .map(wrap)
    }

    pub fn mean(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::Mean, mask)
    }

    pub fn sum(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::Sum, mask)
    }

    pub fn median(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::Median, mask)
    }

    pub fn min(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::Min, mask)
    }

    pub fn max(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::Max, mask)
    }

    pub fn stddev(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::Stddev, mask)
    }

    pub fn notnull_count(&self, mask: Option<&Filter>) -> Result<Factor> {
        self.summary(SummaryFunc::NotNullCount, mask)
    }

    /// Elementwise arithmetic
    pub fn arithmetic<O: FactorOperand>(&self, op: ArithOp, rhs: O) -> Result<Factor> {
        let rhs = rhs.into_factor()?;
        self.0.require_float(op.name())?;
        rhs.0.require_float(op.name())?;
        TermSpec::new(TermKind::Arithmetic(op), TermRole::Factor, DType::Float64)
            .inputs(vec![self.0.clone(), rhs.0.clone()])
            .window_safe(self.window_safe() && rhs.window_safe())
            .build()
            .map(wrap)
    }

    pub fn pow<O: FactorOperand>(&self, exponent: O) -> Result<Factor> {
        self.arithmetic(ArithOp::Pow, exponent)
    }

    pub fn abs(&self) -> Result<Factor> {
        self.0.require_float("abs")?;
        self.0
            .derive(TermKind::Abs, TermRole::Factor, DType::Float64)
            .window_safe(self.window_safe())
            .build()
            .map(wrap)
    }

    pub fn negate(&self) -> Result<Factor> {
        self.0.require_float("neg")?;
        self.0
            .derive(TermKind::Negate, TermRole::Factor, DType::Float64)
            .window_safe(self.window_safe())
            .build()
            .map(wrap)
    }

    /// Elementwise comparison; cells where either side is missing compare false
    pub fn compare<O: FactorOperand>(&self, op: CompareOp, rhs: O) -> Result<Filter> {
        let rhs = rhs.into_factor()?;
        let term = TermSpec::new(TermKind::Compare(op), TermRole::Filter, DType::Bool)
            .inputs(vec![self.0.clone(), rhs.0.clone()])
            .window_safe(self.window_safe() && rhs.window_safe())
            .build()?;
        Filter::try_from(term)
    }

    pub fn gt<O: FactorOperand>(&self, rhs: O) -> Result<Filter> {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge<O: FactorOperand>(&self, rhs: O) -> Result<Filter> {
        self.compare(CompareOp::Ge, rhs)
    }

    pub fn lt<O: FactorOperand>(&self, rhs: O) -> Result<Filter> {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn le<O: FactorOperand>(&self, rhs: O) -> Result<Filter> {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn eq_to<O: FactorOperand>(&self, rhs: O) -> Result<Filter> {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn ne_to<O: FactorOperand>(&self, rhs: O) -> Result<Filter> {
        self.compare(CompareOp::Ne, rhs)
    }

    pub fn isnan(&self) -> Result<Filter> {
        Filter::try_from(self.0.null_check(NullCheck::IsNan)?)
    }

    pub fn notnan(&self) -> Result<Filter> {
        Filter::try_from(self.0.null_check(NullCheck::NotNan)?)
    }

    pub fn isfinite(&self) -> Result<Filter> {
        Filter::try_from(self.0.null_check(NullCheck::IsFinite)?)
    }

    pub fn isnull(&self) -> Result<Filter> {
        Filter::try_from(self.0.null_check(NullCheck::IsNull)?)
    }

    pub fn notnull(&self) -> Result<Filter> {
        Filter::try_from(self.0.null_check(NullCheck::NotNull)?)
    }

    /// Replace missing values with a constant
    pub fn fillna(&self, value: impl Into<Scalar>) -> Result<Factor> {
        let value = self.0.coerce_scalar(value.into())?;
        let fill = Term::constant(value)?;
        self.0.fill_missing(&fill).map(wrap)
    }

    /// Replace missing values with the values of another factor
    pub fn fillna_with(&self, other: &Factor) -> Result<Factor> {
        self.0.fill_missing(&other.0).map(wrap)
    }

    /// Keep values where `cond` holds, take `other` elsewhere
    pub fn where_<O: FactorOperand>(&self, cond: &Filter, other: O) -> Result<Factor> {
        let other = other.into_factor()?;
        self.0.select_where(cond.term(), &other.0).map(wrap)
    }

    /// Value from `periods` sessions ago
    pub fn shift(&self, periods: usize) -> Result<Factor> {
        self.0.shifted(periods).map(wrap)
    }

    pub fn clip(&self, min: f64, max: f64) -> Result<Factor> {
        self.0.require_float("clip")?;
        if min > max {
            return Err(PipelineError::InvalidInput {
                term: self.to_string(),
                reason: format!("clip bounds are inverted: min={}, max={}", min, max),
            });
        }
        self.0
            .derive(
                TermKind::Clip {
                    min: F64Key(min),
                    max: F64Key(max),
                },
                TermRole::Factor,
                DType::Float64,
            )
            .window_safe(self.window_safe())
            .build()
            .map(wrap)
    }

    /// One asset's value broadcast to every asset
    pub fn slice(&self, asset: AssetId) -> Result<Factor> {
        self.0.sliced(asset).map(wrap)
    }

    fn windowed(
        name: &str,
        kind: TermKind,
        inputs: Vec<Term>,
        expected: usize,
        window_length: usize,
        window_safe: bool,
    ) -> Result<Factor> {
        if inputs.len() != expected {
            return Err(PipelineError::WrongNumberOfInputs {
                term: name.to_string(),
                expected,
                actual: inputs.len(),
            });
        }
        for input in &inputs {
            if !input.dtype().is_float() {
                return Err(PipelineError::UnsupportedDType {
                    method: name.to_string(),
                    dtype: input.dtype().to_string(),
                });
            }
        }
        TermSpec::new(kind, TermRole::Factor, DType::Float64)
            .inputs(inputs)
            .window_length(window_length)
            .window_safe(window_safe)
            .build()
            .map(wrap)
    }

    /// `(x[-1 - exclude] - x[0]) / x[0]` over the window
    pub fn returns(input: impl Into<Term>, window_length: usize, exclude_window_length: usize) -> Result<Factor> {
        if window_length <= exclude_window_length {
            return Err(PipelineError::WindowLengthNotGreaterThanExclude {
                window_length,
                exclude_window_length,
            });
        }
        Self::windowed(
            "Returns",
            TermKind::Returns { exclude_window_length },
            vec![input.into()],
            1,
            window_length,
            true,
        )
    }

    /// Close-to-close return over the last two sessions
    pub fn daily_returns(input: impl Into<Term>) -> Result<Factor> {
        Self::returns(input, 2, 0)
    }

    /// `(x[-1] - x[0]) / |x[0]|` over the window
    pub fn percent_change(input: impl Into<Term>, window_length: usize) -> Result<Factor> {
        if window_length < 2 {
            return Err(PipelineError::InvalidWindowLength {
                term: "PercentChange".to_string(),
                reason: format!("window_length must be at least 2, got {}", window_length),
            });
        }
        Self::windowed("PercentChange", TermKind::PercentChange, vec![input.into()], 1, window_length, true)
    }

    /// NaN-ignoring mean over the window
    pub fn simple_moving_average(input: impl Into<Term>, window_length: usize) -> Result<Factor> {
        Self::windowed(
            "SimpleMovingAverage",
            TermKind::SimpleMovingAverage,
            vec![input.into()],
            1,
            window_length,
            false,
        )
    }

    /// Weighted mean with weight `decay_rate^age`, newest value weighted 1
    pub fn exponential_weighted_moving_average(
        input: impl Into<Term>,
        window_length: usize,
        decay_rate: f64,
    ) -> Result<Factor> {
        if !(decay_rate > 0.0 && decay_rate <= 1.0) {
            return Err(PipelineError::InvalidInput {
                term: "ExponentialWeightedMovingAverage".to_string(),
                reason: format!("decay_rate must be in (0, 1], got {}", decay_rate),
            });
        }
        Self::windowed(
            "ExponentialWeightedMovingAverage",
            TermKind::ExponentialWeightedMovingAverage {
                decay_rate: F64Key(decay_rate),
            },
            vec![input.into()],
            1,
            window_length,
            false,
        )
    }

    /// EWMA with `decay_rate = 1 - 2 / (span + 1)`
    pub fn ewma_from_span(input: impl Into<Term>, window_length: usize, span: f64) -> Result<Factor> {
        if span <= 1.0 {
            return Err(PipelineError::InvalidInput {
                term: "ExponentialWeightedMovingAverage".to_string(),
                reason: format!("span must be greater than 1, got {}", span),
            });
        }
        Self::exponential_weighted_moving_average(input, window_length, 1.0 - 2.0 / (1.0 + span))
    }

    /// EWMA whose weights halve every `halflife` sessions
    pub fn ewma_from_halflife(input: impl Into<Term>, window_length: usize, halflife: f64) -> Result<Factor> {
        if halflife <= 0.0 {
            return Err(PipelineError::InvalidInput {
                term: "ExponentialWeightedMovingAverage".to_string(),
                reason: format!("halflife must be positive, got {}", halflife),
            });
        }
        Self::exponential_weighted_moving_average(input, window_length, (0.5f64.ln() / halflife).exp())
    }

    /// Volume-weighted average price from `[close, volume]`
    pub fn vwap(inputs: Vec<Term>, window_length: usize) -> Result<Factor> {
        Self::windowed("VWAP", TermKind::Vwap, inputs, 2, window_length, false)
    }

    /// Mean of `close * volume` from `[close, volume]`
    pub fn average_dollar_volume(inputs: Vec<Term>, window_length: usize) -> Result<Factor> {
        Self::windowed("AverageDollarVolume", TermKind::AverageDollarVolume, inputs, 2, window_length, false)
    }
}

macro_rules! impl_arithmetic {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<&Factor> for &Factor {
            type Output = Result<Factor>;

            fn $method(self, rhs: &Factor) -> Result<Factor> {
                self.arithmetic($op, rhs)
            }
        }

        impl $trait<f64> for &Factor {
            type Output = Result<Factor>;

            fn $method(self, rhs: f64) -> Result<Factor> {
                self.arithmetic($op, rhs)
            }
        }
    };
}

impl_arithmetic!(Add, add, ArithOp::Add);
impl_arithmetic!(Sub, sub, ArithOp::Sub);
impl_arithmetic!(Mul, mul, ArithOp::Mul);
impl_arithmetic!(Div, div, ArithOp::Div);

impl Neg for &Factor {
    type Output = Result<Factor>;

    fn neg(self) -> Result<Factor> {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::{Column, EquityPricing};

    fn f() -> Factor {
        Factor::external("f", DType::Float64, None, false).unwrap()
    }

    fn datetime_factor() -> Factor {
        Factor::external("d", DType::DatetimeNs, None, false).unwrap()
    }

    struct Pair;

    impl CustomFactor for Pair {
        fn name(&self) -> String {
            "Pair".to_string()
        }

        fn outputs(&self) -> Vec<String> {
            vec!["alpha".to_string(), "beta".to_string()]
        }

        fn compute(&self, _: Session, _: &[AssetId], _: &[TermArray], out: &mut Array2<f64>) -> Result<()> {
            out.fill(1.0);
            Ok(())
        }
    }

    #[test]
    fn test_quantile_helpers_are_identical_terms() {
        let f = f();
        let mask = f.notnan().unwrap();
        assert_eq!(f.quartiles(None).unwrap(), f.quantiles(4, None).unwrap());
        assert_eq!(f.quintiles(Some(&mask)).unwrap(), f.quantiles(5, Some(&mask)).unwrap());
        assert_eq!(f.deciles(None).unwrap(), f.quantiles(10, None).unwrap());
        assert_ne!(f.deciles(None).unwrap(), f.deciles(Some(&mask)).unwrap());
    }

    #[test]
    fn test_float_only_methods_reject_datetimes() {
        let d = datetime_factor();
        let expected = |m: &str| {
            format!(
                "{}() is only defined on Factors of dtype float64, but it was called on a Factor of dtype datetime64[ns].",
                m
            )
        };
        assert_eq!(d.demean(None, None).unwrap_err().to_string(), expected("demean"));
        assert_eq!(d.zscore(None, None).unwrap_err().to_string(), expected("zscore"));
        assert_eq!(d.winsorize(0.1, 0.9, None, None).unwrap_err().to_string(), expected("winsorize"));
        assert!(d.rank(RankMethod::Ordinal, true, None, None).is_ok());
        assert!(d.quartiles(None).is_ok());
    }

    #[test]
    fn test_window_safety_propagation() {
        let unsafe_f = f();
        let safe_f = Factor::external("g", DType::Float64, None, true).unwrap();
        assert!(!unsafe_f.zscore(None, None).unwrap().window_safe());
        assert!(safe_f.zscore(None, None).unwrap().window_safe());
        assert!(unsafe_f.rank(RankMethod::Average, true, None, None).unwrap().window_safe());
        assert!(!unsafe_f.demean(None, None).unwrap().window_safe());
        assert!(safe_f.demean(None, None).unwrap().window_safe());
        assert!(!unsafe_f.winsorize(0.0, 1.0, None, None).unwrap().window_safe());
        assert!(safe_f.winsorize(0.0, 1.0, None, None).unwrap().window_safe());
    }

    #[test]
    fn test_returns_validation() {
        let close = EquityPricing::close();
        let err = Factor::returns(&close, 2, 2).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::WindowLengthNotGreaterThanExclude {
                window_length: 2,
                exclude_window_length: 2
            }
        ));
        assert!(Factor::returns(&close, 3, 2).is_ok());
        assert_eq!(Factor::daily_returns(&close).unwrap(), Factor::returns(&close, 2, 0).unwrap());
    }

    #[test]
    fn test_builtin_arity() {
        let close: Term = EquityPricing::close().into();
        let err = Factor::vwap(vec![close], 5).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::WrongNumberOfInputs { expected: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn test_percentile_between_bounds() {
        let f = f();
        assert!(f.percentile_between(10.0, 90.0, None).is_ok());
        for (lo, hi) in [(-1.0, 50.0), (50.0, 101.0), (60.0, 40.0), (50.0, 50.0)] {
            assert!(matches!(
                f.percentile_between(lo, hi, None),
                Err(PipelineError::BadPercentileBounds { .. })
            ));
        }
    }

    #[test]
    fn test_arithmetic_display_and_identity() {
        let f = f();
        let a = (&f - &f.mean(None).unwrap()).unwrap();
        let b = (&f - &f.mean(None).unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "(f - f.mean())");
        assert!((&datetime_factor() + 1.0).is_err());
    }

    #[test]
    fn test_multi_output() {
        let close = EquityPricing::close();
        let pair = Factor::custom(Pair, vec![close.into()], 3, None).unwrap();
        let alpha = pair.output("alpha").unwrap();
        assert_eq!(alpha.to_string(), "Pair.alpha");
        assert_eq!(pair.outputs().unwrap().len(), 2);
        assert!(matches!(pair.output("gamma"), Err(PipelineError::NoSuchOutput { .. })));
        assert!(matches!(
            pair.rank(RankMethod::Ordinal, true, None, None),
            Err(PipelineError::MultiOutputTermUsedDirectly(_))
        ));
    }

    #[test]
    fn test_fillna_coerces_ints() {
        let f = f();
        assert_eq!(f.fillna(0i64).unwrap(), f.fillna(0.0).unwrap());
        assert!(f.fillna("x").is_err());
        let sector = Column::new("DS", "sector", DType::Categorical);
        assert!(Factor::try_from(sector.latest().unwrap()).is_err());
    }

    #[test]
    fn test_top_one_is_maximum() {
        let f = f();
        let sector = Classifier::external("sector", DType::Int64, None, false).unwrap();
        assert_eq!(f.top(1, None, None).unwrap(), f.maximum(None, None).unwrap());
        assert_eq!(f.top(1, None, Some(&sector)).unwrap(), f.maximum(None, Some(&sector)).unwrap());
        assert_ne!(f.top(2, None, None).unwrap(), f.maximum(None, None).unwrap());
        assert!(datetime_factor().maximum(None, None).is_err());
    }

    #[test]
    fn test_abs_and_pow_follow_input_safety() {
        let safe = Factor::external("g", DType::Float64, None, true).unwrap();
        assert!(safe.abs().unwrap().window_safe());
        assert!(!f().abs().unwrap().window_safe());
        assert_eq!(safe.pow(2.0).unwrap().to_string(), "(g ** Constant(2))");
        assert!(datetime_factor().abs().is_err());
    }
}
