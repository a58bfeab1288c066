//! Pipeline Classifiers - grouping terms
//!
//! Classifiers label each asset with an integer or string category. They are
//! used as `groupby` arguments to ranks and normalizations, and produce filters
//! through label predicates.

use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::dtype::{DType, Scalar};
use crate::pipeline::filters::Filter;
use crate::pipeline::term::{CompareOp, CustomKernel, CustomSpec, NullCheck, StrOp, Term, TermKind, TermRole, TermSpec};
use crate::types::{AssetId, Session};
use ndarray::Array1;
use std::any::TypeId;
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

/// User-defined windowed grouping with int64 labels
///
/// `out` holds one label per admitted asset and starts filled with
/// [`missing_value`](CustomClassifier::missing_value).
pub trait CustomClassifier: Send + Sync + 'static {
    fn name(&self) -> String;

    fn num_inputs(&self) -> Option<usize> {
        None
    }

    fn window_safe(&self) -> bool {
        false
    }

    fn missing_value(&self) -> i64 {
        -1
    }

    fn compute(
        &self,
        today: Session,
        assets: &[AssetId],
        inputs: &[TermArray],
        out: &mut Array1<i64>,
    ) -> Result<()>;
}

/// An int64 or categorical term
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Classifier(Term);

impl TryFrom<Term> for Classifier {
    type Error = PipelineError;

    fn try_from(term: Term) -> Result<Self> {
        if term.role() == TermRole::Classifier && term.dtype().is_classifier_dtype() {
            Ok(Classifier(term))
        } else {
            Err(PipelineError::TypeMismatch {
                context: format!("Classifier from {}", term),
                expected: "Classifier".to_string(),
                actual: format!("{:?} of dtype {}", term.role(), term.dtype()),
            })
        }
    }
}

impl From<Classifier> for Term {
    fn from(classifier: Classifier) -> Term {
        classifier.0
    }
}

impl From<&Classifier> for Term {
    fn from(classifier: &Classifier) -> Term {
        classifier.0.clone()
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Classifier({})", self.0)
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

fn wrap(term: Term) -> Classifier {
    Classifier(term)
}

fn to_filter(term: Term) -> Result<Filter> {
    Filter::try_from(term)
}

impl Classifier {
    pub fn term(&self) -> &Term {
        &self.0
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype()
    }

    /// Classifier whose values are supplied directly to the engine
    pub fn external(name: &str, dtype: DType, missing_value: Option<Scalar>, window_safe: bool) -> Result<Classifier> {
        if !dtype.is_classifier_dtype() {
            return Err(PipelineError::TypeMismatch {
                context: format!("external classifier {}", name),
                expected: "int64 or category".to_string(),
                actual: dtype.to_string(),
            });
        }
        let mut spec = TermSpec::new(
            TermKind::External { name: name.to_string() },
            TermRole::Classifier,
            dtype,
        )
        .window_safe(window_safe);
        if let Some(missing) = missing_value {
            spec = spec.missing_value(missing);
        }
        spec.build().map(wrap)
    }

    /// Same label for every asset
    pub fn constant(label: &str) -> Result<Classifier> {
        Term::constant(Scalar::from(label)).map(wrap)
    }

    /// Classifier computed by a [`CustomClassifier`] over trailing windows of `inputs`
    pub fn custom<C: CustomClassifier>(
        classifier: C,
        inputs: Vec<Term>,
        window_length: usize,
        mask: Option<&Filter>,
    ) -> Result<Classifier> {
        let key = classifier.name();
        if let Some(expected) = classifier.num_inputs() {
            if expected != inputs.len() {
                return Err(PipelineError::WrongNumberOfInputs {
                    term: key,
                    expected,
                    actual: inputs.len(),
                });
            }
        }
        let window_safe = classifier.window_safe();
        let missing = Scalar::Int(classifier.missing_value());
        let spec = CustomSpec {
            key,
            type_id: TypeId::of::<C>(),
            kernel: CustomKernel::Classifier(Arc::new(classifier)),
        };
        TermSpec::new(TermKind::Custom(spec), TermRole::Classifier, DType::Int64)
            .inputs(inputs)
            .mask(mask.map(|m| m.term().clone()))
            .missing_value(missing)
            .window_length(window_length)
            .window_safe(window_safe)
            .build()
            .map(wrap)
    }

    /// Puts every asset in group 0
    pub fn everything() -> Result<Classifier> {
        TermSpec::new(TermKind::Everything, TermRole::Classifier, DType::Int64)
            .window_safe(true)
            .build()
            .map(wrap)
    }

    fn require_categorical(&self, method: &str) -> Result<()> {
        if self.dtype() == DType::Categorical {
            Ok(())
        } else {
            Err(PipelineError::TypeMismatch {
                context: format!("{}() on {}", method, self),
                expected: DType::Categorical.to_string(),
                actual: self.dtype().to_string(),
            })
        }
    }

    fn str_predicate(&self, op: StrOp, value: &str) -> Result<Filter> {
        to_filter(
            self.0
                .derive(
                    TermKind::StrPredicate {
                        op,
                        value: value.to_string(),
                    },
                    TermRole::Filter,
                    DType::Bool,
                )
                .window_safe(self.0.window_safe())
                .build()?,
        )
    }

    fn equality(&self, op: CompareOp, value: Scalar, method: &str) -> Result<Filter> {
        let value = self.0.coerce_scalar(value)?;
        if value.is_missing(self.0.missing_value()) {
            return Err(PipelineError::InvalidInput {
                term: self.to_string(),
                reason: format!("{}() against the missing value {} is ambiguous; use isnull()", method, value),
            });
        }
        match value {
            Scalar::Str(Some(label)) => {
                let op = if op == CompareOp::Eq { StrOp::Eq } else { StrOp::Ne };
                self.str_predicate(op, &label)
            }
            other => {
                let rhs = Term::constant(other)?;
                to_filter(
                    TermSpec::new(TermKind::Compare(op), TermRole::Filter, DType::Bool)
                        .inputs(vec![self.0.clone(), rhs])
                        .window_safe(self.0.window_safe())
                        .build()?,
                )
            }
        }
    }

    /// True where the label equals `value`
    pub fn eq(&self, value: impl Into<Scalar>) -> Result<Filter> {
        self.equality(CompareOp::Eq, value.into(), "eq")
    }

    /// True where the label is present and differs from `value`
    pub fn ne(&self, value: impl Into<Scalar>) -> Result<Filter> {
        self.equality(CompareOp::Ne, value.into(), "ne")
    }

    pub fn startswith(&self, prefix: &str) -> Result<Filter> {
        self.require_categorical("startswith")?;
        self.str_predicate(StrOp::StartsWith, prefix)
    }

    pub fn endswith(&self, suffix: &str) -> Result<Filter> {
        self.require_categorical("endswith")?;
        self.str_predicate(StrOp::EndsWith, suffix)
    }

    pub fn has_substring(&self, needle: &str) -> Result<Filter> {
        self.require_categorical("has_substring")?;
        self.str_predicate(StrOp::Contains, needle)
    }

    /// True where the label is one of `choices`
    pub fn isin<S: Into<Scalar>>(&self, choices: impl IntoIterator<Item = S>) -> Result<Filter> {
        let mut values = choices
            .into_iter()
            .map(|c| self.0.coerce_scalar(c.into()))
            .collect::<Result<Vec<_>>>()?;
        values.sort_by_key(|v| v.to_string());
        values.dedup();
        to_filter(
            self.0
                .derive(TermKind::IsIn(values), TermRole::Filter, DType::Bool)
                .window_safe(self.0.window_safe())
                .build()?,
        )
    }

    /// Rename labels; labels absent from `mapping` keep their value, a `None` target makes them missing
    pub fn relabel<K, V>(&self, mapping: impl IntoIterator<Item = (K, Option<V>)>) -> Result<Classifier>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.require_categorical("relabel")?;
        let mut pairs: Vec<(String, Option<String>)> = mapping
            .into_iter()
            .map(|(k, v)| (k.into(), v.map(Into::into)))
            .collect();
        pairs.sort();
        pairs.dedup_by(|a, b| a.0 == b.0);
        self.0
            .derive(TermKind::Relabel(pairs), TermRole::Classifier, DType::Categorical)
            .missing_value(self.0.missing_value().clone())
            .window_safe(self.0.window_safe())
            .build()
            .map(wrap)
    }

    pub fn isnull(&self) -> Result<Filter> {
        to_filter(self.0.null_check(NullCheck::IsNull)?)
    }

    pub fn notnull(&self) -> Result<Filter> {
        to_filter(self.0.null_check(NullCheck::NotNull)?)
    }

    /// Replace missing labels with `value`
    pub fn fillna(&self, value: impl Into<Scalar>) -> Result<Classifier> {
        let value = self.0.coerce_scalar(value.into())?;
        let fill = TermSpec::new(TermKind::Constant(value), TermRole::Classifier, self.dtype())
            .missing_value(self.0.missing_value().clone())
            .window_safe(true)
            .build()?;
        self.0.fill_missing(&fill).map(wrap)
    }

    /// Keep labels where `cond` holds, take `other`'s labels elsewhere
    pub fn where_(&self, cond: &Filter, other: &Classifier) -> Result<Classifier> {
        self.0.select_where(cond.term(), &other.0).map(wrap)
    }

    /// Labels from `periods` sessions ago
    pub fn shift(&self, periods: usize) -> Result<Classifier> {
        self.0.shifted(periods).map(wrap)
    }

    /// One asset's label broadcast to every asset
    pub fn slice(&self, asset: AssetId) -> Result<Classifier> {
        self.0.sliced(asset).map(wrap)
    }
}
