//! Terms spanning several reporting periods of a periodic dataset
//!
//! Periodic data (quarterly or annual fundamentals) is loaded as one dataset
//! slice per `period_offset`: 0 is the latest report, -1 the one before. The
//! builders here read the same value across a range of periods, walking back
//! `step` periods at a time from the source's own offset, and combine the
//! per-period factors with ordinary arithmetic and comparisons.

use crate::error::{PipelineError, Result};
use crate::pipeline::dataset::Column;
use crate::pipeline::factors::Factor;
use crate::pipeline::filters::Filter;
use crate::pipeline::term::{ArithOp, CompareOp};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

/// Builds the factor for one period; receives the period offset and the mask
pub type PeriodFactory = Arc<dyn Fn(i32, Option<&Filter>) -> Result<Factor> + Send + Sync>;

/// Where per-period values come from
#[derive(Clone)]
pub enum PeriodicSource {
    /// A column of a periodic dataset slice
    Column(Column),
    /// A derived value, e.g. a margin built from two columns of the same slice
    Factory(PeriodFactory),
}

impl PeriodicSource {
    pub fn factory<F>(build: F) -> Self
    where
        F: Fn(i32, Option<&Filter>) -> Result<Factor> + Send + Sync + 'static,
    {
        PeriodicSource::Factory(Arc::new(build))
    }

    fn base_offset(&self) -> Result<i32> {
        match self {
            PeriodicSource::Column(column) => column.period().map(|p| p.period_offset).ok_or_else(|| {
                PipelineError::InvalidPeriodicInput(format!(
                    "Column must belong to a DataSet with a period_offset coordinate but got: {}",
                    column
                ))
            }),
            PeriodicSource::Factory(_) => Ok(0),
        }
    }

    fn dimension(&self) -> Option<&str> {
        match self {
            PeriodicSource::Column(column) => column.period().map(|p| p.dimension.as_str()),
            PeriodicSource::Factory(_) => None,
        }
    }

    /// Value `back` periods before the source's own period
    fn at(&self, back: usize, mask: Option<&Filter>) -> Result<Factor> {
        let offset = self.base_offset()? - back as i32;
        match self {
            PeriodicSource::Column(column) => {
                let slice = column.with_period_offset(offset)?;
                Factor::try_from(slice.latest_masked(mask)?)
            }
            PeriodicSource::Factory(build) => build(offset, mask),
        }
    }

    /// Current value followed by one value per sampled earlier period
    fn sampled(&self, window_length: usize, step: usize, mask: Option<&Filter>) -> Result<Vec<Factor>> {
        let mut terms = vec![self.at(0, mask)?];
        for back in period_range(window_length, step)? {
            terms.push(self.at(back, mask)?);
        }
        Ok(terms)
    }
}

impl From<Column> for PeriodicSource {
    fn from(column: Column) -> Self {
        PeriodicSource::Column(column)
    }
}

impl From<&Column> for PeriodicSource {
    fn from(column: &Column) -> Self {
        PeriodicSource::Column(column.clone())
    }
}

impl fmt::Debug for PeriodicSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodicSource::Column(column) => write!(f, "PeriodicSource({})", column),
            PeriodicSource::Factory(_) => f.write_str("PeriodicSource(<factory>)"),
        }
    }
}

/// Periods sampled behind the current one: `step, 2*step, ...` below `window_length`
pub fn period_range(window_length: usize, step: usize) -> Result<Vec<usize>> {
    if window_length < 2 {
        return Err(PipelineError::InvalidPeriodicInput(
            "window_length must be 2 or greater".to_string(),
        ));
    }
    if step == 0 {
        return Err(PipelineError::InvalidPeriodicInput("step must be 1 or greater".to_string()));
    }
    if step >= window_length {
        return Err(PipelineError::InvalidPeriodicInput(
            "window_length must be greater than step".to_string(),
        ));
    }
    Ok((step..window_length).step_by(step).collect())
}

fn sum(terms: Vec<Factor>) -> Result<Factor> {
    let mut iter = terms.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| PipelineError::InvalidPeriodicInput("no periods to combine".to_string()))?;
    iter.try_fold(first, |acc, term| acc.arithmetic(ArithOp::Add, term))
}

fn all_of(filters: Vec<Filter>) -> Result<Filter> {
    let mut iter = filters.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| PipelineError::InvalidPeriodicInput("no periods to combine".to_string()))?;
    iter.try_fold(first, |acc, filter| acc.and(&filter))
}

/// Mean over the current and sampled earlier periods
pub fn periodic_average(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    step: usize,
    mask: Option<&Filter>,
) -> Result<Factor> {
    let terms = source.into().sampled(window_length, step, mask)?;
    let n = terms.len() as f64;
    sum(terms)?.arithmetic(ArithOp::Div, n)
}

/// Largest value over the sampled periods
pub fn periodic_high(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    step: usize,
    mask: Option<&Filter>,
) -> Result<Factor> {
    extreme(source.into(), window_length, step, mask, true)
}

/// Smallest value over the sampled periods
pub fn periodic_low(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    step: usize,
    mask: Option<&Filter>,
) -> Result<Factor> {
    extreme(source.into(), window_length, step, mask, false)
}

/// Sum over periods of `is_extreme(term) * term`. A period counts as the
/// extreme when it beats every more recent period strictly and every older
/// one weakly, so exactly one period wins a tie. Any missing period makes the
/// result NaN.
fn extreme(source: PeriodicSource, window_length: usize, step: usize, mask: Option<&Filter>, high: bool) -> Result<Factor> {
    let terms = source.sampled(window_length, step, mask)?;
    let mut parts = Vec::with_capacity(terms.len());
    for (i, term) in terms.iter().enumerate() {
        let mut beats = Vec::with_capacity(terms.len() - 1);
        for (j, other) in terms.iter().enumerate().filter(|&(j, _)| j != i) {
            let op = match (high, j < i) {
                (true, true) => CompareOp::Gt,
                (true, false) => CompareOp::Ge,
                (false, true) => CompareOp::Lt,
                (false, false) => CompareOp::Le,
            };
            beats.push(term.compare(op, other)?);
        }
        parts.push(all_of(beats)?.as_factor()?.arithmetic(ArithOp::Mul, term)?);
    }
    sum(parts)
}

/// `(current - previous) / |previous|`, previous being `window_length - 1` periods back
pub fn periodic_percent_change(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    mask: Option<&Filter>,
) -> Result<Factor> {
    period_range(window_length, 1)?;
    let source = source.into();
    let current = source.at(0, mask)?;
    let previous = source.at(window_length - 1, mask)?;
    current.arithmetic(ArithOp::Sub, &previous)?.arithmetic(ArithOp::Div, previous.abs()?)
}

/// Periods per year implied by a dimension label: `...Y` is annual, `...Q` and `...T` quarterly
fn infer_periods_per_year(dimension: Option<&str>) -> Option<usize> {
    let dimension = dimension?;
    if dimension.ends_with('Y') {
        Some(1)
    } else if dimension.ends_with('Q') || dimension.ends_with('T') {
        Some(4)
    } else {
        None
    }
}

/// Compound annual growth rate from `window_length - 1` periods back to now,
/// over `window_length / periods_per_year` years. Non-positive starting
/// values give NaN.
pub fn periodic_cagr(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    periods_per_year: Option<usize>,
    mask: Option<&Filter>,
) -> Result<Factor> {
    let source = source.into();
    source.base_offset()?;
    let periods_per_year = periods_per_year
        .filter(|&p| p > 0)
        .or_else(|| infer_periods_per_year(source.dimension()))
        .ok_or_else(|| {
            PipelineError::InvalidPeriodicInput("periods_per_year cannot be inferred and must be specified".to_string())
        })?;
    if periods_per_year > window_length {
        return Err(PipelineError::InvalidPeriodicInput(format!(
            "window_length ({}) must be greater than periods_per_year ({})",
            window_length, periods_per_year
        )));
    }
    period_range(window_length, 1)?;

    let current = source.at(0, mask)?;
    let previous = source.at(window_length - 1, mask)?;
    let previous = previous.where_(&previous.gt(0.0)?, f64::NAN)?;
    let years = window_length as f64 / periods_per_year as f64;
    current
        .arithmetic(ArithOp::Div, previous)?
        .pow(1.0 / years)?
        .arithmetic(ArithOp::Sub, 1.0)
}

/// True where each sampled period is above (or at least, with `allow_equal`) the one before it
pub fn all_periods_increasing(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    step: usize,
    allow_equal: bool,
    mask: Option<&Filter>,
) -> Result<Filter> {
    let op = if allow_equal { CompareOp::Ge } else { CompareOp::Gt };
    monotonic(source.into(), window_length, step, op, mask)
}

/// True where each sampled period is below (or at most, with `allow_equal`) the one before it
pub fn all_periods_decreasing(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    step: usize,
    allow_equal: bool,
    mask: Option<&Filter>,
) -> Result<Filter> {
    let op = if allow_equal { CompareOp::Le } else { CompareOp::Lt };
    monotonic(source.into(), window_length, step, op, mask)
}

fn monotonic(
    source: PeriodicSource,
    window_length: usize,
    step: usize,
    op: CompareOp,
    mask: Option<&Filter>,
) -> Result<Filter> {
    let terms = source.sampled(window_length, step, mask)?;
    let steps = terms
        .windows(2)
        .map(|pair| pair[0].compare(op, &pair[1]))
        .collect::<Result<Vec<_>>>()?;
    all_of(steps)
}

fn count_matching(
    source: PeriodicSource,
    op: CompareOp,
    value: f64,
    window_length: usize,
    step: usize,
    mask: Option<&Filter>,
) -> Result<(Factor, usize)> {
    let terms = source.sampled(window_length, step, mask)?;
    let n = terms.len();
    let hits = terms
        .iter()
        .map(|term| term.compare(op, value)?.as_factor())
        .collect::<Result<Vec<_>>>()?;
    Ok((sum(hits)?, n))
}

fn above_op(allow_equal: bool) -> CompareOp {
    if allow_equal {
        CompareOp::Ge
    } else {
        CompareOp::Gt
    }
}

fn below_op(allow_equal: bool) -> CompareOp {
    if allow_equal {
        CompareOp::Le
    } else {
        CompareOp::Lt
    }
}

/// Number of sampled periods above `value`; missing periods never count
pub fn count_periods_above(
    source: impl Into<PeriodicSource>,
    value: f64,
    window_length: usize,
    step: usize,
    allow_equal: bool,
    mask: Option<&Filter>,
) -> Result<Factor> {
    count_matching(source.into(), above_op(allow_equal), value, window_length, step, mask).map(|(count, _)| count)
}

/// Number of sampled periods below `value`; missing periods never count
pub fn count_periods_below(
    source: impl Into<PeriodicSource>,
    value: f64,
    window_length: usize,
    step: usize,
    allow_equal: bool,
    mask: Option<&Filter>,
) -> Result<Factor> {
    count_matching(source.into(), below_op(allow_equal), value, window_length, step, mask).map(|(count, _)| count)
}

pub fn all_periods_above(
    source: impl Into<PeriodicSource>,
    value: f64,
    window_length: usize,
    step: usize,
    allow_equal: bool,
    mask: Option<&Filter>,
) -> Result<Filter> {
    let (count, n) = count_matching(source.into(), above_op(allow_equal), value, window_length, step, mask)?;
    count.eq_to(n as f64)
}

pub fn all_periods_below(
    source: impl Into<PeriodicSource>,
    value: f64,
    window_length: usize,
    step: usize,
    allow_equal: bool,
    mask: Option<&Filter>,
) -> Result<Filter> {
    let (count, n) = count_matching(source.into(), below_op(allow_equal), value, window_length, step, mask)?;
    count.eq_to(n as f64)
}

/// True where no sampled period is missing
pub fn all_periods_present(
    source: impl Into<PeriodicSource>,
    window_length: usize,
    step: usize,
    mask: Option<&Filter>,
) -> Result<Filter> {
    let terms = source.into().sampled(window_length, step, mask)?;
    let present = terms.iter().map(Factor::notnull).collect::<Result<Vec<_>>>()?;
    all_of(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::array::TermArray;
    use crate::pipeline::dataset::EquityPricing;
    use crate::pipeline::dtype::DType;
    use crate::pipeline::engine::SimplePipelineEngine;
    use crate::pipeline::term::Term;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use hashbrown::HashMap;
    use ndarray::{Array1, Array2};

    const NAN: f64 = f64::NAN;

    /// Revenue per asset at offsets 0, -1, -2, -3
    const REVENUE: [[f64; 4]; 4] = [
        [10.0, 8.0, 6.0, 4.0],
        [5.0, 5.0, 7.0, 9.0],
        [3.0, NAN, 2.0, 1.0],
        [-2.0, 4.0, 4.0, 1.0],
    ];

    fn revenue(offset: i32) -> Column {
        Column::periodic("Fundamentals", "revenue", DType::Float64, "ARY", offset)
    }

    fn initial() -> HashMap<Term, TermArray> {
        let mut initial = HashMap::new();
        for back in 0..4 {
            let row = Array2::from_shape_fn((1, 4), |(_, asset)| REVENUE[asset][back]);
            initial.insert(Term::from(revenue(-(back as i32))), TermArray::Float(row));
        }
        initial
    }

    fn evaluate_with(term: impl Into<Term>, initial: HashMap<Term, TermArray>) -> TermArray {
        let session = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mask = Array2::from_elem((1, 4), true);
        let mut out =
            SimplePipelineEngine::evaluate_terms(&[term.into()], &initial, mask.view(), &[session], &[1, 2, 3, 4])
                .unwrap();
        out.remove(0)
    }

    fn floats(term: impl Into<Term>) -> Array1<f64> {
        evaluate_with(term, initial()).as_float().unwrap().row(0).to_owned()
    }

    fn bools(term: impl Into<Term>) -> Vec<bool> {
        evaluate_with(term, initial()).as_bool().unwrap().row(0).to_vec()
    }

    fn message(err: PipelineError) -> String {
        err.to_string()
    }

    #[test]
    fn test_period_range() {
        assert_eq!(period_range(4, 1).unwrap(), vec![1, 2, 3]);
        assert_eq!(period_range(5, 2).unwrap(), vec![2, 4]);
        assert_eq!(message(period_range(1, 1).unwrap_err()), "window_length must be 2 or greater");
        assert_eq!(message(period_range(3, 3).unwrap_err()), "window_length must be greater than step");
        assert!(period_range(3, 0).is_err());
    }

    #[test]
    fn test_source_must_be_periodic() {
        let err = periodic_average(EquityPricing::close(), 4, 1, None).unwrap_err();
        assert_eq!(
            message(err),
            "Column must belong to a DataSet with a period_offset coordinate but got: EquityPricing.close"
        );
    }

    #[test]
    fn test_average() {
        let avg = floats(periodic_average(revenue(0), 4, 1, None).unwrap());
        assert_relative_eq!(avg[0], 7.0);
        assert_relative_eq!(avg[1], 6.5);
        assert!(avg[2].is_nan());
        assert_relative_eq!(avg[3], 1.75);

        let stepped = floats(periodic_average(revenue(0), 4, 2, None).unwrap());
        assert_relative_eq!(stepped[0], 8.0);
        assert_relative_eq!(stepped[2], 2.5);
    }

    #[test]
    fn test_source_offset_is_the_starting_period() {
        let from_previous = periodic_average(revenue(-1), 3, 1, None).unwrap();
        let avg = floats(from_previous);
        assert_relative_eq!(avg[0], 6.0);
        assert_relative_eq!(avg[1], 7.0);
    }

    #[test]
    fn test_high_and_low() {
        let high = floats(periodic_high(revenue(0), 4, 1, None).unwrap());
        let low = floats(periodic_low(revenue(0), 4, 1, None).unwrap());
        assert_eq!(high[0], 10.0);
        assert_eq!(low[0], 4.0);
        // Ties still resolve to the tied value
        assert_eq!(high[1], 9.0);
        assert_eq!(low[1], 5.0);
        assert!(high[2].is_nan());
        assert!(low[2].is_nan());
        assert_eq!(high[3], 4.0);
        assert_eq!(low[3], -2.0);
    }

    #[test]
    fn test_percent_change() {
        let change = floats(periodic_percent_change(revenue(0), 4, None).unwrap());
        assert_relative_eq!(change[0], 1.5);
        assert_relative_eq!(change[1], -4.0 / 9.0);
        assert_relative_eq!(change[2], 2.0);
        assert_relative_eq!(change[3], -3.0);
        assert!(periodic_percent_change(revenue(0), 1, None).is_err());
    }

    #[test]
    fn test_cagr() {
        let cagr = floats(periodic_cagr(revenue(0), 4, None, None).unwrap());
        assert_relative_eq!(cagr[0], 2.5f64.powf(0.25) - 1.0, epsilon = 1e-12);
        assert_relative_eq!(cagr[1], (5.0f64 / 9.0).powf(0.25) - 1.0, epsilon = 1e-12);
        assert_relative_eq!(cagr[2], 3.0f64.powf(0.25) - 1.0, epsilon = 1e-12);
        // Negative current value has no real root
        assert!(cagr[3].is_nan());

        let explicit = periodic_cagr(revenue(0), 4, Some(2), None).unwrap();
        assert_relative_eq!(floats(explicit)[0], 2.5f64.powf(0.5) - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cagr_drops_non_positive_start() {
        let mut initial = initial();
        initial.insert(Term::from(revenue(-3)), TermArray::Float(Array2::from_elem((1, 4), 0.0)));
        let out = evaluate_with(periodic_cagr(revenue(0), 4, None, None).unwrap(), initial);
        assert!(out.as_float().unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_cagr_validation() {
        let quarterly = Column::periodic("Fundamentals", "revenue", DType::Float64, "ARQ", 0);
        assert_eq!(
            message(periodic_cagr(&quarterly, 3, None, None).unwrap_err()),
            "window_length (3) must be greater than periods_per_year (4)"
        );
        assert!(periodic_cagr(&quarterly, 8, None, None).is_ok());

        let monthly = Column::periodic("Fundamentals", "revenue", DType::Float64, "MRM", 0);
        assert_eq!(
            message(periodic_cagr(&monthly, 12, None, None).unwrap_err()),
            "periods_per_year cannot be inferred and must be specified"
        );
        assert!(periodic_cagr(&monthly, 12, Some(12), None).is_ok());

        let factory = PeriodicSource::factory(|offset, mask| revenue(offset).latest_masked(mask).and_then(Factor::try_from));
        assert!(periodic_cagr(factory.clone(), 4, None, None).is_err());
        assert!(periodic_cagr(factory, 4, Some(1), None).is_ok());
    }

    #[test]
    fn test_increasing_and_decreasing() {
        assert_eq!(
            bools(all_periods_increasing(revenue(0), 4, 1, false, None).unwrap()),
            vec![true, false, false, false]
        );
        assert_eq!(
            bools(all_periods_decreasing(revenue(0), 4, 1, false, None).unwrap()),
            vec![false, false, false, false]
        );
        assert_eq!(
            bools(all_periods_decreasing(revenue(0), 4, 1, true, None).unwrap()),
            vec![false, true, false, false]
        );
        // Offsets 0 and -2 only
        assert_eq!(
            bools(all_periods_increasing(revenue(0), 3, 2, false, None).unwrap()),
            vec![true, false, true, false]
        );
    }

    #[test]
    fn test_counts() {
        let above = floats(count_periods_above(revenue(0), 4.5, 4, 1, false, None).unwrap());
        assert_eq!(above.to_vec(), vec![3.0, 4.0, 0.0, 0.0]);
        let at_least = floats(count_periods_above(revenue(0), 4.0, 4, 1, true, None).unwrap());
        assert_eq!(at_least.to_vec(), vec![4.0, 4.0, 0.0, 2.0]);
        let below = floats(count_periods_below(revenue(0), 5.0, 4, 1, true, None).unwrap());
        assert_eq!(below.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        assert_eq!(
            bools(all_periods_above(revenue(0), 4.5, 4, 1, false, None).unwrap()),
            vec![false, true, false, false]
        );
        assert_eq!(
            bools(all_periods_below(revenue(0), 5.0, 4, 1, false, None).unwrap()),
            vec![false, false, false, true]
        );
    }

    #[test]
    fn test_all_periods_present() {
        assert_eq!(
            bools(all_periods_present(revenue(0), 4, 1, None).unwrap()),
            vec![true, true, false, true]
        );
        assert_eq!(
            bools(all_periods_present(revenue(0), 3, 2, None).unwrap()),
            vec![true, true, true, true]
        );
    }

    #[test]
    fn test_factory_matches_column_source() {
        let factory = PeriodicSource::factory(|offset, mask| revenue(offset).latest_masked(mask).and_then(Factor::try_from));
        assert_eq!(
            periodic_average(factory.clone(), 4, 1, None).unwrap(),
            periodic_average(revenue(0), 4, 1, None).unwrap()
        );
        assert_eq!(
            all_periods_present(factory, 4, 2, None).unwrap(),
            all_periods_present(revenue(0), 4, 2, None).unwrap()
        );
    }

    #[test]
    fn test_mask_limits_every_period() {
        let keep = Filter::external("keep", true).unwrap();
        let mut initial = initial();
        initial.insert(
            Term::from(&keep),
            TermArray::Bool(Array2::from_shape_vec((1, 4), vec![true, true, true, false]).unwrap()),
        );
        let avg = evaluate_with(periodic_average(revenue(0), 4, 1, Some(&keep)).unwrap(), initial);
        let avg = avg.as_float().unwrap();
        assert_relative_eq!(avg[[0, 0]], 7.0);
        assert!(avg[[0, 3]].is_nan());
    }
}
