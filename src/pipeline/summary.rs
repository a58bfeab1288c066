//! Row-wise reductions ignoring missing values

use ndarray::{Array1, ArrayView2};
use statrs::statistics::{Data, OrderStatistics};
use std::fmt;

/// Summary reductions over one cross-section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryFunc {
    Mean,
    Sum,
    Median,
    Min,
    Max,
    Stddev,
    NotNullCount,
}

impl SummaryFunc {
    pub const ALL: [SummaryFunc; 7] = [
        SummaryFunc::Mean,
        SummaryFunc::Sum,
        SummaryFunc::Median,
        SummaryFunc::Min,
        SummaryFunc::Max,
        SummaryFunc::Stddev,
        SummaryFunc::NotNullCount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SummaryFunc::Mean => "mean",
            SummaryFunc::Sum => "sum",
            SummaryFunc::Median => "median",
            SummaryFunc::Min => "min",
            SummaryFunc::Max => "max",
            SummaryFunc::Stddev => "stddev",
            SummaryFunc::NotNullCount => "notnull_count",
        }
    }

    /// Reduce the non-NaN entries of `values`
    pub fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            SummaryFunc::Mean => nanmean(values),
            SummaryFunc::Sum => nansum(values),
            SummaryFunc::Median => nanmedian(values),
            SummaryFunc::Min => non_nan(values).fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc }),
            SummaryFunc::Max => non_nan(values).fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc }),
            SummaryFunc::Stddev => nanstd(values),
            SummaryFunc::NotNullCount => non_nan(values).count() as f64,
        }
    }
}

impl fmt::Display for SummaryFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn non_nan(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

/// Sum of non-NaN values (0 when there are none)
pub fn nansum(values: &[f64]) -> f64 {
    non_nan(values).sum()
}

/// Mean of non-NaN values, NaN when there are none
pub fn nanmean(values: &[f64]) -> f64 {
    let (sum, count) = non_nan(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Population standard deviation of non-NaN values, NaN when there are none
pub fn nanstd(values: &[f64]) -> f64 {
    let mean = nanmean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let (sq, count) = non_nan(values).fold((0.0, 0usize), |(s, n), v| {
        let d = v - mean;
        (s + d * d, n + 1)
    });
    (sq / count as f64).sqrt()
}

/// Median of non-NaN values, NaN when there are none
pub fn nanmedian(values: &[f64]) -> f64 {
    let present: Vec<f64> = non_nan(values).collect();
    if present.is_empty() {
        return f64::NAN;
    }
    Data::new(present).median()
}

/// Reduce each row over cells where `valid` is true
pub fn row_summary(data: ArrayView2<'_, f64>, valid: ArrayView2<'_, bool>, func: SummaryFunc) -> Array1<f64> {
    let mut out = Array1::from_elem(data.nrows(), f64::NAN);
    let mut buf = Vec::with_capacity(data.ncols());
    for (r, slot) in out.iter_mut().enumerate() {
        buf.clear();
        buf.extend(
            data.row(r)
                .iter()
                .zip(valid.row(r).iter())
                .filter(|(_, &ok)| ok)
                .map(|(&v, _)| v),
        );
        *slot = func.reduce(&buf);
    }
    out
}
