//! Masked, optionally grouped, row-wise ranking

use crate::error::PipelineError;
use hashbrown::HashMap;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Tie-breaking method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RankMethod {
    /// Ties ranked in order of first occurrence
    #[default]
    Ordinal,
    /// Ties share the mean of the ranks they span
    Average,
    /// Ties share the lowest rank they span
    Min,
    /// Ties share the highest rank they span
    Max,
    /// Like min, but ranks of distinct values are consecutive
    Dense,
}

impl RankMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMethod::Ordinal => "ordinal",
            RankMethod::Average => "average",
            RankMethod::Min => "min",
            RankMethod::Max => "max",
            RankMethod::Dense => "dense",
        }
    }
}

impl FromStr for RankMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinal" => Ok(RankMethod::Ordinal),
            "average" => Ok(RankMethod::Average),
            "min" => Ok(RankMethod::Min),
            "max" => Ok(RankMethod::Max),
            "dense" => Ok(RankMethod::Dense),
            other => Err(PipelineError::UnknownRankMethod(other.to_string())),
        }
    }
}

impl fmt::Display for RankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank `values[idx]` in place of `out`, leaving other positions untouched
fn rank_subset<T: PartialOrd + Copy>(
    values: &[T],
    mut idx: Vec<usize>,
    method: RankMethod,
    ascending: bool,
    out: &mut [f64],
) {
    let cmp = |a: &usize, b: &usize| {
        let ord = values[*a].partial_cmp(&values[*b]).unwrap_or(Ordering::Equal);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    };
    // stable: ties keep column order in both directions
    idx.sort_by(|a, b| cmp(a, b));

    let n = idx.len();
    let mut i = 0;
    let mut dense = 0usize;
    while i < n {
        let mut j = i + 1;
        while j < n && cmp(&idx[i], &idx[j]) == Ordering::Equal {
            j += 1;
        }
        dense += 1;
        for (k, &col) in idx.iter().enumerate().take(j).skip(i) {
            out[col] = match method {
                RankMethod::Ordinal => (k + 1) as f64,
                RankMethod::Average => (i + 1 + j) as f64 / 2.0,
                RankMethod::Min => (i + 1) as f64,
                RankMethod::Max => j as f64,
                RankMethod::Dense => dense as f64,
            };
        }
        i = j;
    }
}

fn collect_rows(rows: Vec<Vec<f64>>, shape: (usize, usize)) -> Array2<f64> {
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec(shape, flat).unwrap_or_else(|_| Array2::from_elem(shape, f64::NAN))
}

/// Row-wise rank of `data` over cells where `valid` is true; other cells are NaN
pub fn masked_rankdata_2d<T>(
    data: ArrayView2<'_, T>,
    valid: ArrayView2<'_, bool>,
    method: RankMethod,
    ascending: bool,
) -> Array2<f64>
where
    T: PartialOrd + Copy + Send + Sync,
{
    let (nrows, ncols) = data.dim();
    let rows: Vec<Vec<f64>> = (0..nrows)
        .into_par_iter()
        .map(|r| {
            let values: Vec<T> = data.row(r).to_vec();
            let idx: Vec<usize> = (0..ncols).filter(|&c| valid[[r, c]]).collect();
            let mut out = vec![f64::NAN; ncols];
            rank_subset(&values, idx, method, ascending, &mut out);
            out
        })
        .collect();
    collect_rows(rows, (nrows, ncols))
}

/// Like [`masked_rankdata_2d`], ranking independently within each group key per row
pub fn grouped_masked_rankdata_2d<T>(
    data: ArrayView2<'_, T>,
    valid: ArrayView2<'_, bool>,
    groups: ArrayView2<'_, i64>,
    method: RankMethod,
    ascending: bool,
) -> Array2<f64>
where
    T: PartialOrd + Copy + Send + Sync,
{
    let (nrows, ncols) = data.dim();
    let rows: Vec<Vec<f64>> = (0..nrows)
        .into_par_iter()
        .map(|r| {
            let values: Vec<T> = data.row(r).to_vec();
            let mut buckets: HashMap<i64, Vec<usize>> = HashMap::new();
            for c in (0..ncols).filter(|&c| valid[[r, c]]) {
                buckets.entry(groups[[r, c]]).or_default().push(c);
            }
            let mut out = vec![f64::NAN; ncols];
            for (_, idx) in buckets {
                rank_subset(&values, idx, method, ascending, &mut out);
            }
            out
        })
        .collect();
    collect_rows(rows, (nrows, ncols))
}

/// True at the first largest valid cell of each row, or of each group within a row
pub fn grouped_masked_is_maximal(
    data: ArrayView2<'_, f64>,
    valid: ArrayView2<'_, bool>,
    groups: Option<ArrayView2<'_, i64>>,
) -> Array2<bool> {
    let (nrows, ncols) = data.dim();
    let mut out = Array2::from_elem((nrows, ncols), false);
    for r in 0..nrows {
        let mut best: HashMap<i64, usize> = HashMap::new();
        for c in (0..ncols).filter(|&c| valid[[r, c]]) {
            let key = groups.as_ref().map_or(0, |g| g[[r, c]]);
            let entry = best.entry(key).or_insert(c);
            if data[[r, c]] > data[[r, *entry]] {
                *entry = c;
            }
        }
        for c in best.into_values() {
            out[[r, c]] = true;
        }
    }
    out
}
