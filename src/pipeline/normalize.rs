//! Grouped row-wise normalization: demean, zscore, winsorize

use crate::error::{PipelineError, Result};
use crate::pipeline::dtype::F64Key;
use crate::pipeline::summary::{nanmean, nanstd};
use hashbrown::HashMap;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

/// Transform applied independently to each row (or row group)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizeOp {
    Demean,
    Zscore,
    Winsorize { min: F64Key, max: F64Key },
}

impl NormalizeOp {
    /// Winsorize with validated bounds, `0 <= min < max <= 1`
    pub fn winsorize(min_percentile: f64, max_percentile: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_percentile)
            || !(0.0..=1.0).contains(&max_percentile)
            || min_percentile >= max_percentile
        {
            return Err(PipelineError::BadPercentileBounds {
                method: "winsorize".to_string(),
                min: min_percentile,
                max: max_percentile,
                upper: 1.0,
            });
        }
        Ok(NormalizeOp::Winsorize {
            min: F64Key(min_percentile),
            max: F64Key(max_percentile),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            NormalizeOp::Demean => "demean",
            NormalizeOp::Zscore => "zscore",
            NormalizeOp::Winsorize { .. } => "winsorize",
        }
    }

    /// Transform one population; NaN entries are excluded and stay NaN
    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        match self {
            NormalizeOp::Demean => {
                let mean = nanmean(values);
                values.iter().map(|v| v - mean).collect()
            }
            NormalizeOp::Zscore => {
                let mean = nanmean(values);
                let std = nanstd(values);
                values.iter().map(|v| (v - mean) / std).collect()
            }
            NormalizeOp::Winsorize { min, max } => winsorize(values, min.0, max.0),
        }
    }
}

/// Clip values outside the `[min, max]` empirical percentiles of the non-NaN entries
pub fn winsorize(values: &[f64], min_percentile: f64, max_percentile: f64) -> Vec<f64> {
    let mut out = values.to_vec();
    let mut idx: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    let n = idx.len();
    if n == 0 {
        return out;
    }
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    if min_percentile > 0.0 {
        let lower = (min_percentile * n as f64) as usize;
        let clip_to = values[idx[lower]];
        for &i in &idx[..lower] {
            out[i] = clip_to;
        }
    }
    if max_percentile < 1.0 {
        let upper = (n as f64 * max_percentile).ceil() as usize;
        if upper < n && upper > 0 {
            let clip_to = values[idx[upper - 1]];
            for &i in &idx[upper..] {
                out[i] = clip_to;
            }
        }
    }
    out
}

/// Apply `op` per row, over cells where `valid` is true, split by `groups` if given.
/// Invalid cells are NaN in the output.
pub fn grouped_row_transform(
    data: ArrayView2<'_, f64>,
    valid: ArrayView2<'_, bool>,
    groups: Option<ArrayView2<'_, i64>>,
    op: NormalizeOp,
) -> Array2<f64> {
    let (nrows, ncols) = data.dim();
    let rows: Vec<Vec<f64>> = (0..nrows)
        .into_par_iter()
        .map(|r| {
            let mut buckets: HashMap<i64, Vec<usize>> = HashMap::new();
            for c in (0..ncols).filter(|&c| valid[[r, c]]) {
                let key = groups.as_ref().map_or(0, |g| g[[r, c]]);
                buckets.entry(key).or_default().push(c);
            }
            let mut out = vec![f64::NAN; ncols];
            for (_, cols) in buckets {
                let values: Vec<f64> = cols.iter().map(|&c| data[[r, c]]).collect();
                for (&c, v) in cols.iter().zip(op.apply(&values)) {
                    out[c] = v;
                }
            }
            out
        })
        .collect();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat).unwrap_or_else(|_| Array2::from_elem((nrows, ncols), f64::NAN))
}
