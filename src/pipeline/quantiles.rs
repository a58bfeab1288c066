//! Row-wise quantile bucketing

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

/// Label written for masked or missing cells
pub const MISSING_BUCKET: i64 = -1;

/// Linearly interpolated percentile of sorted values, `q` in `[0, 1]`
pub fn interpolated_quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Assign each valid, non-NaN entry of `values` to one of `bins` equal-population buckets.
///
/// Edges are interpolated from the empirical distribution; an entry lands in
/// bucket `i` when `edge[i] < v <= edge[i + 1]`, with the lowest edge inclusive.
pub fn quantile_row(values: &[f64], valid: &[bool], bins: usize) -> Vec<i64> {
    let mut present: Vec<f64> = values
        .iter()
        .zip(valid)
        .filter(|(v, &ok)| ok && !v.is_nan())
        .map(|(&v, _)| v)
        .collect();
    let mut out = vec![MISSING_BUCKET; values.len()];
    if present.is_empty() || bins == 0 {
        return out;
    }
    present.sort_by(f64::total_cmp);
    let inner_edges: Vec<f64> = (1..bins)
        .map(|j| interpolated_quantile(&present, j as f64 / bins as f64))
        .collect();
    for (i, (&v, &ok)) in values.iter().zip(valid).enumerate() {
        if ok && !v.is_nan() {
            out[i] = inner_edges.iter().filter(|&&edge| edge < v).count() as i64;
        }
    }
    out
}

/// Bucket every row of `data`; cells outside `valid` get [`MISSING_BUCKET`]
pub fn quantiles(data: ArrayView2<'_, f64>, valid: ArrayView2<'_, bool>, bins: usize) -> Array2<i64> {
    let (nrows, ncols) = data.dim();
    let rows: Vec<Vec<i64>> = (0..nrows)
        .into_par_iter()
        .map(|r| {
            let values = data.row(r).to_vec();
            let mask = valid.row(r).to_vec();
            quantile_row(&values, &mask, bins)
        })
        .collect();
    let flat: Vec<i64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .unwrap_or_else(|_| Array2::from_elem((nrows, ncols), MISSING_BUCKET))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use proptest::prelude::*;

    #[test]
    fn test_even_split() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let valid = vec![true; 10];
        assert_eq!(quantile_row(&values, &valid, 2), vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1]);
        assert_eq!(quantile_row(&values, &valid, 5), vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_order_independent_of_position() {
        let values = [4.0, 1.0, 3.0, 2.0];
        let valid = [true; 4];
        assert_eq!(quantile_row(&values, &valid, 4), vec![3, 0, 2, 1]);
    }

    #[test]
    fn test_masked_and_nan_cells() {
        let data = array![[1.0, f64::NAN, 3.0, 4.0, 5.0]];
        let valid = array![[true, true, true, true, false]];
        let out = quantiles(data.view(), valid.view(), 3);
        assert_eq!(out, array![[0, -1, 1, 2, -1]]);
    }

    #[test]
    fn test_empty_row() {
        let data = Array2::from_elem((1, 3), f64::NAN);
        let valid = Array2::from_elem((1, 3), true);
        assert_eq!(quantiles(data.view(), valid.view(), 4), array![[-1, -1, -1]]);
    }

    #[test]
    fn test_interpolated_quantile() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(interpolated_quantile(&sorted, 0.0), 1.0);
        assert_eq!(interpolated_quantile(&sorted, 0.5), 2.5);
        assert_eq!(interpolated_quantile(&sorted, 1.0), 4.0);
    }

    proptest! {
        #[test]
        fn prop_distinct_values_fill_buckets_evenly(
            (bins, values) in (1usize..8, 1usize..6).prop_flat_map(|(bins, per_bucket)| {
                (Just(bins), prop::collection::hash_set(-10_000i64..10_000, bins * per_bucket))
            })
        ) {
            let values: Vec<f64> = values.into_iter().map(|v| v as f64).collect();
            let valid = vec![true; values.len()];
            let labels = quantile_row(&values, &valid, bins);
            let per_bucket = values.len() / bins;
            for bucket in 0..bins as i64 {
                prop_assert_eq!(labels.iter().filter(|&&l| l == bucket).count(), per_bucket);
            }
        }
    }
}
