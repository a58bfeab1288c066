//! Baseline panel plus an adjustment log, materialized into point-in-time windows

use crate::data::adjustments::{AdjustableValue, Adjustment};
use crate::error::{PipelineError, Result};
use ndarray::{s, Array2, ArrayView2};

/// A (sessions x assets) baseline with adjustments indexed by apply row.
///
/// Adjustments are kept sorted by [`Adjustment::canonical_cmp`], so the set of
/// records fully determines every window regardless of insertion order.
#[derive(Debug, Clone)]
pub struct AdjustedArray<T> {
    baseline: Array2<T>,
    adjustments: Vec<Adjustment<T>>,
}

impl<T: AdjustableValue> AdjustedArray<T> {
    pub fn new(baseline: Array2<T>, adjustments: Vec<Adjustment<T>>) -> Self {
        let mut out = Self {
            baseline,
            adjustments,
        };
        out.adjustments.sort_by(|a, b| a.canonical_cmp(b));
        out
    }

    /// Array with no adjustments
    pub fn from_baseline(baseline: Array2<T>) -> Self {
        Self::new(baseline, Vec::new())
    }

    pub fn baseline(&self) -> ArrayView2<'_, T> {
        self.baseline.view()
    }

    pub fn adjustments(&self) -> &[Adjustment<T>] {
        &self.adjustments
    }

    pub fn nrows(&self) -> usize {
        self.baseline.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.baseline.ncols()
    }

    /// Append an adjustment discovered after construction
    pub fn push_adjustment(&mut self, adjustment: Adjustment<T>) {
        let pos = self
            .adjustments
            .partition_point(|a| a.canonical_cmp(&adjustment).is_le());
        self.adjustments.insert(pos, adjustment);
    }

    /// The `length` rows ending at `end_row`, with every adjustment whose apply
    /// row falls inside the window applied to the in-window rows it targets.
    pub fn window(&self, end_row: usize, length: usize) -> Result<Array2<T>> {
        if length == 0 || end_row >= self.nrows() || length > end_row + 1 {
            return Err(PipelineError::DataError(format!(
                "Window of length {} ending at row {} is outside an array with {} rows",
                length,
                end_row,
                self.nrows()
            )));
        }
        let start = end_row + 1 - length;
        let mut out = self.baseline.slice(s![start..=end_row, ..]).to_owned();

        let lo = self.adjustments.partition_point(|a| a.apply_row < start);
        let hi = self.adjustments.partition_point(|a| a.apply_row <= end_row);
        let ncols = self.ncols();

        for adj in &self.adjustments[lo..hi] {
            if adj.column >= ncols {
                return Err(PipelineError::InconsistentAdjustment {
                    column: adj.column,
                    ncols,
                });
            }
            let first = adj.first_row.max(start);
            let last = adj.last_row.min(end_row);
            for row in first..=last {
                let cell = &mut out[[row - start, adj.column]];
                *cell = adj.apply(*cell);
            }
        }

        Ok(out)
    }

    /// Every window of `length` rows, one per end row from `length - 1` onward
    pub fn traverse(&self, length: usize) -> impl Iterator<Item = Result<Array2<T>>> + '_ {
        let first_end = length.saturating_sub(1);
        (first_end..self.nrows()).map(move |end| self.window(end, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::adjustments::AdjustmentKind;
    use ndarray::array;
    use proptest::prelude::*;

    fn split_at(row: usize, column: usize, ratio: f64) -> Adjustment<f64> {
        Adjustment::new(row, column, 0, row - 1, AdjustmentKind::Multiply, ratio).unwrap()
    }

    fn baseline() -> Array2<f64> {
        array![[10.0, 1.0], [11.0, 2.0], [12.0, 3.0], [6.5, 4.0], [7.0, 5.0]]
    }

    #[test]
    fn test_window_without_adjustments() {
        let arr = AdjustedArray::from_baseline(baseline());
        let w = arr.window(2, 2).unwrap();
        assert_eq!(w, array![[11.0, 2.0], [12.0, 3.0]]);
    }

    #[test]
    fn test_split_only_visible_once_known() {
        let arr = AdjustedArray::new(baseline(), vec![split_at(3, 0, 0.5)]);

        // Window ending before the split day sees raw history
        assert_eq!(arr.window(2, 1).unwrap(), array![[12.0, 3.0]]);
        assert_eq!(arr.window(2, 3).unwrap().column(0).to_vec(), vec![10.0, 11.0, 12.0]);

        // Window ending after the split and spanning it sees adjusted history
        let w = arr.window(4, 3).unwrap();
        assert_eq!(w.column(0).to_vec(), vec![6.0, 6.5, 7.0]);
        assert_eq!(w.column(1).to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_adjustments_compose_in_date_order() {
        let arr = AdjustedArray::new(
            baseline(),
            vec![
                Adjustment::new(4, 1, 0, 3, AdjustmentKind::Add, 10.0).unwrap(),
                Adjustment::new(2, 1, 0, 1, AdjustmentKind::Multiply, 2.0).unwrap(),
            ],
        );
        let w = arr.window(4, 5).unwrap();
        assert_eq!(w.column(1).to_vec(), vec![12.0, 14.0, 13.0, 14.0, 5.0]);
    }

    #[test]
    fn test_overwrite_replaces() {
        let arr = AdjustedArray::new(
            array![[1i64, 2], [3, 4]],
            vec![Adjustment::new(1, 0, 0, 0, AdjustmentKind::Overwrite, 9i64).unwrap()],
        );
        assert_eq!(arr.window(1, 2).unwrap(), array![[9, 2], [3, 4]]);
        assert_eq!(arr.window(0, 1).unwrap(), array![[1, 2]]);
    }

    #[test]
    fn test_inconsistent_column_is_an_error() {
        let arr = AdjustedArray::new(baseline(), vec![split_at(2, 5, 0.5)]);
        assert!(matches!(
            arr.window(2, 2),
            Err(PipelineError::InconsistentAdjustment { column: 5, ncols: 2 })
        ));
        // Out-of-window adjustments are never touched
        assert!(arr.window(1, 1).is_ok());
    }

    #[test]
    fn test_out_of_window_append_does_not_change_window() {
        let mut arr = AdjustedArray::new(baseline(), vec![split_at(2, 0, 0.5)]);
        let before = arr.window(2, 2).unwrap();
        arr.push_adjustment(split_at(4, 0, 0.25));
        assert_eq!(arr.window(2, 2).unwrap(), before);
    }

    #[test]
    fn test_invalid_window_bounds() {
        let arr = AdjustedArray::from_baseline(baseline());
        assert!(arr.window(5, 1).is_err());
        assert!(arr.window(1, 3).is_err());
        assert!(arr.window(1, 0).is_err());
        assert_eq!(arr.traverse(2).count(), 4);
    }

    proptest! {
        #[test]
        fn prop_streamed_equals_preloaded(
            raw in prop::collection::vec((1usize..6, 0usize..2, 0.5f64..2.0, 0usize..2), 0..8),
            end in 0usize..5,
            len_seed in 0usize..5,
        ) {
            let kinds = [AdjustmentKind::Multiply, AdjustmentKind::Add];
            let adjs: Vec<Adjustment<f64>> = raw
                .iter()
                .filter(|(row, ..)| *row < 5)
                .map(|&(row, col, value, kind)| {
                    Adjustment::new(row, col, 0, row - 1, kinds[kind], value).unwrap()
                })
                .collect();

            let preloaded = AdjustedArray::new(baseline(), adjs.clone());
            let mut streamed = AdjustedArray::from_baseline(baseline());
            for adj in adjs.iter().rev() {
                streamed.push_adjustment(*adj);
            }

            let length = len_seed % (end + 1) + 1;
            prop_assert_eq!(preloaded.window(end, length).unwrap(), streamed.window(end, length).unwrap());
        }
    }
}
