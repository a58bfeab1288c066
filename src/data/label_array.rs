//! Compact categorical panel: int32 codes plus a code-to-label table

use crate::error::{PipelineError, Result};
use hashbrown::HashMap;
use ndarray::{Array2, ArrayView2, Zip};
use std::sync::Arc;

/// Code reserved for the missing value
pub const MISSING_CODE: i32 = 0;

/// Categorical 2D array.
///
/// `categories[0]` always holds the missing value; every other entry is a
/// distinct label. Cells equal to the missing value share code 0.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelArray {
    codes: Array2<i32>,
    categories: Arc<Vec<Option<String>>>,
}

impl LabelArray {
    /// Build from per-cell labels; `None` and `missing_value` both map to the missing code
    pub fn from_labels<'a, I>(shape: (usize, usize), labels: I, missing_value: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut categories: Vec<Option<String>> = vec![missing_value.map(str::to_string)];
        let mut lookup: HashMap<&'a str, i32> = HashMap::new();
        let mut flat = Vec::with_capacity(shape.0 * shape.1);

        for label in labels {
            let code = match label {
                None => MISSING_CODE,
                Some(l) if Some(l) == missing_value => MISSING_CODE,
                Some(l) => match lookup.get(l) {
                    Some(&c) => c,
                    None => {
                        let c = categories.len() as i32;
                        categories.push(Some(l.to_string()));
                        lookup.insert(l, c);
                        c
                    }
                },
            };
            flat.push(code);
        }

        let codes = Array2::from_shape_vec(shape, flat).map_err(|e| {
            PipelineError::DataError(format!("LabelArray shape {:?} does not match labels: {}", shape, e))
        })?;
        Ok(Self {
            codes,
            categories: Arc::new(categories),
        })
    }

    /// Build from codes over an existing category table
    pub fn from_codes(codes: Array2<i32>, categories: Arc<Vec<Option<String>>>) -> Result<Self> {
        let n = categories.len() as i32;
        if categories.is_empty() || codes.iter().any(|&c| c < 0 || c >= n) {
            return Err(PipelineError::DataError(format!(
                "LabelArray codes out of range for {} categories",
                categories.len()
            )));
        }
        Ok(Self { codes, categories })
    }

    /// Every cell set to the same label
    pub fn full(shape: (usize, usize), label: Option<&str>, missing_value: Option<&str>) -> Self {
        let mut categories = vec![missing_value.map(str::to_string)];
        let code = match label {
            Some(l) if Some(l) != missing_value => {
                categories.push(Some(l.to_string()));
                1
            }
            _ => MISSING_CODE,
        };
        Self {
            codes: Array2::from_elem(shape, code),
            categories: Arc::new(categories),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.codes.dim()
    }

    pub fn codes(&self) -> ArrayView2<'_, i32> {
        self.codes.view()
    }

    pub fn categories(&self) -> &Arc<Vec<Option<String>>> {
        &self.categories
    }

    pub fn missing_value(&self) -> Option<&str> {
        self.categories[0].as_deref()
    }

    /// Label at a cell, `None` when missing
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        let code = self.codes[[row, col]];
        if code == MISSING_CODE {
            None
        } else {
            self.categories[code as usize].as_deref()
        }
    }

    pub fn is_missing(&self) -> Array2<bool> {
        self.codes.mapv(|c| c == MISSING_CODE)
    }

    pub fn not_missing(&self) -> Array2<bool> {
        self.codes.mapv(|c| c != MISSING_CODE)
    }

    /// Evaluate `pred` once per category and broadcast over codes; missing cells are false
    fn map_predicate(&self, pred: impl Fn(&str) -> bool) -> Array2<bool> {
        let table: Vec<bool> = self
            .categories
            .iter()
            .enumerate()
            .map(|(code, label)| code as i32 != MISSING_CODE && label.as_deref().map_or(false, &pred))
            .collect();
        self.codes.mapv(|c| table[c as usize])
    }

    pub fn eq_label(&self, label: &str) -> Array2<bool> {
        self.map_predicate(|l| l == label)
    }

    pub fn ne_label(&self, label: &str) -> Array2<bool> {
        self.map_predicate(|l| l != label)
    }

    pub fn starts_with(&self, prefix: &str) -> Array2<bool> {
        self.map_predicate(|l| l.starts_with(prefix))
    }

    pub fn ends_with(&self, suffix: &str) -> Array2<bool> {
        self.map_predicate(|l| l.ends_with(suffix))
    }

    pub fn has_substring(&self, needle: &str) -> Array2<bool> {
        self.map_predicate(|l| l.contains(needle))
    }

    pub fn is_in(&self, choices: &[String]) -> Array2<bool> {
        self.map_predicate(|l| choices.iter().any(|c| c == l))
    }

    /// Group key per cell; the missing code stays 0
    pub fn group_codes(&self) -> Array2<i64> {
        self.codes.mapv(i64::from)
    }

    /// Relabel through `f`; labels mapped to `None` become missing
    pub fn map_labels(&self, f: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mapped: Vec<Option<String>> = self
            .categories
            .iter()
            .enumerate()
            .map(|(code, label)| {
                if code as i32 == MISSING_CODE {
                    None
                } else {
                    label.as_deref().and_then(&f)
                }
            })
            .collect();
        let shape = self.shape();
        Self::from_labels(
            shape,
            self.codes.iter().map(|&c| mapped[c as usize].as_deref()),
            self.missing_value(),
        )
    }

    /// Copy of rows `[start, end)`
    pub fn rows(&self, start: usize, end: usize) -> Self {
        Self {
            codes: self.codes.slice(ndarray::s![start..end, ..]).to_owned(),
            categories: Arc::clone(&self.categories),
        }
    }

    /// Set cells where `mask` is false to missing
    pub fn apply_mask(&mut self, mask: ArrayView2<'_, bool>) {
        Zip::from(&mut self.codes).and(mask).for_each(|code, &keep| {
            if !keep {
                *code = MISSING_CODE;
            }
        });
    }

    /// Take `self` where `cond` is true and `other` elsewhere, merging category tables
    pub fn select(&self, cond: ArrayView2<'_, bool>, other: &LabelArray) -> Result<Self> {
        let (rows, cols) = self.shape();
        let mut labels = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                labels.push(if cond[[r, c]] { self.get(r, c) } else { other.get(r, c) });
            }
        }
        Self::from_labels((rows, cols), labels, self.missing_value())
    }
}
