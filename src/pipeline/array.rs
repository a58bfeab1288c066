//! Typed (sessions x assets) panels produced by terms

use crate::data::label_array::LabelArray;
use crate::error::{PipelineError, Result};
use crate::pipeline::dtype::{DType, Scalar};
use crate::types::NAT;
use ndarray::{s, Array2, ArrayView2, Zip};

/// A materialized term result
#[derive(Debug, Clone, PartialEq)]
pub enum TermArray {
    Float(Array2<f64>),
    Datetime(Array2<i64>),
    Int(Array2<i64>),
    Bool(Array2<bool>),
    Categorical(LabelArray),
}

fn mismatch(context: &str, expected: DType, actual: DType) -> PipelineError {
    PipelineError::TypeMismatch {
        context: context.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

impl TermArray {
    pub fn dtype(&self) -> DType {
        match self {
            TermArray::Float(_) => DType::Float64,
            TermArray::Datetime(_) => DType::DatetimeNs,
            TermArray::Int(_) => DType::Int64,
            TermArray::Bool(_) => DType::Bool,
            TermArray::Categorical(_) => DType::Categorical,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            TermArray::Float(a) => a.dim(),
            TermArray::Datetime(a) | TermArray::Int(a) => a.dim(),
            TermArray::Bool(a) => a.dim(),
            TermArray::Categorical(a) => a.shape(),
        }
    }

    /// Array of `shape` filled with `value`
    pub fn full(shape: (usize, usize), value: &Scalar, missing: &Scalar) -> Self {
        match value {
            Scalar::Float(v) => TermArray::Float(Array2::from_elem(shape, *v)),
            Scalar::Datetime(v) => TermArray::Datetime(Array2::from_elem(shape, *v)),
            Scalar::Int(v) => TermArray::Int(Array2::from_elem(shape, *v)),
            Scalar::Bool(v) => TermArray::Bool(Array2::from_elem(shape, *v)),
            Scalar::Str(v) => TermArray::Categorical(LabelArray::full(shape, v.as_deref(), missing.as_str())),
        }
    }

    pub fn as_float(&self) -> Result<&Array2<f64>> {
        match self {
            TermArray::Float(a) => Ok(a),
            other => Err(mismatch("float input", DType::Float64, other.dtype())),
        }
    }

    pub fn as_bool(&self) -> Result<&Array2<bool>> {
        match self {
            TermArray::Bool(a) => Ok(a),
            other => Err(mismatch("filter input", DType::Bool, other.dtype())),
        }
    }

    pub fn as_labels(&self) -> Result<&LabelArray> {
        match self {
            TermArray::Categorical(a) => Ok(a),
            other => Err(mismatch("categorical input", DType::Categorical, other.dtype())),
        }
    }

    /// Integer view of int or datetime panels
    pub fn as_i64(&self) -> Result<&Array2<i64>> {
        match self {
            TermArray::Int(a) | TermArray::Datetime(a) => Ok(a),
            other => Err(mismatch("integer input", DType::Int64, other.dtype())),
        }
    }

    /// Copy of rows `[start, end)`
    pub fn rows(&self, start: usize, end: usize) -> Self {
        match self {
            TermArray::Float(a) => TermArray::Float(a.slice(s![start..end, ..]).to_owned()),
            TermArray::Datetime(a) => TermArray::Datetime(a.slice(s![start..end, ..]).to_owned()),
            TermArray::Int(a) => TermArray::Int(a.slice(s![start..end, ..]).to_owned()),
            TermArray::Bool(a) => TermArray::Bool(a.slice(s![start..end, ..]).to_owned()),
            TermArray::Categorical(a) => TermArray::Categorical(a.rows(start, end)),
        }
    }

    /// Copy of columns `[start, end)`
    pub fn columns(&self, start: usize, end: usize) -> Result<Self> {
        match self {
            TermArray::Float(a) => Ok(TermArray::Float(a.slice(s![.., start..end]).to_owned())),
            TermArray::Datetime(a) => Ok(TermArray::Datetime(a.slice(s![.., start..end]).to_owned())),
            TermArray::Int(a) => Ok(TermArray::Int(a.slice(s![.., start..end]).to_owned())),
            TermArray::Bool(a) => Ok(TermArray::Bool(a.slice(s![.., start..end]).to_owned())),
            TermArray::Categorical(a) => {
                let codes = a.codes().slice(s![.., start..end]).to_owned();
                Ok(TermArray::Categorical(LabelArray::from_codes(codes, a.categories().clone())?))
            }
        }
    }

    /// One column repeated across `ncols` columns
    pub fn broadcast_column(&self, col: usize, ncols: usize) -> Result<Self> {
        let (rows, _) = self.shape();
        let pick = |r: usize, _c: usize| (r, col);
        Ok(match self {
            TermArray::Float(a) => TermArray::Float(Array2::from_shape_fn((rows, ncols), |(r, c)| a[pick(r, c)])),
            TermArray::Datetime(a) => {
                TermArray::Datetime(Array2::from_shape_fn((rows, ncols), |(r, c)| a[pick(r, c)]))
            }
            TermArray::Int(a) => TermArray::Int(Array2::from_shape_fn((rows, ncols), |(r, c)| a[pick(r, c)])),
            TermArray::Bool(a) => TermArray::Bool(Array2::from_shape_fn((rows, ncols), |(r, c)| a[pick(r, c)])),
            TermArray::Categorical(a) => {
                let codes = Array2::from_shape_fn((rows, ncols), |(r, c)| a.codes()[pick(r, c)]);
                TermArray::Categorical(LabelArray::from_codes(codes, a.categories().clone())?)
            }
        })
    }

    /// True where the cell holds the missing value
    pub fn missing_mask(&self, missing: &Scalar) -> Array2<bool> {
        match self {
            TermArray::Float(a) => a.mapv(f64::is_nan),
            TermArray::Datetime(a) => a.mapv(|v| v == NAT),
            TermArray::Int(a) => {
                let m = missing.as_i64().unwrap_or(-1);
                a.mapv(|v| v == m)
            }
            TermArray::Bool(a) => {
                let m = missing.as_bool().unwrap_or(false);
                a.mapv(|v| v == m)
            }
            TermArray::Categorical(a) => a.is_missing(),
        }
    }

    /// Overwrite cells where `mask` is false with the missing value
    pub fn apply_mask(&mut self, mask: ArrayView2<'_, bool>, missing: &Scalar) {
        fn fill<T: Copy>(a: &mut Array2<T>, mask: ArrayView2<'_, bool>, value: T) {
            Zip::from(a).and(mask).for_each(|cell, &keep| {
                if !keep {
                    *cell = value;
                }
            });
        }
        match self {
            TermArray::Float(a) => fill(a, mask, missing.as_f64().unwrap_or(f64::NAN)),
            TermArray::Datetime(a) => fill(a, mask, missing.as_i64().unwrap_or(NAT)),
            TermArray::Int(a) => fill(a, mask, missing.as_i64().unwrap_or(-1)),
            TermArray::Bool(a) => fill(a, mask, missing.as_bool().unwrap_or(false)),
            TermArray::Categorical(a) => a.apply_mask(mask),
        }
    }

    /// Value at a cell
    pub fn get(&self, row: usize, col: usize) -> Scalar {
        match self {
            TermArray::Float(a) => Scalar::Float(a[[row, col]]),
            TermArray::Datetime(a) => Scalar::Datetime(a[[row, col]]),
            TermArray::Int(a) => Scalar::Int(a[[row, col]]),
            TermArray::Bool(a) => Scalar::Bool(a[[row, col]]),
            TermArray::Categorical(a) => Scalar::Str(a.get(row, col).map(str::to_string)),
        }
    }

    /// `self` where `cond` is true, `other` elsewhere
    pub fn select(&self, cond: ArrayView2<'_, bool>, other: &TermArray) -> Result<Self> {
        fn pick<T: Copy>(a: &Array2<T>, b: &Array2<T>, cond: ArrayView2<'_, bool>) -> Array2<T> {
            let mut out = a.clone();
            Zip::from(&mut out).and(b).and(cond).for_each(|o, &bv, &keep| {
                if !keep {
                    *o = bv;
                }
            });
            out
        }
        Ok(match (self, other) {
            (TermArray::Float(a), TermArray::Float(b)) => TermArray::Float(pick(a, b, cond)),
            (TermArray::Datetime(a), TermArray::Datetime(b)) => TermArray::Datetime(pick(a, b, cond)),
            (TermArray::Int(a), TermArray::Int(b)) => TermArray::Int(pick(a, b, cond)),
            (TermArray::Bool(a), TermArray::Bool(b)) => TermArray::Bool(pick(a, b, cond)),
            (TermArray::Categorical(a), TermArray::Categorical(b)) => TermArray::Categorical(a.select(cond, b)?),
            (a, b) => return Err(mismatch("select", a.dtype(), b.dtype())),
        })
    }

    /// Integer group keys plus validity for classifier outputs
    pub fn group_keys(&self, missing: &Scalar) -> Result<(Array2<i64>, Array2<bool>)> {
        match self {
            TermArray::Int(a) => {
                let m = missing.as_i64().unwrap_or(-1);
                Ok((a.clone(), a.mapv(|v| v != m)))
            }
            TermArray::Categorical(a) => Ok((a.group_codes(), a.not_missing())),
            other => Err(mismatch("groupby", DType::Int64, other.dtype())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_apply_mask_per_dtype() {
        let mask = array![[true, false], [false, true]];

        let mut f = TermArray::Float(array![[1.0, 2.0], [3.0, 4.0]]);
        f.apply_mask(mask.view(), &Scalar::Float(f64::NAN));
        assert!(f.as_float().unwrap()[[0, 1]].is_nan());
        assert_eq!(f.as_float().unwrap()[[1, 1]], 4.0);

        let mut i = TermArray::Int(array![[1, 2], [3, 4]]);
        i.apply_mask(mask.view(), &Scalar::Int(0));
        assert_eq!(i.as_i64().unwrap(), &array![[1, 0], [0, 4]]);

        let mut d = TermArray::Datetime(array![[1, 2], [3, 4]]);
        d.apply_mask(mask.view(), &Scalar::Datetime(NAT));
        assert_eq!(d.missing_mask(&Scalar::Datetime(NAT)), array![[false, true], [true, false]]);
    }

    #[test]
    fn test_int_missing_uses_sentinel() {
        let i = TermArray::Int(array![[0, -1], [5, 0]]);
        assert_eq!(i.missing_mask(&Scalar::Int(0)), array![[true, false], [false, true]]);
    }

    #[test]
    fn test_broadcast_and_columns() {
        let f = TermArray::Float(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let b = f.broadcast_column(1, 3).unwrap();
        assert_eq!(b.as_float().unwrap(), &array![[2.0, 2.0, 2.0], [5.0, 5.0, 5.0]]);
        let c = f.columns(1, 3).unwrap();
        assert_eq!(c.shape(), (2, 2));
    }

    #[test]
    fn test_select_type_mismatch() {
        let f = TermArray::Float(array![[1.0]]);
        let i = TermArray::Int(array![[1]]);
        assert!(f.select(array![[true]].view(), &i).is_err());
    }
}
