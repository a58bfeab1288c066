//! Pipeline output frames indexed by (session, asset)

use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::dtype::{DType, Scalar};
use crate::types::{AssetId, Session};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::Path;

/// One output column, one entry per frame row
#[derive(Debug, Clone)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Datetime(Vec<i64>),
    Bool(Vec<bool>),
    Categorical(Vec<Option<String>>),
}

impl PartialEq for ColumnData {
    /// NaN equals NaN so frames from separate runs compare cell by cell
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            }
            (ColumnData::Int(a), ColumnData::Int(b)) => a == b,
            (ColumnData::Datetime(a), ColumnData::Datetime(b)) => a == b,
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a == b,
            (ColumnData::Categorical(a), ColumnData::Categorical(b)) => a == b,
            _ => false,
        }
    }
}

impl ColumnData {
    fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => ColumnData::Float(Vec::new()),
            DType::Int64 => ColumnData::Int(Vec::new()),
            DType::DatetimeNs => ColumnData::Datetime(Vec::new()),
            DType::Bool => ColumnData::Bool(Vec::new()),
            DType::Categorical => ColumnData::Categorical(Vec::new()),
        }
    }

    /// Values of `array` at `cells`, in order
    pub(crate) fn gather(array: &TermArray, cells: &[(usize, usize)]) -> Self {
        match array {
            TermArray::Float(a) => ColumnData::Float(cells.iter().map(|&(r, c)| a[[r, c]]).collect()),
            TermArray::Int(a) => ColumnData::Int(cells.iter().map(|&(r, c)| a[[r, c]]).collect()),
            TermArray::Datetime(a) => ColumnData::Datetime(cells.iter().map(|&(r, c)| a[[r, c]]).collect()),
            TermArray::Bool(a) => ColumnData::Bool(cells.iter().map(|&(r, c)| a[[r, c]]).collect()),
            TermArray::Categorical(l) => {
                ColumnData::Categorical(cells.iter().map(|&(r, c)| l.get(r, c).map(str::to_string)).collect())
            }
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ColumnData::Float(_) => DType::Float64,
            ColumnData::Int(_) => DType::Int64,
            ColumnData::Datetime(_) => DType::DatetimeNs,
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Categorical(_) => DType::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) | ColumnData::Datetime(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Scalar> {
        if i >= self.len() {
            return None;
        }
        Some(match self {
            ColumnData::Float(v) => Scalar::Float(v[i]),
            ColumnData::Int(v) => Scalar::Int(v[i]),
            ColumnData::Datetime(v) => Scalar::Datetime(v[i]),
            ColumnData::Bool(v) => Scalar::Bool(v[i]),
            ColumnData::Categorical(v) => Scalar::Str(v[i].clone()),
        })
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ColumnData::Float(v) => Some(v),
            _ => None,
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        match self {
            ColumnData::Float(v) => ColumnData::Float(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Int(v) => ColumnData::Int(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Datetime(v) => ColumnData::Datetime(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Bool(v) => ColumnData::Bool(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Categorical(v) => ColumnData::Categorical(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn extend(&mut self, other: &ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => a.extend_from_slice(b),
            (ColumnData::Int(a), ColumnData::Int(b)) => a.extend_from_slice(b),
            (ColumnData::Datetime(a), ColumnData::Datetime(b)) => a.extend_from_slice(b),
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend_from_slice(b),
            (ColumnData::Categorical(a), ColumnData::Categorical(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(PipelineError::TypeMismatch {
                    context: "appending pipeline output".to_string(),
                    expected: a.dtype().to_string(),
                    actual: b.dtype().to_string(),
                })
            }
        }
        Ok(())
    }

    fn json_value(&self, i: usize) -> Value {
        match self {
            // from_f64 yields None for NaN
            ColumnData::Float(v) => serde_json::Number::from_f64(v[i]).map_or(Value::Null, Value::Number),
            ColumnData::Int(v) => Value::from(v[i]),
            ColumnData::Datetime(v) if v[i] == crate::types::NAT => Value::Null,
            ColumnData::Datetime(v) => Value::from(v[i]),
            ColumnData::Bool(v) => Value::from(v[i]),
            ColumnData::Categorical(v) => v[i].clone().map_or(Value::Null, Value::from),
        }
    }

    fn to_series(&self, name: &str) -> Result<Series> {
        Ok(match self {
            ColumnData::Float(v) => Series::new(name, v.as_slice()),
            ColumnData::Int(v) => Series::new(name, v.as_slice()),
            ColumnData::Datetime(v) => {
                let nanos: Vec<Option<i64>> =
                    v.iter().map(|&n| if n == crate::types::NAT { None } else { Some(n) }).collect();
                Series::new(name, nanos).cast(&DataType::Datetime(TimeUnit::Nanoseconds, None))?
            }
            ColumnData::Bool(v) => Series::new(name, v.as_slice()),
            ColumnData::Categorical(v) => Series::new(name, v.clone()),
        })
    }
}

/// Pipeline results: one row per surviving (session, asset), sorted by session then asset
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFrame {
    index: Vec<(Session, AssetId)>,
    columns: Vec<(String, ColumnData)>,
}

impl PipelineFrame {
    /// Frame with no rows and typed, named columns
    pub fn empty<'a>(schema: impl IntoIterator<Item = (&'a str, DType)>) -> Self {
        Self {
            index: Vec::new(),
            columns: schema
                .into_iter()
                .map(|(name, dtype)| (name.to_string(), ColumnData::empty(dtype)))
                .collect(),
        }
    }

    pub(crate) fn new(index: Vec<(Session, AssetId)>, columns: Vec<(String, ColumnData)>) -> Result<Self> {
        if let Some((name, data)) = columns.iter().find(|(_, data)| data.len() != index.len()) {
            return Err(PipelineError::ShapeMismatch {
                term: name.clone(),
                expected: (index.len(), 1),
                actual: (data.len(), 1),
            });
        }
        Ok(Self { index, columns })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[(Session, AssetId)] {
        &self.index
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Distinct sessions present, ascending
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.index.iter().map(|(s, _)| *s).collect();
        sessions.dedup();
        sessions
    }

    /// Assets present on `session`, ascending
    pub fn assets(&self, session: Session) -> Vec<AssetId> {
        self.index.iter().filter(|(s, _)| *s == session).map(|(_, a)| *a).collect()
    }

    fn position(&self, session: Session, asset: AssetId) -> Option<usize> {
        self.index.binary_search(&(session, asset)).ok()
    }

    /// Value of one cell, `None` when the row or column is absent
    pub fn get(&self, name: &str, session: Session, asset: AssetId) -> Option<Scalar> {
        let row = self.position(session, asset)?;
        self.column(name)?.get(row)
    }

    /// Float value of one cell
    pub fn get_f64(&self, name: &str, session: Session, asset: AssetId) -> Option<f64> {
        self.get(name, session, asset)?.as_f64()
    }

    /// Cross-section for one session
    pub fn xs(&self, session: Session) -> PipelineFrame {
        let start = self.index.partition_point(|(s, _)| *s < session);
        let end = self.index.partition_point(|(s, _)| *s <= session);
        let rows: Vec<usize> = (start..end).collect();
        PipelineFrame {
            index: self.index[start..end].to_vec(),
            columns: self.columns.iter().map(|(n, d)| (n.clone(), d.take(&rows))).collect(),
        }
    }

    /// Append rows of a later frame with the same columns
    pub fn append(&mut self, other: &PipelineFrame) -> Result<()> {
        if self.column_names() != other.column_names() {
            return Err(PipelineError::DataError(format!(
                "cannot append frame with columns {:?} to frame with columns {:?}",
                other.column_names(),
                self.column_names()
            )));
        }
        if let (Some(last), Some(first)) = (self.index.last(), other.index.first()) {
            if first <= last {
                return Err(PipelineError::DataError(format!(
                    "appended rows must follow existing rows: {:?} after {:?}",
                    first, last
                )));
            }
        }
        for ((_, mine), (_, theirs)) in self.columns.iter_mut().zip(&other.columns) {
            mine.extend(theirs)?;
        }
        self.index.extend_from_slice(&other.index);
        Ok(())
    }

    /// Export as a polars `DataFrame` with `session` and `asset` columns first
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let sessions: Vec<Session> = self.index.iter().map(|(s, _)| *s).collect();
        let assets: Vec<u64> = self.index.iter().map(|(_, a)| *a).collect();
        let mut series = vec![Series::new("session", sessions), Series::new("asset", assets)];
        for (name, data) in &self.columns {
            series.push(data.to_series(name)?);
        }
        Ok(DataFrame::new(series)?)
    }

    /// Write the frame as CSV with a header row
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        log::debug!("wrote {} rows to {}", self.len(), path.display());
        Ok(())
    }

    pub fn write_parquet(&self, path: &Path) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let file = File::create(path)?;
        ParquetWriter::new(file).finish(&mut df)?;
        log::debug!("wrote {} rows to {}", self.len(), path.display());
        Ok(())
    }

    /// One JSON object per row; missing values become `null`
    pub fn to_json_records(&self) -> Result<String> {
        let records: Vec<Value> = self
            .index
            .iter()
            .enumerate()
            .map(|(row, (session, asset))| {
                let mut record = Map::new();
                record.insert("session".to_string(), Value::from(session.to_string()));
                record.insert("asset".to_string(), Value::from(*asset));
                for (name, data) in &self.columns {
                    record.insert(name.clone(), data.json_value(row));
                }
                Value::Object(record)
            })
            .collect();
        Ok(serde_json::to_string(&records)?)
    }
}
