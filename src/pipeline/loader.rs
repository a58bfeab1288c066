//! Pipeline loaders: turn dataset columns into adjusted arrays
//!
//! The engine asks a loader for a set of columns over the sessions of one
//! run (lookback included) and the run's assets. Loaders own their data; the
//! engine only reads the arrays they hand back.

use crate::data::adjusted_array::AdjustedArray;
use crate::data::adjustments::{AdjustedField, Adjustment, AdjustmentReader, AdjustmentRecord};
use crate::data::label_array::{LabelArray, MISSING_CODE};
use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::dataset::{Column, EquityPricing};
use crate::pipeline::dtype::DType;
use crate::types::{AssetId, Session, NAT};
use hashbrown::HashMap;
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;

/// A column's data over the sessions and assets of one run
#[derive(Debug, Clone)]
pub enum LoadedColumn {
    Float(AdjustedArray<f64>),
    Int(AdjustedArray<i64>),
    Datetime(AdjustedArray<i64>),
    Bool(AdjustedArray<bool>),
    Categorical {
        codes: AdjustedArray<i32>,
        categories: Arc<Vec<Option<String>>>,
    },
}

impl LoadedColumn {
    pub fn dtype(&self) -> DType {
        match self {
            LoadedColumn::Float(_) => DType::Float64,
            LoadedColumn::Int(_) => DType::Int64,
            LoadedColumn::Datetime(_) => DType::DatetimeNs,
            LoadedColumn::Bool(_) => DType::Bool,
            LoadedColumn::Categorical { .. } => DType::Categorical,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            LoadedColumn::Float(a) => (a.nrows(), a.ncols()),
            LoadedColumn::Int(a) | LoadedColumn::Datetime(a) => (a.nrows(), a.ncols()),
            LoadedColumn::Bool(a) => (a.nrows(), a.ncols()),
            LoadedColumn::Categorical { codes, .. } => (codes.nrows(), codes.ncols()),
        }
    }

    /// Unadjusted column data from a precomputed array
    pub fn from_array(array: TermArray) -> Self {
        match array {
            TermArray::Float(a) => LoadedColumn::Float(AdjustedArray::from_baseline(a)),
            TermArray::Int(a) => LoadedColumn::Int(AdjustedArray::from_baseline(a)),
            TermArray::Datetime(a) => LoadedColumn::Datetime(AdjustedArray::from_baseline(a)),
            TermArray::Bool(a) => LoadedColumn::Bool(AdjustedArray::from_baseline(a)),
            TermArray::Categorical(labels) => LoadedColumn::Categorical {
                codes: AdjustedArray::from_baseline(labels.codes().to_owned()),
                categories: labels.categories().clone(),
            },
        }
    }

    /// Point-in-time window of `length` rows ending at `end_row`
    pub fn window(&self, end_row: usize, length: usize) -> Result<TermArray> {
        Ok(match self {
            LoadedColumn::Float(a) => TermArray::Float(a.window(end_row, length)?),
            LoadedColumn::Int(a) => TermArray::Int(a.window(end_row, length)?),
            LoadedColumn::Datetime(a) => TermArray::Datetime(a.window(end_row, length)?),
            LoadedColumn::Bool(a) => TermArray::Bool(a.window(end_row, length)?),
            LoadedColumn::Categorical { codes, categories } => {
                TermArray::Categorical(LabelArray::from_codes(codes.window(end_row, length)?, categories.clone())?)
            }
        })
    }
}

/// Source of column data for the engine
pub trait PipelineLoader: Send + Sync {
    /// Load `columns` for `sessions` x `sids`. `mask` is the run's root mask
    /// over the same shape; loaders may use it to skip work.
    fn load_adjusted_array(
        &self,
        columns: &[Column],
        sessions: &[Session],
        sids: &[AssetId],
        mask: ArrayView2<'_, bool>,
    ) -> Result<HashMap<Column, LoadedColumn>>;
}

/// Index of the first session `>= date`
fn first_on_or_after(sessions: &[Session], date: Session) -> Option<usize> {
    let i = sessions.partition_point(|s| *s < date);
    (i < sessions.len()).then_some(i)
}

/// Index of the last session `<= date`
fn last_on_or_before(sessions: &[Session], date: Session) -> Option<usize> {
    sessions.partition_point(|s| *s <= date).checked_sub(1)
}

fn reindex<T: Copy>(data: &Array2<T>, rows: &[Option<usize>], cols: &[Option<usize>], missing: T) -> Array2<T> {
    Array2::from_shape_fn((rows.len(), cols.len()), |(r, c)| match (rows[r], cols[c]) {
        (Some(src_r), Some(src_c)) => data[[src_r, src_c]],
        _ => missing,
    })
}

/// Loader for one column held in memory as a (dates x sids) panel
#[derive(Debug, Clone)]
pub struct DataFrameLoader {
    column: Column,
    dates: Vec<Session>,
    sids: Vec<AssetId>,
    baseline: TermArray,
    adjustments: Vec<AdjustmentRecord>,
}

impl DataFrameLoader {
    /// `dates` must be sorted ascending; `baseline` has one row per date and one column per sid
    pub fn new(
        column: Column,
        dates: Vec<Session>,
        sids: Vec<AssetId>,
        baseline: TermArray,
        adjustments: Vec<AdjustmentRecord>,
    ) -> Result<Self> {
        if baseline.shape() != (dates.len(), sids.len()) {
            return Err(PipelineError::ShapeMismatch {
                term: column.to_string(),
                expected: (dates.len(), sids.len()),
                actual: baseline.shape(),
            });
        }
        if baseline.dtype() != column.dtype() {
            return Err(PipelineError::TypeMismatch {
                context: format!("baseline for {}", column),
                expected: column.dtype().to_string(),
                actual: baseline.dtype().to_string(),
            });
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::DataError(format!(
                "dates for {} must be strictly increasing",
                column
            )));
        }
        if !adjustments.is_empty() && column.dtype() != DType::Float64 {
            return Err(PipelineError::InvalidAdjustment {
                kind: adjustments[0].kind.to_string(),
                dtype: column.dtype().to_string(),
            });
        }
        Ok(Self {
            column,
            dates,
            sids,
            baseline,
            adjustments,
        })
    }

    /// Float column without adjustments
    pub fn from_array(column: Column, dates: Vec<Session>, sids: Vec<AssetId>, baseline: Array2<f64>) -> Result<Self> {
        Self::new(column, dates, sids, TermArray::Float(baseline), Vec::new())
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    /// Row-indexed adjustments for the requested window of sessions and assets.
    /// Records whose apply date falls outside the sessions are dropped.
    fn format_adjustments(&self, sessions: &[Session], sids: &[AssetId]) -> Result<Vec<Adjustment<f64>>> {
        let (first, last) = match (sessions.first(), sessions.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Ok(Vec::new()),
        };
        let col_of: HashMap<AssetId, usize> = sids.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        let mut out = Vec::new();
        for record in &self.adjustments {
            if record.apply_date < first || record.apply_date > last {
                continue;
            }
            let column = match col_of.get(&record.sid) {
                Some(&c) => c,
                None => continue,
            };
            let apply_row = match first_on_or_after(sessions, record.apply_date) {
                Some(r) => r,
                None => continue,
            };
            let first_row = match record.start_date {
                None => 0,
                Some(start) => match first_on_or_after(sessions, start) {
                    Some(r) => r,
                    None => continue,
                },
            };
            let last_row = match last_on_or_before(sessions, record.end_date) {
                Some(r) => r,
                None => continue,
            };
            if first_row > last_row {
                continue;
            }
            out.push(Adjustment::new(apply_row, column, first_row, last_row, record.kind, record.value)?);
        }
        Ok(out)
    }

    /// This loader's column over `sessions` x `sids`
    pub fn load(&self, sessions: &[Session], sids: &[AssetId]) -> Result<LoadedColumn> {
        let rows: Vec<Option<usize>> = sessions.iter().map(|s| self.dates.binary_search(s).ok()).collect();
        let col_of: HashMap<AssetId, usize> = self.sids.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        let cols: Vec<Option<usize>> = sids.iter().map(|s| col_of.get(s).copied()).collect();
        let missing = self.column.missing_value();

        Ok(match &self.baseline {
            TermArray::Float(a) => {
                let baseline = reindex(a, &rows, &cols, missing.as_f64().unwrap_or(f64::NAN));
                LoadedColumn::Float(AdjustedArray::new(baseline, self.format_adjustments(sessions, sids)?))
            }
            TermArray::Int(a) => {
                LoadedColumn::Int(AdjustedArray::from_baseline(reindex(a, &rows, &cols, missing.as_i64().unwrap_or(-1))))
            }
            TermArray::Datetime(a) => {
                LoadedColumn::Datetime(AdjustedArray::from_baseline(reindex(a, &rows, &cols, missing.as_i64().unwrap_or(NAT))))
            }
            TermArray::Bool(a) => LoadedColumn::Bool(AdjustedArray::from_baseline(reindex(
                a,
                &rows,
                &cols,
                missing.as_bool().unwrap_or(false),
            ))),
            TermArray::Categorical(labels) => {
                let codes = reindex(&labels.codes().to_owned(), &rows, &cols, MISSING_CODE);
                LoadedColumn::Categorical {
                    codes: AdjustedArray::from_baseline(codes),
                    categories: labels.categories().clone(),
                }
            }
        })
    }
}

impl PipelineLoader for DataFrameLoader {
    fn load_adjusted_array(
        &self,
        columns: &[Column],
        sessions: &[Session],
        sids: &[AssetId],
        _mask: ArrayView2<'_, bool>,
    ) -> Result<HashMap<Column, LoadedColumn>> {
        let mut out = HashMap::new();
        for column in columns {
            if column != &self.column {
                return Err(PipelineError::NoLoader(column.to_string()));
            }
            out.insert(column.clone(), self.load(sessions, sids)?);
        }
        Ok(out)
    }
}

/// OHLCV loader applying corporate-action adjustments
///
/// Price columns receive split, merger and dividend adjustments; volume
/// receives the inverse split adjustment.
#[derive(Debug, Clone)]
pub struct EquityPricingLoader {
    loaders: HashMap<String, DataFrameLoader>,
}

impl EquityPricingLoader {
    /// `panels` maps column names (`open`, `high`, `low`, `close`, `volume`) to (dates x sids) arrays
    pub fn new(
        dates: Vec<Session>,
        sids: Vec<AssetId>,
        panels: HashMap<String, Array2<f64>>,
        actions: &AdjustmentReader,
    ) -> Result<Self> {
        let price_adjustments = actions.adjustment_records(AdjustedField::Price);
        let volume_adjustments = actions.adjustment_records(AdjustedField::Volume);
        let mut loaders = HashMap::new();
        for column in EquityPricing::columns() {
            let panel = match panels.get(column.name()) {
                Some(p) => p.clone(),
                None => continue,
            };
            let adjustments = if column.name() == "volume" {
                volume_adjustments.clone()
            } else {
                price_adjustments.clone()
            };
            let name = column.name().to_string();
            let loader = DataFrameLoader::new(
                column,
                dates.clone(),
                sids.clone(),
                TermArray::Float(panel),
                adjustments,
            )?;
            loaders.insert(name, loader);
        }
        Ok(Self { loaders })
    }
}

impl PipelineLoader for EquityPricingLoader {
    fn load_adjusted_array(
        &self,
        columns: &[Column],
        sessions: &[Session],
        sids: &[AssetId],
        _mask: ArrayView2<'_, bool>,
    ) -> Result<HashMap<Column, LoadedColumn>> {
        let mut out = HashMap::new();
        for column in columns {
            let loader = self
                .loaders
                .get(column.name())
                .filter(|l| l.column() == column)
                .ok_or_else(|| PipelineError::NoLoader(column.to_string()))?;
            out.insert(column.clone(), loader.load(sessions, sids)?);
        }
        Ok(out)
    }
}

/// Routes each column to the loader registered for it, falling back to its dataset's loader
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    by_column: HashMap<Column, Arc<dyn PipelineLoader>>,
    by_dataset: HashMap<String, Arc<dyn PipelineLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_column(&mut self, column: &Column, loader: Arc<dyn PipelineLoader>) {
        self.by_column.insert(column.clone(), loader);
    }

    pub fn register_dataset(&mut self, dataset: &str, loader: Arc<dyn PipelineLoader>) {
        self.by_dataset.insert(dataset.to_string(), loader);
    }

    /// Register a [`DataFrameLoader`] under its own column
    pub fn with_frame(mut self, loader: DataFrameLoader) -> Self {
        let column = loader.column().clone();
        self.register_column(&column, Arc::new(loader));
        self
    }

    pub fn loader_for(&self, column: &Column) -> Result<Arc<dyn PipelineLoader>> {
        self.by_column
            .get(column)
            .or_else(|| self.by_dataset.get(column.dataset()))
            .cloned()
            .ok_or_else(|| PipelineError::NoLoader(column.to_string()))
    }

    /// Load every column, batching columns that share a loader
    pub fn load(
        &self,
        columns: &[Column],
        sessions: &[Session],
        sids: &[AssetId],
        mask: ArrayView2<'_, bool>,
    ) -> Result<HashMap<Column, LoadedColumn>> {
        let mut groups: Vec<(Arc<dyn PipelineLoader>, Vec<Column>)> = Vec::new();
        for column in columns {
            let loader = self.loader_for(column)?;
            match groups.iter_mut().find(|(l, _)| Arc::ptr_eq(l, &loader)) {
                Some((_, cols)) => cols.push(column.clone()),
                None => groups.push((loader, vec![column.clone()])),
            }
        }
        let mut out = HashMap::new();
        for (loader, cols) in groups {
            log::debug!("loading {} columns over {} sessions", cols.len(), sessions.len());
            let loaded = loader.load_adjusted_array(&cols, sessions, sids, mask)?;
            for column in cols {
                let data = loaded
                    .get(&column)
                    .cloned()
                    .ok_or_else(|| PipelineError::NoLoader(column.to_string()))?;
                if data.shape() != (sessions.len(), sids.len()) {
                    return Err(PipelineError::ShapeMismatch {
                        term: column.to_string(),
                        expected: (sessions.len(), sids.len()),
                        actual: data.shape(),
                    });
                }
                if data.dtype() != column.dtype() {
                    return Err(PipelineError::TypeMismatch {
                        context: format!("loaded data for {}", column),
                        expected: column.dtype().to_string(),
                        actual: data.dtype().to_string(),
                    });
                }
                out.insert(column, data);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::adjustments::{AdjustmentKind, CorporateAction, CorporateActionRecord};
    use chrono::NaiveDate;
    use ndarray::array;

    fn d(day: u32) -> Session {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn dates() -> Vec<Session> {
        vec![d(2), d(3), d(4), d(5), d(8)]
    }

    fn closes() -> Array2<f64> {
        array![[10.0, 100.0], [11.0, 101.0], [12.0, 102.0], [6.5, 103.0], [7.0, 104.0]]
    }

    fn no_mask(shape: (usize, usize)) -> Array2<bool> {
        Array2::from_elem(shape, true)
    }

    #[test]
    fn test_reindexes_sessions_and_sids() {
        let loader = DataFrameLoader::from_array(EquityPricing::close(), dates(), vec![1, 2], closes()).unwrap();
        let sessions = vec![d(3), d(4), d(6)];
        let loaded = loader.load(&sessions, &[2, 9]).unwrap();
        let w = loaded.window(2, 3).unwrap();
        let w = w.as_float().unwrap();
        assert_eq!(w[[0, 0]], 101.0);
        assert_eq!(w[[1, 0]], 102.0);
        assert!(w[[2, 0]].is_nan());
        assert!(w.column(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_split_visible_only_once_applied() {
        let split = CorporateActionRecord::new(1, d(5), CorporateAction::Split { ratio: 2.0 });
        let record = split.to_adjustment_record(AdjustedField::Price).unwrap();
        let loader = DataFrameLoader::new(
            EquityPricing::close(),
            dates(),
            vec![1, 2],
            TermArray::Float(closes()),
            vec![record],
        )
        .unwrap();
        let loaded = loader.load(&dates(), &[1, 2]).unwrap();

        // window ending the day before the split sees raw prices
        let before = loaded.window(2, 1).unwrap();
        assert_eq!(before.as_float().unwrap()[[0, 0]], 12.0);

        // window ending after the split sees halved history
        let after = loaded.window(4, 3).unwrap();
        assert_eq!(after.as_float().unwrap().column(0).to_vec(), vec![6.0, 6.5, 7.0]);
        assert_eq!(after.as_float().unwrap()[[0, 1]], 102.0);
    }

    #[test]
    fn test_adjustments_outside_sessions_are_dropped() {
        let record = AdjustmentRecord {
            sid: 1,
            start_date: None,
            end_date: d(4),
            apply_date: d(5),
            value: 0.5,
            kind: AdjustmentKind::Multiply,
        };
        let loader =
            DataFrameLoader::new(EquityPricing::close(), dates(), vec![1], TermArray::Float(closes().slice(ndarray::s![.., 0..1]).to_owned()), vec![record])
                .unwrap();
        let early = loader.format_adjustments(&dates()[..3], &[1]).unwrap();
        assert!(early.is_empty());
        let all = loader.format_adjustments(&dates(), &[1]).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!((all[0].apply_row, all[0].first_row, all[0].last_row), (3, 0, 2));
    }

    #[test]
    fn test_registry_routes_and_reports_missing() {
        let close = EquityPricing::close();
        let registry = LoaderRegistry::new()
            .with_frame(DataFrameLoader::from_array(close.clone(), dates(), vec![1, 2], closes()).unwrap());
        let sessions = dates();
        let mask = no_mask((sessions.len(), 2));
        let loaded = registry.load(&[close.clone()], &sessions, &[1, 2], mask.view()).unwrap();
        assert_eq!(loaded[&close].shape(), (5, 2));
        assert!(matches!(
            registry.load(&[EquityPricing::open()], &sessions, &[1, 2], mask.view()),
            Err(PipelineError::NoLoader(_))
        ));
    }

    #[test]
    fn test_equity_pricing_loader_adjusts_volume_inversely() {
        let mut actions = AdjustmentReader::new();
        actions
            .add(CorporateActionRecord::new(1, d(5), CorporateAction::Split { ratio: 2.0 }))
            .unwrap();
        let mut panels = HashMap::new();
        panels.insert("close".to_string(), closes());
        panels.insert("volume".to_string(), Array2::from_elem((5, 2), 1000.0));
        let loader = EquityPricingLoader::new(dates(), vec![1, 2], panels, &actions).unwrap();
        let sessions = dates();
        let mask = no_mask((5, 2));
        let loaded = loader
            .load_adjusted_array(&[EquityPricing::volume()], &sessions, &[1, 2], mask.view())
            .unwrap();
        let w = loaded[&EquityPricing::volume()].window(4, 5).unwrap();
        assert_eq!(w.as_float().unwrap()[[0, 0]], 2000.0);
        assert_eq!(w.as_float().unwrap()[[4, 0]], 1000.0);
    }

    #[test]
    fn test_adjustments_rejected_for_non_float_columns() {
        let flags = Column::new("DS", "flag", DType::Bool);
        let record = AdjustmentRecord {
            sid: 1,
            start_date: None,
            end_date: d(4),
            apply_date: d(5),
            value: 1.0,
            kind: AdjustmentKind::Overwrite,
        };
        let err = DataFrameLoader::new(
            flags,
            dates(),
            vec![1],
            TermArray::Bool(Array2::from_elem((5, 1), true)),
            vec![record],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidAdjustment { .. }));
    }
}
