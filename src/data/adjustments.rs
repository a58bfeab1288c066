//! Adjustments for corporate actions (splits, dividends, mergers)
//!
//! Two levels live here. [`CorporateAction`] records describe what happened to an
//! asset on a date; [`AdjustmentRecord`] is the date-level instruction a loader
//! turns into row-indexed [`Adjustment`]s against a baseline panel.

use crate::error::{PipelineError, Result};
use crate::types::{AssetId, Session};
use chrono::Duration;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// Element-wise operation applied by an adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdjustmentKind {
    Multiply,
    Add,
    Overwrite,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Multiply => "MULTIPLY",
            AdjustmentKind::Add => "ADD",
            AdjustmentKind::Overwrite => "OVERWRITE",
        }
    }
}

impl fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cell types an [`Adjustment`] may target
pub trait AdjustableValue: Copy + Send + Sync + fmt::Debug + 'static {
    /// Name used in error messages
    const DTYPE: &'static str;

    /// Whether MULTIPLY and ADD are defined for this type
    const ARITHMETIC: bool = false;

    fn multiply(self, _by: Self) -> Self {
        self
    }

    fn add(self, _other: Self) -> Self {
        self
    }

    /// Total order used to make adjustment application order canonical
    fn total_cmp(&self, other: &Self) -> Ordering;
}

impl AdjustableValue for f64 {
    const DTYPE: &'static str = "float64";
    const ARITHMETIC: bool = true;

    fn multiply(self, by: Self) -> Self {
        self * by
    }

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn total_cmp(&self, other: &Self) -> Ordering {
        f64::total_cmp(self, other)
    }
}

impl AdjustableValue for i64 {
    const DTYPE: &'static str = "int64";

    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl AdjustableValue for i32 {
    const DTYPE: &'static str = "category";

    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl AdjustableValue for bool {
    const DTYPE: &'static str = "bool";

    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

/// Row-indexed adjustment against a (sessions x assets) baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment<T> {
    /// Row on which the adjustment becomes known
    pub apply_row: usize,
    /// Asset column affected
    pub column: usize,
    /// First affected row (inclusive)
    pub first_row: usize,
    /// Last affected row (inclusive)
    pub last_row: usize,
    pub kind: AdjustmentKind,
    pub value: T,
}

impl<T: AdjustableValue> Adjustment<T> {
    pub fn new(
        apply_row: usize,
        column: usize,
        first_row: usize,
        last_row: usize,
        kind: AdjustmentKind,
        value: T,
    ) -> Result<Self> {
        if kind != AdjustmentKind::Overwrite && !T::ARITHMETIC {
            return Err(PipelineError::InvalidAdjustment {
                kind: kind.to_string(),
                dtype: T::DTYPE.to_string(),
            });
        }
        if first_row > last_row {
            return Err(PipelineError::DataError(format!(
                "Adjustment first_row {} is after last_row {}",
                first_row, last_row
            )));
        }
        Ok(Self {
            apply_row,
            column,
            first_row,
            last_row,
            kind,
            value,
        })
    }

    /// Apply to a single cell value
    pub fn apply(&self, cell: T) -> T {
        match self.kind {
            AdjustmentKind::Multiply => cell.multiply(self.value),
            AdjustmentKind::Add => cell.add(self.value),
            AdjustmentKind::Overwrite => self.value,
        }
    }

    /// Canonical ordering: by apply row, then a total order over the remaining fields
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.apply_row
            .cmp(&other.apply_row)
            .then(self.column.cmp(&other.column))
            .then(self.first_row.cmp(&other.first_row))
            .then(self.last_row.cmp(&other.last_row))
            .then(self.kind.cmp(&other.kind))
            .then(self.value.total_cmp(&other.value))
    }
}

/// Date-level adjustment instruction for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub sid: AssetId,
    /// First affected date; `None` means from the beginning of the loaded range
    pub start_date: Option<Session>,
    /// Last affected date (inclusive)
    pub end_date: Session,
    /// Date on which the adjustment becomes known
    pub apply_date: Session,
    pub value: f64,
    pub kind: AdjustmentKind,
}

/// Which family of fields a corporate action adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjustedField {
    Price,
    Volume,
}

/// A corporate action
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CorporateAction {
    /// Stock split (e.g., 2-for-1 split has ratio 2.0)
    Split { ratio: f64 },
    /// Merger; historical prices scale by `ratio`
    Merger { ratio: f64 },
    /// Cash dividend paid against a reference (previous close) price
    Dividend { amount: f64, reference_price: f64 },
}

/// Corporate action effective on a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateActionRecord {
    pub asset_id: AssetId,
    pub effective_date: Session,
    pub action: CorporateAction,
}

impl CorporateActionRecord {
    pub fn new(asset_id: AssetId, effective_date: Session, action: CorporateAction) -> Self {
        Self {
            asset_id,
            effective_date,
            action,
        }
    }

    /// Multiplier applied to history before the effective date, if the field is affected
    pub fn ratio(&self, field: AdjustedField) -> Option<f64> {
        match (self.action, field) {
            (CorporateAction::Split { ratio }, AdjustedField::Price) => Some(1.0 / ratio),
            (CorporateAction::Split { ratio }, AdjustedField::Volume) => Some(ratio),
            (CorporateAction::Merger { ratio }, AdjustedField::Price) => Some(ratio),
            (
                CorporateAction::Dividend {
                    amount,
                    reference_price,
                },
                AdjustedField::Price,
            ) => Some(1.0 - amount / reference_price),
            _ => None,
        }
    }

    /// Backward adjustment of every row before the effective date
    pub fn to_adjustment_record(&self, field: AdjustedField) -> Option<AdjustmentRecord> {
        self.ratio(field).map(|value| AdjustmentRecord {
            sid: self.asset_id,
            start_date: None,
            end_date: self.effective_date - Duration::days(1),
            apply_date: self.effective_date,
            value,
            kind: AdjustmentKind::Multiply,
        })
    }

    fn validate(&self) -> Result<()> {
        let ok = match self.action {
            CorporateAction::Split { ratio } | CorporateAction::Merger { ratio } => {
                ratio.is_finite() && ratio > 0.0
            }
            CorporateAction::Dividend {
                amount,
                reference_price,
            } => amount.is_finite() && reference_price.is_finite() && reference_price > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(PipelineError::DataError(format!(
                "Invalid corporate action for asset {} on {}: {:?}",
                self.asset_id, self.effective_date, self.action
            )))
        }
    }
}

/// CSV row: asset_id,date,type,value1,value2
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    asset_id: AssetId,
    date: Session,
    #[serde(rename = "type")]
    kind: String,
    value1: f64,
    value2: Option<f64>,
}

/// Reader for corporate action data
#[derive(Debug, Default)]
pub struct AdjustmentReader {
    /// Actions by asset ID
    actions: HashMap<AssetId, Vec<CorporateActionRecord>>,
}

impl AdjustmentReader {
    /// Create a new empty adjustment reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a corporate action
    pub fn add(&mut self, record: CorporateActionRecord) -> Result<()> {
        record.validate()?;
        let entry = self.actions.entry(record.asset_id).or_default();
        entry.push(record);
        entry.sort_by_key(|r| r.effective_date);
        Ok(())
    }

    /// Actions for an asset effective in `[start, end]`
    pub fn actions_for(&self, asset_id: AssetId, start: Session, end: Session) -> Vec<&CorporateActionRecord> {
        self.actions
            .get(&asset_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.effective_date >= start && r.effective_date <= end)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Date-level adjustment records for a field, across all assets
    pub fn adjustment_records(&self, field: AdjustedField) -> Vec<AdjustmentRecord> {
        let mut out: Vec<AdjustmentRecord> = self
            .actions
            .values()
            .flatten()
            .filter_map(|r| r.to_adjustment_record(field))
            .collect();
        out.sort_by(|a, b| {
            a.apply_date
                .cmp(&b.apply_date)
                .then(a.sid.cmp(&b.sid))
                .then(a.value.total_cmp(&b.value))
        });
        out
    }

    /// Total action count across all assets
    pub fn len(&self) -> usize {
        self.actions.values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load corporate actions from CSV
    /// CSV format: asset_id,date,type,value1,value2
    pub fn load_from_csv(&mut self, path: &Path) -> Result<()> {
        let mut reader = csv::Reader::from_path(path)?;

        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            let action = match row.kind.as_str() {
                "split" => CorporateAction::Split { ratio: row.value1 },
                "merger" => CorporateAction::Merger { ratio: row.value1 },
                "dividend" => CorporateAction::Dividend {
                    amount: row.value1,
                    reference_price: row.value2.ok_or_else(|| {
                        PipelineError::DataError(format!(
                            "Dividend for asset {} on {} is missing its reference price",
                            row.asset_id, row.date
                        ))
                    })?,
                },
                other => {
                    log::warn!("Skipping unknown corporate action type '{}'", other);
                    continue;
                }
            };
            self.add(CorporateActionRecord::new(row.asset_id, row.date, action))?;
        }

        Ok(())
    }

    /// Write all actions to CSV, ordered by asset then date
    pub fn write_to_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut assets: Vec<&AssetId> = self.actions.keys().collect();
        assets.sort();

        for asset in assets {
            for record in &self.actions[asset] {
                let (kind, value1, value2) = match record.action {
                    CorporateAction::Split { ratio } => ("split", ratio, None),
                    CorporateAction::Merger { ratio } => ("merger", ratio, None),
                    CorporateAction::Dividend {
                        amount,
                        reference_price,
                    } => ("dividend", amount, Some(reference_price)),
                };
                writer.serialize(CsvRow {
                    asset_id: record.asset_id,
                    date: record.effective_date,
                    kind: kind.to_string(),
                    value1,
                    value2,
                })?;
            }
        }

        writer.flush()?;
        Ok(())
    }
}
