//! Raw panel containers and corporate-action adjustments

pub mod adjusted_array;
pub mod adjustments;
pub mod frequency;
pub mod label_array;

pub use adjusted_array::AdjustedArray;
pub use adjustments::{
    AdjustableValue, AdjustedField, Adjustment, AdjustmentKind, AdjustmentReader, AdjustmentRecord, CorporateAction,
    CorporateActionRecord,
};
pub use frequency::DataFrequency;
pub use label_array::LabelArray;
