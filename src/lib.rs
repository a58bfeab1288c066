//! # rusty_pipeline
//!
//! Point-in-time factor pipelines over panels of per-asset data.
//!
//! Terms (factors, filters and classifiers) form a dependency graph. The
//! engine evaluates that graph over a range of trading sessions, reading
//! adjusted rolling windows so that every row only sees corporate actions
//! known by its session, and returns a (session, asset) indexed frame.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rusty_pipeline::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> rusty_pipeline::error::Result<()> {
//! let close = EquityPricing::close();
//! let sma = Factor::simple_moving_average(&close, 10)?;
//! let mut pipeline = Pipeline::new();
//! pipeline.add(sma.zscore(None, None)?, "sma_z", false)?;
//! pipeline.set_screen(close.latest_factor()?.gt(5.0)?, false)?;
//!
//! # let (dates, sids, closes): (Vec<Session>, Vec<AssetId>, ndarray::Array2<f64>) = unimplemented!();
//! let loaders = LoaderRegistry::new().with_frame(DataFrameLoader::from_array(close, dates, sids, closes)?);
//! let engine = SimplePipelineEngine::new(
//!     Arc::new(NYSECalendar::new()),
//!     Arc::new(EquityUniverse::us(Vec::new())),
//!     loaders,
//! );
//! # let (start, end): (Session, Session) = unimplemented!();
//! let frame = engine.run_pipeline(&pipeline, start, end)?;
//! println!("{} rows", frame.len());
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
pub mod calendar;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod types;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::algorithm::{PipelineScheduler, SimulationContext};
    pub use crate::calendar::{NYSECalendar, TradingCalendar, WeekdayCalendar};
    pub use crate::config::{ChunkSpec, EngineConfig};
    pub use crate::data::{AdjustmentReader, CorporateAction, DataFrequency};
    pub use crate::error::{PipelineError, Result};
    pub use crate::pipeline::{
        Classifier, Column, CustomClassifier, CustomFactor, CustomFilter, DType, DataFrameLoader, EquityPricing,
        EquityUniverse, Factor, Filter, LoaderRegistry, PeriodicSource, Pipeline, PipelineFrame, RankMethod, Scalar,
        SimplePipelineEngine,
    };
    pub use crate::types::*;
}
