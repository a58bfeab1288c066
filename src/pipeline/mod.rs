//! Pipeline system for factor-based strategy development

pub mod array;
pub mod classifiers;
pub(crate) mod compute;
pub mod dataset;
pub mod definition;
pub mod domain;
pub mod dtype;
pub mod engine;
pub mod factors;
pub mod filters; // Asset screening
pub mod graph;
pub mod loader;
pub mod normalize;
pub mod output;
pub mod periodic;
pub mod quantiles;
pub mod rank;
pub mod summary;
pub mod term;

pub use array::TermArray;
pub use classifiers::{Classifier, CustomClassifier};
pub use dataset::{Column, EquityPricing, PeriodCoords};
pub use definition::Pipeline;
pub use domain::{AssetLifetime, Domain, EquityUniverse};
pub use dtype::{DType, Scalar};
pub use engine::SimplePipelineEngine;
pub use factors::{CustomFactor, Factor};
pub use filters::{CustomFilter, Filter};
pub use graph::TermGraph;
pub use loader::{DataFrameLoader, EquityPricingLoader, LoadedColumn, LoaderRegistry, PipelineLoader};
pub use normalize::NormalizeOp;
pub use output::{ColumnData, PipelineFrame};
pub use periodic::PeriodicSource;
pub use rank::RankMethod;
pub use summary::SummaryFunc;
pub use term::Term;
