//! Error types for the pipeline engine

use thiserror::Error;

/// Main error type for pipeline construction and evaluation
#[derive(Error, Debug)]
pub enum PipelineError {
    // ========== Graph-build errors ==========
    #[error("Unknown rank method: '{0}'. Expected one of: ordinal, average, min, max, dense")]
    UnknownRankMethod(String),

    #[error(
        "{method}() expected a value between 0.0 and {upper} for min_percentile and max_percentile \
         with min_percentile < max_percentile, but got min_percentile={min}, max_percentile={max}"
    )]
    BadPercentileBounds {
        method: String,
        min: f64,
        max: f64,
        upper: f64,
    },

    #[error(
        "window_length must be greater than exclude_window_length \
         (window_length={window_length}, exclude_window_length={exclude_window_length})"
    )]
    WindowLengthNotGreaterThanExclude {
        window_length: usize,
        exclude_window_length: usize,
    },

    #[error("{term} expected {expected} inputs but got {actual}")]
    WrongNumberOfInputs {
        term: String,
        expected: usize,
        actual: usize,
    },

    #[error(
        "{method}() is only defined on Factors of dtype float64, \
         but it was called on a Factor of dtype {dtype}."
    )]
    UnsupportedDType { method: String, dtype: String },

    #[error("Invalid window_length for {term}: {reason}")]
    InvalidWindowLength { term: String, reason: String },

    #[error("Term {child} is not window safe and cannot be used as an input to windowed term {parent}")]
    NonWindowSafeInput { parent: String, child: String },

    #[error("Invalid fill value for {term} of dtype {dtype}: {value}")]
    InvalidFillValue {
        term: String,
        dtype: String,
        value: String,
    },

    #[error("Type mismatch in {context}: expected {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("{term} has no output named '{name}'. Available outputs: {available:?}")]
    NoSuchOutput {
        term: String,
        name: String,
        available: Vec<String>,
    },

    #[error("Multi-output term {0} cannot be used directly; select one of its outputs")]
    MultiOutputTermUsedDirectly(String),

    #[error("Column '{0}' already exists in pipeline; pass overwrite=true to replace it")]
    DuplicateColumn(String),

    #[error("Pipeline already has a screen; pass overwrite=true to replace it")]
    ScreenAlreadySet,

    #[error("Invalid number of bins for {method}(): {bins}")]
    InvalidBins { method: String, bins: usize },

    #[error("Invalid input for {term}: {reason}")]
    InvalidInput { term: String, reason: String },

    #[error("{0}")]
    InvalidPeriodicInput(String),

    // ========== Lifecycle errors ==========
    #[error("Attempted to attach a pipeline after initialize()")]
    AttachPipelineAfterInitialize,

    #[error("Attempted to call pipeline_output() during initialize()")]
    PipelineOutputDuringInitialize,

    #[error("No pipeline named '{name}' exists. Valid pipeline names are {valid:?}")]
    NoSuchPipeline { name: String, valid: Vec<String> },

    #[error("Pipeline named '{0}' already exists")]
    DuplicatePipelineName(String),

    // ========== Compute-time errors ==========
    #[error("Adjustment targets column {column} but the array has only {ncols} columns")]
    InconsistentAdjustment { column: usize, ncols: usize },

    #[error("{kind} adjustments are not supported for arrays of dtype {dtype}")]
    InvalidAdjustment { kind: String, dtype: String },

    #[error("No value supplied for term {0}")]
    MissingTermValue(String),

    #[error("No pipeline loader registered for column {0}")]
    NoLoader(String),

    #[error("Shape mismatch for {term}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        term: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Calendar error: {0}")]
    CalendarError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("DataFrame error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
