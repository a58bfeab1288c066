//! Pipeline execution engine
//!
//! Runs a [`Pipeline`] over a session range: builds the term graph, loads
//! the columns it reads with enough lookback for every window, evaluates
//! the graph once and assembles the screened (session, asset) table.
//!
//! The row computed for session `s` sees loader data through the session
//! before `s`, so nothing in a row can depend on that session's own close.

use crate::calendar::TradingCalendar;
use crate::config::{ChunkSpec, EngineConfig};
use crate::error::{PipelineError, Result};
use crate::pipeline::array::TermArray;
use crate::pipeline::compute::Evaluator;
use crate::pipeline::dataset::Column;
use crate::pipeline::definition::Pipeline;
use crate::pipeline::domain::Domain;
use crate::pipeline::graph::TermGraph;
use crate::pipeline::loader::{LoadedColumn, LoaderRegistry};
use crate::pipeline::output::{ColumnData, PipelineFrame};
use crate::pipeline::term::{Term, TermRole};
use crate::types::{AssetId, Session};
use hashbrown::HashMap;
use ndarray::ArrayView2;
use std::sync::Arc;

/// Computes pipelines against one calendar, asset domain and set of loaders
#[derive(Clone)]
pub struct SimplePipelineEngine {
    calendar: Arc<dyn TradingCalendar>,
    domain: Arc<dyn Domain>,
    loaders: LoaderRegistry,
}

impl SimplePipelineEngine {
    pub fn new(calendar: Arc<dyn TradingCalendar>, domain: Arc<dyn Domain>, loaders: LoaderRegistry) -> Self {
        Self {
            calendar,
            domain,
            loaders,
        }
    }

    pub fn calendar(&self) -> &Arc<dyn TradingCalendar> {
        &self.calendar
    }

    pub fn domain(&self) -> &Arc<dyn Domain> {
        &self.domain
    }

    /// Compute `pipeline` for every session in `[start, end]`
    pub fn run_pipeline(&self, pipeline: &Pipeline, start: Session, end: Session) -> Result<PipelineFrame> {
        let output_sessions = self.calendar.trading_days_between(start, end);
        let Some(&first) = output_sessions.first() else {
            log::debug!("no sessions between {} and {}; returning empty frame", start, end);
            return Ok(empty_frame(pipeline));
        };

        let graph = TermGraph::new(&pipeline.terms())?;
        let max_extra = graph.max_extra_rows();
        let n_out = output_sessions.len();

        // One extra leading session: data row i feeds computed row i + 1
        let mut all = self.calendar.sessions_before(first, max_extra + 1)?;
        all.extend(output_sessions);
        let computed = &all[1..];
        let data_sessions = &all[..all.len() - 1];

        let (sids, root_mask) = self.domain.lifetimes_mask(computed);
        let columns: Vec<Column> = graph
            .terms()
            .filter_map(|(_, term)| Column::from_term(term.clone()))
            .collect();
        let loaded = self.loaders.load(&columns, data_sessions, &sids, root_mask.view())?;

        let no_initial = HashMap::new();
        let results = Evaluator::new(&graph, computed, &sids, root_mask.view(), &loaded, &no_initial)?.run()?;

        let screen = match pipeline.screen() {
            Some(_) => Some(results[pipeline.len()].as_bool()?),
            None => None,
        };
        let mut index = Vec::new();
        let mut cells = Vec::new();
        for r in 0..n_out {
            let session = computed[max_extra + r];
            for (c, &sid) in sids.iter().enumerate() {
                let alive = root_mask[[max_extra + r, c]];
                let passes = screen.map_or(true, |s| s[[r, c]]);
                if alive && passes {
                    index.push((session, sid));
                    cells.push((r, c));
                }
            }
        }

        let columns = pipeline
            .columns()
            .iter()
            .zip(&results)
            .map(|((name, _), array)| (name.clone(), ColumnData::gather(array, &cells)))
            .collect();
        let frame = PipelineFrame::new(index, columns)?;
        log::info!(
            "computed pipeline for {} to {}: {} sessions, {} assets, {} rows",
            computed[max_extra],
            computed[computed.len() - 1],
            n_out,
            sids.len(),
            frame.len()
        );
        Ok(frame)
    }

    /// Compute `pipeline` over `[start, end]` in consecutive chunks of sessions.
    /// The result is identical to a single [`run_pipeline`](Self::run_pipeline) call.
    pub fn run_chunked_pipeline(
        &self,
        pipeline: &Pipeline,
        start: Session,
        end: Session,
        chunks: &ChunkSpec,
        config: &EngineConfig,
    ) -> Result<PipelineFrame> {
        let sessions = self.calendar.trading_days_between(start, end);
        let mut frame = empty_frame(pipeline);
        let mut lengths = chunks.lengths(config);
        let mut pos = 0;
        while pos < sessions.len() {
            let len = lengths.next().unwrap_or(1).max(1);
            let stop = (pos + len).min(sessions.len());
            let chunk = self.run_pipeline(pipeline, sessions[pos], sessions[stop - 1])?;
            frame.append(&chunk)?;
            pos = stop;
        }
        Ok(frame)
    }

    /// Evaluate `terms` directly over `sessions` x `sids`.
    ///
    /// `initial` supplies precomputed arrays over the full `sessions` axis:
    /// every column the terms read, every `External` term, and optionally any
    /// other term to skip its computation. Results cover the rows left after
    /// the graph's lookback, so the first `max_extra_rows` sessions only feed windows.
    pub fn evaluate_terms(
        terms: &[Term],
        initial: &HashMap<Term, TermArray>,
        root_mask: ArrayView2<'_, bool>,
        sessions: &[Session],
        sids: &[AssetId],
    ) -> Result<Vec<TermArray>> {
        if let Some(column) = terms.iter().find(|t| t.role() == TermRole::Column) {
            return Err(PipelineError::InvalidInput {
                term: column.to_string(),
                reason: "columns are inputs, not outputs; request a window such as .latest()".to_string(),
            });
        }
        let graph = TermGraph::new(terms)?;
        let expected = (sessions.len(), sids.len());
        let mut columns = HashMap::new();
        for (term, array) in initial {
            if let Some(column) = Column::from_term(term.clone()) {
                if array.shape() != expected {
                    return Err(PipelineError::ShapeMismatch {
                        term: term.to_string(),
                        expected,
                        actual: array.shape(),
                    });
                }
                columns.insert(column, LoadedColumn::from_array(array.clone()));
            }
        }
        Evaluator::new(&graph, sessions, sids, root_mask.view(), &columns, initial)?.run()
    }
}

impl std::fmt::Debug for SimplePipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimplePipelineEngine")
            .field("domain", &self.domain.name())
            .finish()
    }
}

fn empty_frame(pipeline: &Pipeline) -> PipelineFrame {
    PipelineFrame::empty(pipeline.columns().iter().map(|(name, term)| (name.as_str(), term.dtype())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::WeekdayCalendar;
    use crate::pipeline::dataset::EquityPricing;
    use crate::pipeline::domain::{AssetLifetime, EquityUniverse};
    use crate::pipeline::dtype::DType;
    use crate::pipeline::factors::Factor;
    use crate::pipeline::loader::DataFrameLoader;
    use crate::pipeline::rank::RankMethod;
    use crate::pipeline::term::ArithOp;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::{array, Array2};

    fn d(day: u32) -> Session {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    /// Weekdays of January 2024 from the 1st to the 12th
    fn sessions() -> Vec<Session> {
        vec![d(1), d(2), d(3), d(4), d(5), d(8), d(9), d(10), d(11), d(12)]
    }

    fn engine() -> SimplePipelineEngine {
        let closes = Array2::from_shape_fn((10, 2), |(r, c)| (r + 1) as f64 * if c == 0 { 1.0 } else { 10.0 });
        let loader = DataFrameLoader::from_array(EquityPricing::close(), sessions(), vec![1, 2], closes).unwrap();
        let universe = EquityUniverse::us(vec![
            AssetLifetime::new(1, d(1), d(31)),
            AssetLifetime::new(2, d(8), d(31)),
        ]);
        SimplePipelineEngine::new(
            Arc::new(WeekdayCalendar),
            Arc::new(universe),
            LoaderRegistry::new().with_frame(loader),
        )
    }

    #[test]
    fn test_latest_sees_previous_session() {
        let close = EquityPricing::close().latest_factor().unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(&close, "close", false).unwrap();

        let frame = engine().run_pipeline(&pipeline, d(4), d(10)).unwrap();
        // Row for Jan 4 holds Jan 3's close (the third session)
        assert_eq!(frame.get_f64("close", d(4), 1), Some(3.0));
        assert_eq!(frame.get_f64("close", d(10), 1), Some(7.0));
        // Asset 2 starts on Jan 8, so its first row is Jan 9
        assert!(frame.get("close", d(8), 2).is_none());
        assert_eq!(frame.get_f64("close", d(9), 2), Some(60.0));
        assert_eq!(frame.sessions(), vec![d(4), d(5), d(8), d(9), d(10)]);
    }

    #[test]
    fn test_screen_omits_rows() {
        let close = EquityPricing::close().latest_factor().unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(&close, "close", false).unwrap();
        pipeline.set_screen(close.gt(50.0).unwrap(), false).unwrap();

        let frame = engine().run_pipeline(&pipeline, d(2), d(12)).unwrap();
        assert!(frame.index().iter().all(|&(_, sid)| sid == 2));
        assert_eq!(frame.sessions(), vec![d(9), d(10), d(11), d(12)]);
    }

    #[test]
    fn test_windowed_factor_uses_lookback() {
        let sma = Factor::simple_moving_average(&EquityPricing::close(), 3).unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(&sma, "sma", false).unwrap();

        let frame = engine().run_pipeline(&pipeline, d(8), d(8)).unwrap();
        // Closes of Jan 3, 4 and 5
        assert_relative_eq!(frame.get_f64("sma", d(8), 1).unwrap(), 4.0);
    }

    #[test]
    fn test_chunked_matches_single_pass() {
        let close = EquityPricing::close().latest_factor().unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(&close, "close", false).unwrap();
        pipeline.add(close.rank(RankMethod::Ordinal, true, None, None).unwrap(), "rank", false).unwrap();

        let engine = engine();
        let config = EngineConfig::default();
        let whole = engine.run_pipeline(&pipeline, d(3), d(12)).unwrap();
        for chunks in [ChunkSpec::Fixed(1), ChunkSpec::Fixed(3), ChunkSpec::Default] {
            let chunked = engine.run_chunked_pipeline(&pipeline, d(3), d(12), &chunks, &config).unwrap();
            assert_eq!(chunked, whole);
        }
    }

    #[test]
    fn test_empty_range_keeps_columns() {
        let close = EquityPricing::close().latest_factor().unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.add(&close, "close", false).unwrap();
        let frame = engine().run_pipeline(&pipeline, d(6), d(7)).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.column("close").map(ColumnData::dtype), Some(DType::Float64));
    }

    #[test]
    fn test_evaluate_terms_with_external_inputs() {
        let f = Factor::external("f", DType::Float64, None, true).unwrap();
        let doubled = f.arithmetic(ArithOp::Mul, 2.0).unwrap();
        let mut initial = HashMap::new();
        initial.insert(Term::from(&f), TermArray::Float(array![[1.0, 2.0], [3.0, f64::NAN]]));
        let mask = array![[true, true], [true, false]];
        let out = SimplePipelineEngine::evaluate_terms(
            &[Term::from(&doubled)],
            &initial,
            mask.view(),
            &[d(2), d(3)],
            &[1, 2],
        )
        .unwrap();
        let values = out[0].as_float().unwrap();
        assert_eq!(values[[0, 1]], 4.0);
        assert_eq!(values[[1, 0]], 6.0);
        assert!(values[[1, 1]].is_nan());
    }

    #[test]
    fn test_evaluate_terms_without_value_fails() {
        let f = Factor::external("missing", DType::Float64, None, true).unwrap();
        let mask = Array2::from_elem((1, 1), true);
        let err = SimplePipelineEngine::evaluate_terms(&[Term::from(&f)], &HashMap::new(), mask.view(), &[d(2)], &[1])
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingTermValue(_)));
    }
}
