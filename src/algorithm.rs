//! Simulation-facing pipeline scheduling
//!
//! The driving simulation loop owns a [`SimulationContext`] and hands it to
//! the [`PipelineScheduler`] on every call. Pipelines are attached while the
//! context is still initializing; once the first trading day has started,
//! outputs are served per day from chunks computed ahead of time.

use crate::config::{ChunkLengths, ChunkSpec, EngineConfig};
use crate::error::{PipelineError, Result};
use crate::pipeline::definition::Pipeline;
use crate::pipeline::engine::SimplePipelineEngine;
use crate::pipeline::graph::TermGraph;
use crate::pipeline::output::PipelineFrame;
use crate::types::Session;
use hashbrown::HashMap;

/// Simulation state shared with the scheduler
#[derive(Debug, Clone, Default)]
pub struct SimulationContext {
    /// Day currently being simulated; `None` while initializing
    current_session: Option<Session>,
}

impl SimulationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start simulating `session`. The first call ends initialization.
    pub fn before_trading_start(&mut self, session: Session) {
        self.current_session = Some(session);
    }

    pub fn is_initialized(&self) -> bool {
        self.current_session.is_some()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.current_session
    }
}

/// Most recently computed chunk of one pipeline
#[derive(Debug, Clone)]
struct ComputedChunk {
    start: Session,
    end: Session,
    frame: PipelineFrame,
}

#[derive(Debug, Clone)]
struct AttachedPipeline {
    pipeline: Pipeline,
    chunks: ChunkLengths,
    cached: Option<ComputedChunk>,
}

/// Attach/output lifecycle for named pipelines over one simulation
#[derive(Debug)]
pub struct PipelineScheduler {
    engine: SimplePipelineEngine,
    config: EngineConfig,
    /// Last simulated day
    sim_end: Session,
    pipelines: HashMap<String, AttachedPipeline>,
}

impl PipelineScheduler {
    pub fn new(engine: SimplePipelineEngine, config: EngineConfig, sim_end: Session) -> Self {
        Self {
            engine,
            config,
            sim_end,
            pipelines: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Attached pipeline names, sorted
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Attach a pipeline under `name`
    ///
    /// The pipeline's term graph is built immediately, so structural errors
    /// surface here rather than on the first output.
    ///
    /// # Errors
    /// * `AttachPipelineAfterInitialize` - If the simulation has started
    /// * `DuplicatePipelineName` - If a pipeline with this name already exists
    pub fn attach_pipeline(
        &mut self,
        ctx: &SimulationContext,
        pipeline: Pipeline,
        name: &str,
        chunks: Option<ChunkSpec>,
    ) -> Result<&Pipeline> {
        if ctx.is_initialized() {
            return Err(PipelineError::AttachPipelineAfterInitialize);
        }
        if self.pipelines.contains_key(name) {
            return Err(PipelineError::DuplicatePipelineName(name.to_string()));
        }
        TermGraph::new(&pipeline.terms())?;

        let chunks = chunks.unwrap_or_default();
        log::info!("attached pipeline '{}' ({} columns, chunks {:?})", name, pipeline.len(), chunks);
        let attached = self.pipelines.entry(name.to_string()).or_insert(AttachedPipeline {
            chunks: chunks.lengths(&self.config),
            pipeline,
            cached: None,
        });
        Ok(&attached.pipeline)
    }

    /// Output of pipeline `name` for the day being simulated
    ///
    /// In daily mode the row for the session after the current day is served,
    /// so data through the current day's close is visible. In minute mode the
    /// current session's row is served, which sees the previous day's bars.
    ///
    /// # Errors
    /// * `PipelineOutputDuringInitialize` - If no trading day has started
    /// * `NoSuchPipeline` - If no pipeline with this name is attached
    pub fn pipeline_output(&mut self, ctx: &SimulationContext, name: &str) -> Result<PipelineFrame> {
        let current = ctx
            .current_session()
            .ok_or(PipelineError::PipelineOutputDuringInitialize)?;
        let valid = self.pipeline_names();
        let attached = self
            .pipelines
            .get_mut(name)
            .ok_or_else(|| PipelineError::NoSuchPipeline {
                name: name.to_string(),
                valid,
            })?;

        let calendar = self.engine.calendar().clone();
        let offset = self.config.data_frequency.session_offset();
        let target = calendar.session_offset(current, offset)?;
        let last = calendar.session_offset(self.sim_end, offset)?;

        if let Some(chunk) = &attached.cached {
            if chunk.start <= target && target <= chunk.end {
                return Ok(chunk.frame.xs(target));
            }
        }

        let mut chunks = attached.chunks.clone();
        let len = chunks.next().unwrap_or(1).max(1);
        let end = calendar.session_offset(target, len - 1)?.min(last).max(target);
        let frame = self.engine.run_pipeline(&attached.pipeline, target, end)?;
        log::info!(
            "computed chunk for pipeline '{}': {} to {} ({} rows)",
            name,
            target,
            end,
            frame.len()
        );

        let out = frame.xs(target);
        attached.chunks = chunks;
        attached.cached = Some(ComputedChunk {
            start: target,
            end,
            frame,
        });
        Ok(out)
    }
}
