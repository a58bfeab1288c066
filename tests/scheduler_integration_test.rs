//! Simulation loop driving the pipeline scheduler over NYSE sessions

use chrono::NaiveDate;
use ndarray::Array2;
use rusty_pipeline::algorithm::{PipelineScheduler, SimulationContext};
use rusty_pipeline::calendar::{NYSECalendar, TradingCalendar};
use rusty_pipeline::config::{ChunkSpec, EngineConfig};
use rusty_pipeline::error::PipelineError;
use rusty_pipeline::pipeline::{
    AssetLifetime, DataFrameLoader, EquityPricing, EquityUniverse, Factor, LoaderRegistry, Pipeline, RankMethod,
    SimplePipelineEngine,
};
use rusty_pipeline::types::Session;
use std::sync::Arc;

fn d(month: u32, day: u32) -> Session {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

struct Fixture {
    calendar: Arc<NYSECalendar>,
    sessions: Vec<Session>,
    engine: SimplePipelineEngine,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let calendar = Arc::new(NYSECalendar::new());
    let sessions = calendar.trading_days_between(d(1, 2), d(2, 29));
    let closes = Array2::from_shape_fn((sessions.len(), 3), |(r, c)| {
        let base = [100.0, 50.0, 20.0][c];
        base + ((r * (c + 3)) % 7) as f64 - r as f64 * 0.1 * c as f64
    });
    let loader = DataFrameLoader::from_array(EquityPricing::close(), sessions.clone(), vec![10, 20, 30], closes).unwrap();
    let universe = EquityUniverse::us(vec![
        AssetLifetime::new(10, d(1, 1), d(12, 31)),
        AssetLifetime::new(20, d(1, 1), d(2, 9)),
        AssetLifetime::new(30, d(1, 19), d(12, 31)),
    ]);
    let engine = SimplePipelineEngine::new(
        calendar.clone(),
        Arc::new(universe),
        LoaderRegistry::new().with_frame(loader),
    );
    Fixture {
        calendar,
        sessions,
        engine,
    }
}

fn pipeline() -> Pipeline {
    let sma = Factor::simple_moving_average(&EquityPricing::close(), 5).unwrap();
    let mut pipeline = Pipeline::new();
    pipeline.add(&sma, "sma", false).unwrap();
    pipeline
        .add(sma.rank(RankMethod::Ordinal, false, None, None).unwrap(), "rank", false)
        .unwrap();
    pipeline
}

#[test]
fn test_daily_outputs_match_direct_runs() {
    let fx = fixture();
    let n = fx.sessions.len();
    let sim_days = &fx.sessions[6..n - 1];
    let mut scheduler = PipelineScheduler::new(fx.engine.clone(), EngineConfig::default(), sim_days[sim_days.len() - 1]);
    let mut ctx = SimulationContext::new();
    scheduler.attach_pipeline(&ctx, pipeline(), "default", None).unwrap();
    scheduler
        .attach_pipeline(&ctx, pipeline(), "small", Some(ChunkSpec::Fixed(2)))
        .unwrap();

    for &day in sim_days {
        ctx.before_trading_start(day);
        let next = fx.calendar.next_trading_day(day).unwrap();
        let expected = fx.engine.run_pipeline(&pipeline(), next, next).unwrap();
        let default = scheduler.pipeline_output(&ctx, "default").unwrap();
        let small = scheduler.pipeline_output(&ctx, "small").unwrap();
        assert_eq!(default, expected, "default chunks on {}", day);
        assert_eq!(small, expected, "small chunks on {}", day);
        assert!(default.sessions().iter().all(|&s| s == next));
    }
}

#[test]
fn test_failed_calls_leave_scheduler_usable() {
    let fx = fixture();
    let mut scheduler = PipelineScheduler::new(fx.engine.clone(), EngineConfig::default(), d(2, 27));
    let mut ctx = SimulationContext::new();
    assert!(matches!(
        scheduler.pipeline_output(&ctx, "p"),
        Err(PipelineError::PipelineOutputDuringInitialize)
    ));
    scheduler.attach_pipeline(&ctx, pipeline(), "p", None).unwrap();

    ctx.before_trading_start(d(2, 1));
    let first = scheduler.pipeline_output(&ctx, "p").unwrap();
    assert!(matches!(
        scheduler.pipeline_output(&ctx, "q"),
        Err(PipelineError::NoSuchPipeline { .. })
    ));
    assert!(matches!(
        scheduler.attach_pipeline(&ctx, pipeline(), "q", None),
        Err(PipelineError::AttachPipelineAfterInitialize)
    ));
    assert_eq!(scheduler.pipeline_output(&ctx, "p").unwrap(), first);
    assert_eq!(scheduler.pipeline_names(), vec!["p".to_string()]);
}

#[test]
fn test_lifetimes_shape_the_universe() {
    let fx = fixture();
    let frame = fx.engine.run_pipeline(&pipeline(), d(1, 16), d(2, 16)).unwrap();
    // Asset 30 starts on Jan 19 and appears from the next session on
    assert!(frame.get("sma", d(1, 19), 30).is_none());
    assert!(frame.get("sma", d(1, 22), 30).is_some());
    // Asset 20's last session is Feb 9
    assert!(frame.get("sma", d(2, 9), 20).is_some());
    assert!(frame.get("sma", d(2, 12), 20).is_none());

    assert_eq!(frame.sessions(), fx.calendar.trading_days_between(d(1, 16), d(2, 16)));
    for session in frame.sessions() {
        let mut expected = vec![10];
        if session <= d(2, 9) {
            expected.push(20);
        }
        if session > d(1, 19) {
            expected.push(30);
        }
        assert_eq!(frame.assets(session), expected, "universe on {}", session);
    }
}
