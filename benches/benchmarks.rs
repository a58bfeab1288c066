use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rusty_pipeline::calendar::{TradingCalendar, WeekdayCalendar};
use rusty_pipeline::data::{AdjustedArray, Adjustment, AdjustmentKind};
use rusty_pipeline::pipeline::normalize::winsorize;
use rusty_pipeline::pipeline::rank::masked_rankdata_2d;
use rusty_pipeline::pipeline::{
    AssetLifetime, DataFrameLoader, EquityPricing, EquityUniverse, Factor, LoaderRegistry, Pipeline, RankMethod,
    SimplePipelineEngine,
};
use std::sync::Arc;

fn panel(rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(r, c)| 100.0 + ((r * 31 + c * 17) % 97) as f64 * 0.25)
}

fn benchmark_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("masked_rank");
    for &assets in &[100usize, 1000, 5000] {
        let data = panel(20, assets);
        let mask = Array2::from_shape_fn((20, assets), |(r, c)| (r + c) % 11 != 0);
        group.bench_with_input(BenchmarkId::from_parameter(assets), &assets, |b, _| {
            b.iter(|| masked_rankdata_2d(black_box(data.view()), mask.view(), RankMethod::Average, true));
        });
    }
    group.finish();
}

fn benchmark_winsorize(c: &mut Criterion) {
    let values: Vec<f64> = (0..5000).map(|i| ((i * 7919) % 5003) as f64).collect();
    c.bench_function("winsorize_5000", |b| {
        b.iter(|| winsorize(black_box(&values), 0.05, 0.95));
    });
}

fn benchmark_adjusted_windows(c: &mut Criterion) {
    let baseline = panel(252, 500);
    let adjustments: Vec<Adjustment<f64>> = (0..500)
        .step_by(5)
        .filter_map(|col| Adjustment::new(col % 252, col, 0, (col % 252).saturating_sub(1), AdjustmentKind::Multiply, 0.5).ok())
        .collect();
    let array = AdjustedArray::new(baseline, adjustments);
    c.bench_function("adjusted_windows_252x500_len20", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for window in array.traverse(20).flatten() {
                total += window[[0, 0]];
            }
            black_box(total)
        });
    });
}

fn benchmark_pipeline_run(c: &mut Criterion) {
    let calendar = Arc::new(WeekdayCalendar);
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or_default();
    let end = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap_or_default();
    let sessions = calendar.trading_days_between(start, end);
    let sids: Vec<u64> = (1..=200).collect();
    let closes = panel(sessions.len(), sids.len());
    let lifetimes = sids.iter().map(|&sid| AssetLifetime::new(sid, start, end)).collect();

    let loader = match DataFrameLoader::from_array(EquityPricing::close(), sessions.clone(), sids, closes) {
        Ok(loader) => loader,
        Err(e) => panic!("fixture: {}", e),
    };
    let engine = SimplePipelineEngine::new(
        calendar,
        Arc::new(EquityUniverse::us(lifetimes)),
        LoaderRegistry::new().with_frame(loader),
    );

    let mut pipeline = Pipeline::new();
    let built = Factor::simple_moving_average(&EquityPricing::close(), 20).and_then(|sma| {
        pipeline.add(&sma, "sma", false)?;
        pipeline.add(sma.zscore(None, None)?, "z", false)?;
        pipeline.add(sma.rank(RankMethod::Ordinal, true, None, None)?, "rank", false)?;
        Ok(())
    });
    if let Err(e) = built {
        panic!("fixture: {}", e);
    }

    let run_start = sessions[40];
    let run_end = sessions[sessions.len() - 1];
    c.bench_function("pipeline_run_200_assets", |b| {
        b.iter(|| engine.run_pipeline(black_box(&pipeline), run_start, run_end));
    });
}

criterion_group!(
    benches,
    benchmark_rank,
    benchmark_winsorize,
    benchmark_adjusted_windows,
    benchmark_pipeline_run
);
criterion_main!(benches);
