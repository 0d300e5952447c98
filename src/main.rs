// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::Context;
use futures::stream;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use the_sluice::config::load_and_validate_config;
use the_sluice::engine::{BatchEngine, ProcessOptions, StatsSnapshot};
use the_sluice::errors::BoxError;
use the_sluice::stream::TransformOptions;
use the_sluice::EngineConfig;

const DEFAULT_ITEM_COUNT: u64 = 25_000;

/// A synthetic record flowing through the demo.
#[derive(Debug, Clone)]
struct Reading {
    sensor: u64,
    value: f64,
}

fn synthetic_readings(count: u64) -> impl Iterator<Item = Reading> {
    (0..count).map(|i| Reading {
        sensor: i % 17,
        value: (i as f64 * 0.37).sin() * 100.0,
    })
}

/// Simulated I/O-bound enrichment of one batch; rejects any batch holding an
/// out-of-range reading.
async fn enrich(batch: Vec<Reading>) -> Result<Vec<f64>, BoxError> {
    tokio::time::sleep(Duration::from_millis(2)).await;
    if batch.iter().any(|r| r.value > 99.99) {
        return Err(format!("sensor {} reported an out-of-range value", batch[0].sensor).into());
    }
    Ok(batch.into_iter().map(|r| r.value.abs()).collect())
}

fn print_stats(label: &str, stats: &StatsSnapshot) -> anyhow::Result<()> {
    println!("📊 {}:", label);
    println!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

async fn run_batch_demo(engine: &BatchEngine, items: u64) -> anyhow::Result<()> {
    println!("🚚 Batch run over {} readings", items);

    let last = Arc::new(std::sync::Mutex::new(StatsSnapshot::default()));
    let last_c = last.clone();
    let rejected = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let rejected_c = rejected.clone();

    let started = Instant::now();
    let outputs = engine
        .process_stream(
            stream::iter(synthetic_readings(items).map(Ok::<_, BoxError>)),
            enrich,
            ProcessOptions::new()
                .on_progress(move |snapshot| {
                    if let Ok(mut last) = last_c.lock() {
                        if snapshot.settled() >= last.settled() {
                            *last = snapshot.clone();
                        }
                    }
                })
                .on_error(move |_, _: &Reading| {
                    rejected_c.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }),
        )
        .await?;

    println!(
        "✅ {} outputs, {} readings rejected, {:?}",
        outputs.len(),
        rejected.load(std::sync::atomic::Ordering::Relaxed),
        started.elapsed()
    );
    let last = last.lock().map(|s| s.clone()).unwrap_or_default();
    print_stats("Final batch run stats", &last)
}

async fn run_pipeline_demo(engine: &BatchEngine, items: u64) -> anyhow::Result<()> {
    println!("🔗 Stream pipeline over {} readings", items);

    let source = engine.create_buffered_readable_stream(stream::iter(
        synthetic_readings(items).map(Ok::<_, BoxError>),
    ));
    let normalize = engine
        .create_transform_stream(
            |r: Reading| async move {
                if r.value.is_nan() {
                    return Err::<f64, BoxError>(format!("sensor {} produced NaN", r.sensor).into());
                }
                Ok(r.value / 100.0)
            },
            TransformOptions::parallel().swallow_errors(true),
        )
        .with_name("normalize");
    let collector = engine.create_collector_stream();

    let delivered = engine
        .create_pipeline(source)
        .through(normalize)
        .run_into(&collector)
        .await?;

    println!("✅ {} items collected", delivered);
    print_stats("Stats after pipeline", &engine.stats())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: {} [config.yaml|config.toml] [item_count]", args[0]);
        return Ok(());
    }

    let config = match args.get(1) {
        Some(path) => load_and_validate_config(path).with_context(|| format!("loading {}", path))?,
        None => EngineConfig::default(),
    };
    let items: u64 = match args.get(2) {
        Some(raw) => raw.parse().with_context(|| format!("invalid item count '{}'", raw))?,
        None => DEFAULT_ITEM_COUNT,
    };

    println!("🚀 The Sluice demo");
    println!("═══════════════════");
    println!("{:#?}", config);
    println!();

    let engine = BatchEngine::new(config)?;
    let mut memory = engine.subscribe_memory();
    let watcher = tokio::spawn(async move {
        while let Ok(sample) = memory.recv().await {
            tracing::info!(resident = sample.resident, virtual_size = sample.virtual_size, "memory sample");
        }
    });

    run_batch_demo(&engine, items).await?;
    println!();
    run_pipeline_demo(&engine, items).await?;

    engine.shutdown();
    watcher.await?;
    println!("\n🎉 Demo complete!");
    Ok(())
}
