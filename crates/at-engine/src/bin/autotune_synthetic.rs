//! Runs a full tuning pass against the synthetic oracle and prints the
//! report.
//!
//! Usage: `autotune-synthetic [config.json] [target[@size_b] ...]`

use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use at_cache::ResultCache;
use at_engine::{
    demo_tasks, CancellationFlag, NumericAnswerScorer, SyntheticOracle, TuningRunner,
    TuningTarget,
};
use at_monitor::{AlertTally, AlwaysSafe, MemoryMonitor, ProcMeminfoSampler, ResourceMonitor};
use at_types::TunerConfig;

fn parse_target(raw: &str) -> anyhow::Result<TuningTarget> {
    match raw.split_once('@') {
        Some((id, size)) => {
            let size_b: f64 = size
                .parse()
                .with_context(|| format!("invalid model size in {raw:?}"))?;
            Ok(TuningTarget::new(id).with_size(size_b))
        }
        None => Ok(TuningTarget::new(raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1).peekable();
    let config = if args.peek().is_some_and(|a| a.ends_with(".json")) {
        let path = args.next().unwrap_or_default();
        TunerConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?
    } else {
        TunerConfig::default()
    }
    .apply_env()?;
    config.validate()?;

    let mut targets = args.map(|raw| parse_target(&raw)).collect::<anyhow::Result<Vec<_>>>()?;
    if targets.is_empty() {
        targets = vec![
            TuningTarget::new("synthetic-8b").with_size(8.0),
            TuningTarget::new("synthetic-embed"),
        ];
    }

    let cache = Arc::new(ResultCache::open(&config.cache)?);
    info!(dir = %cache.dir().display(), "result cache ready");

    let (alert_tx, alert_rx) = crossbeam_channel::bounded(64);
    let memory = Arc::new(MemoryMonitor::new(
        config.monitor.clone(),
        ProcMeminfoSampler::new(),
        alert_tx,
    ));
    let monitor: Arc<dyn ResourceMonitor> = match memory.poll_once() {
        Ok(_) => {
            memory.start()?;
            let monitor: Arc<dyn ResourceMonitor> = memory.clone();
            monitor
        }
        Err(e) => {
            warn!(error = %e, "memory readings unavailable, running without the safety gate");
            Arc::new(AlwaysSafe)
        }
    };
    // the monitor logs each alert as it fires; this thread only counts them
    let tally = Arc::new(Mutex::new(AlertTally::default()));
    let counter = tally.clone();
    std::thread::spawn(move || {
        for alert in alert_rx {
            counter.lock().record(&alert);
        }
    });

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with best-so-far results");
            on_interrupt.cancel();
        }
    });

    let oracle = Arc::new(SyntheticOracle::new().with_incompatible("synthetic-embed"));
    let runner = TuningRunner::new(
        config,
        oracle,
        Arc::new(NumericAnswerScorer),
        demo_tasks(),
        cache,
        monitor,
    )
    .with_cancellation(cancel);

    let report = runner.run_all(&targets).await?;
    memory.stop();

    println!("{}", serde_json::to_string_pretty(&report)?);
    for session in &report.sessions {
        println!();
        print!("{}", session.summary());
    }
    for skipped in &report.skipped {
        println!("Skipped {}: {}", skipped.target_id, skipped.reason);
    }
    if !report.not_started.is_empty() {
        println!("Not started: {}", report.not_started.join(", "));
    }
    let tally = *tally.lock();
    if tally.total() > 0 {
        println!("Memory alerts: {tally}");
    }
    Ok(())
}
