//! Memory monitor: background polling with alert emission.
//!
//! The [`MemoryMonitor`] samples memory on its own thread, keeps a bounded
//! history, and emits [`MemoryAlert`]s on the channel supplied at
//! construction. Tuning loops only read it through [`ResourceMonitor`].

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use at_types::{AtResult, MonitorConfig};

use crate::alerts::{MemoryAlert, MemorySeverity};
use crate::sampler::{MemorySample, MemorySampler};

/// Samples used by [`MemoryMonitor::memory_summary`].
pub const SUMMARY_WINDOW: usize = 100;

/// Read-only view of whether it is safe to start another evaluation.
pub trait ResourceMonitor: Send + Sync {
    fn is_safe(&self) -> bool;

    /// Recent utilisation figures, when the monitor keeps any.
    fn summary(&self) -> Option<MemorySummary> {
        None
    }
}

/// Monitor that never reports pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSafe;

impl ResourceMonitor for AlwaysSafe {
    fn is_safe(&self) -> bool {
        true
    }
}

/// Aggregate view over the most recent samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySummary {
    pub samples: usize,
    pub current: f64,
    pub average: f64,
    pub max: f64,
}

struct Shared {
    config: MonitorConfig,
    sampler: Box<dyn MemorySampler>,
    history: RwLock<VecDeque<MemorySample>>,
    alert_tx: Sender<MemoryAlert>,
}

impl Shared {
    fn poll(&self) -> AtResult<MemorySample> {
        let sample = self.sampler.sample()?;
        {
            let mut history = self.history.write();
            if history.len() >= self.config.history_capacity.max(1) {
                history.pop_front();
            }
            history.push_back(sample);
        }
        self.check_thresholds(sample.utilization());
        Ok(sample)
    }

    fn check_thresholds(&self, utilization: f64) {
        let config = &self.config;
        if utilization >= config.critical_threshold {
            self.emit(MemoryAlert::new(
                MemorySeverity::Critical,
                utilization,
                config.critical_threshold,
            ));
        } else if utilization >= config.warning_threshold {
            self.emit(MemoryAlert::new(
                MemorySeverity::Warning,
                utilization,
                config.warning_threshold,
            ));
        }
    }

    fn emit(&self, alert: MemoryAlert) {
        match alert.severity {
            MemorySeverity::Critical => warn!(%alert.message, "MEMORY CRITICAL"),
            MemorySeverity::Warning => warn!(%alert.message, "MEMORY WARNING"),
        }
        let _ = self.alert_tx.try_send(alert);
    }
}

/// Polling memory monitor.
pub struct MemoryMonitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl MemoryMonitor {
    pub fn new(
        config: MonitorConfig,
        sampler: impl MemorySampler + 'static,
        alert_tx: Sender<MemoryAlert>,
    ) -> Self {
        let capacity = config.history_capacity;
        Self {
            shared: Arc::new(Shared {
                config,
                sampler: Box::new(sampler),
                history: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
                alert_tx,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Take one sample now, outside the polling schedule.
    pub fn poll_once(&self) -> AtResult<MemorySample> {
        self.shared.poll()
    }

    /// Start the background polling thread. No-op when already running.
    pub fn start(&self) -> AtResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.poll_interval();
        let handle = std::thread::Builder::new()
            .name("memory-monitor".into())
            .spawn(move || loop {
                if let Err(e) = shared.poll() {
                    debug!(error = %e, "memory sample failed");
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            })?;
        info!(interval_ms = interval.as_millis() as u64, "memory monitor started");
        *worker = Some((stop_tx, handle));
        Ok(())
    }

    /// Stop the polling thread and wait for it to exit.
    pub fn stop(&self) {
        let Some((stop_tx, handle)) = self.worker.lock().take() else {
            return;
        };
        let _ = stop_tx.send(());
        if handle.join().is_err() {
            warn!("memory monitor thread panicked");
        }
        info!("memory monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn latest(&self) -> Option<MemorySample> {
        self.shared.history.read().back().copied()
    }

    pub fn history(&self) -> Vec<MemorySample> {
        self.shared.history.read().iter().copied().collect()
    }

    /// Current, average and peak utilisation over the last
    /// [`SUMMARY_WINDOW`] samples. `None` before the first sample.
    pub fn memory_summary(&self) -> Option<MemorySummary> {
        let history = self.shared.history.read();
        let current = history.back()?.utilization();
        let recent: Vec<f64> = history
            .iter()
            .rev()
            .take(SUMMARY_WINDOW)
            .map(MemorySample::utilization)
            .collect();
        Some(MemorySummary {
            samples: recent.len(),
            current,
            average: recent.iter().sum::<f64>() / recent.len() as f64,
            max: recent.iter().copied().fold(0.0, f64::max),
        })
    }
}

impl ResourceMonitor for MemoryMonitor {
    /// Safe while the latest reading is below the critical threshold. With
    /// no reading yet the monitor reports safe.
    fn is_safe(&self) -> bool {
        self.latest()
            .map_or(true, |s| s.utilization() < self.shared.config.critical_threshold)
    }

    fn summary(&self) -> Option<MemorySummary> {
        self.memory_summary()
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays a fixed utilisation sequence, repeating the last value.
    struct Scripted {
        readings: Vec<f64>,
        next: AtomicUsize,
    }

    impl Scripted {
        fn new(readings: &[f64]) -> Self {
            Self {
                readings: readings.to_vec(),
                next: AtomicUsize::new(0),
            }
        }
    }

    impl MemorySampler for Scripted {
        fn sample(&self) -> AtResult<MemorySample> {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            let used = self.readings[i.min(self.readings.len() - 1)];
            Ok(MemorySample::new(1000, ((1.0 - used) * 1000.0).round() as u64))
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            history_capacity: 5,
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn alerts_follow_thresholds() {
        let (tx, rx) = unbounded();
        let monitor = MemoryMonitor::new(config(), Scripted::new(&[0.5, 0.85, 0.97]), tx);

        monitor.poll_once().unwrap();
        assert!(rx.try_recv().is_err());
        assert!(monitor.is_safe());

        monitor.poll_once().unwrap();
        assert_eq!(rx.try_recv().unwrap().severity, MemorySeverity::Warning);
        assert!(monitor.is_safe());

        monitor.poll_once().unwrap();
        assert_eq!(rx.try_recv().unwrap().severity, MemorySeverity::Critical);
        assert!(!monitor.is_safe());
    }

    #[test]
    fn no_reading_is_safe() {
        let (tx, _rx) = unbounded();
        let monitor = MemoryMonitor::new(config(), Scripted::new(&[0.99]), tx);
        assert!(monitor.is_safe());
        assert!(monitor.memory_summary().is_none());
    }

    #[test]
    fn history_is_bounded_and_summarised() {
        let (tx, _rx) = unbounded();
        let readings = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let monitor = MemoryMonitor::new(config(), Scripted::new(&readings), tx);
        for _ in 0..readings.len() {
            monitor.poll_once().unwrap();
        }

        assert_eq!(monitor.history().len(), 5);
        let summary = monitor.memory_summary().unwrap();
        assert_eq!(summary.samples, 5);
        assert!((summary.current - 0.7).abs() < 1e-9);
        assert!((summary.max - 0.7).abs() < 1e-9);
        assert!((summary.average - 0.5).abs() < 1e-9);
    }

    #[test]
    fn background_polling_starts_and_stops() {
        let (tx, _rx) = unbounded();
        let monitor = MemoryMonitor::new(config(), Scripted::new(&[0.4]), tx);
        monitor.start().unwrap();
        monitor.start().unwrap();
        assert!(monitor.is_running());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while monitor.history().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(monitor.history().len() >= 2);
    }

    #[test]
    fn always_safe() {
        assert!(AlwaysSafe.is_safe());
    }
}
