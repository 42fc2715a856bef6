//! Cooperative cancellation and the resource safety gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use at_monitor::ResourceMonitor;

/// Shared flag checked between iterations of every tuning loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocks evaluations while the resource monitor reports pressure.
///
/// An unsafe reading is never a trial failure: the caller waits and retries.
#[derive(Clone)]
pub struct SafetyGate {
    monitor: Arc<dyn ResourceMonitor>,
    pause: Duration,
}

impl SafetyGate {
    pub fn new(monitor: Arc<dyn ResourceMonitor>, pause: Duration) -> Self {
        Self { monitor, pause }
    }

    pub fn monitor(&self) -> &Arc<dyn ResourceMonitor> {
        &self.monitor
    }

    /// Wait until the monitor reports safe. Returns `false` if the session
    /// was cancelled while waiting.
    pub async fn wait_until_safe(&self, cancel: &CancellationFlag) -> bool {
        let mut waited = 0u32;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.monitor.is_safe() {
                if waited > 0 {
                    info!(pauses = waited, "resources recovered, resuming");
                }
                return true;
            }
            if waited == 0 {
                warn!(pause_ms = self.pause.as_millis() as u64, "resources unsafe, pausing evaluations");
            }
            waited += 1;
            tokio::time::sleep(self.pause).await;
        }
    }
}
