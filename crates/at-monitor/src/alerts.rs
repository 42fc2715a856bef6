//! Memory pressure alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a memory alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemorySeverity {
    /// Utilisation crossed the warning threshold.
    Warning,
    /// Utilisation crossed the critical threshold; evaluations pause.
    Critical,
}

/// A single alert emitted by the memory monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: MemorySeverity,
    /// Fraction of memory in use, in [0, 1].
    pub utilization: f64,
    pub threshold: f64,
    pub message: String,
}

impl MemoryAlert {
    pub fn new(severity: MemorySeverity, utilization: f64, threshold: f64) -> Self {
        let label = match severity {
            MemorySeverity::Warning => "high",
            MemorySeverity::Critical => "critical",
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            utilization,
            threshold,
            message: format!(
                "Memory usage {label}: {:.1}% (threshold {:.1}%)",
                utilization * 100.0,
                threshold * 100.0
            ),
        }
    }
}

/// Alert counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertTally {
    pub warning: usize,
    pub critical: usize,
}

impl AlertTally {
    pub fn record(&mut self, alert: &MemoryAlert) {
        match alert.severity {
            MemorySeverity::Warning => self.warning += 1,
            MemorySeverity::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.warning + self.critical
    }
}

impl std::fmt::Display for AlertTally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} warning, {} critical", self.warning, self.critical)
    }
}
