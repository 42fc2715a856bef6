//! Sources of memory utilisation readings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use at_types::{internal_error, AtResult};

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySample {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            total_bytes,
            available_bytes: available_bytes.min(total_bytes),
        }
    }

    /// Fraction of memory in use, in [0, 1].
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        1.0 - self.available_bytes as f64 / self.total_bytes as f64
    }
}

/// Something that can report current memory usage.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> AtResult<MemorySample>;
}

/// Reads `MemTotal` and `MemAvailable` from a Linux meminfo file.
#[derive(Debug, Clone)]
pub struct ProcMeminfoSampler {
    path: PathBuf,
}

impl ProcMeminfoSampler {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse meminfo text. Values are reported in kB.
    pub fn parse(text: &str) -> AtResult<MemorySample> {
        let mut total = None;
        let mut available = None;
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(label), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let slot = match label {
                "MemTotal:" => &mut total,
                "MemAvailable:" => &mut available,
                _ => continue,
            };
            let kb: u64 = value
                .parse()
                .map_err(|e| internal_error!("bad meminfo value {value:?} for {label}: {e}"))?;
            *slot = Some(kb * 1024);
        }
        match (total, available) {
            (Some(total), Some(available)) => Ok(MemorySample::new(total, available)),
            _ => Err(internal_error!("meminfo lacks MemTotal or MemAvailable")),
        }
    }
}

impl Default for ProcMeminfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcMeminfoSampler {
    fn sample(&self) -> AtResult<MemorySample> {
        let text = std::fs::read_to_string(&self.path)?;
        Self::parse(&text)
    }
}
