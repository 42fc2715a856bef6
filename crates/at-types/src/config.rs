//! Tuner configuration.
//!
//! Every section has defaults matching a general-purpose local setup; a JSON
//! file may override any subset of fields and a few `AUTOTUNE_*` environment
//! variables are applied on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config_error;
use crate::errors::AtResult;

/// One continuous (or integer-valued) tunable dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Integer-valued dimensions are rounded when denormalized.
    #[serde(default)]
    pub integer: bool,
}

impl DimensionSpec {
    pub fn float(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            integer: false,
        }
    }

    pub fn int(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min: min as f64,
            max: max as f64,
            integer: true,
        }
    }
}

/// Acquisition strategy used to pick the next point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionKind {
    ExpectedImprovement { xi: f64 },
    ProbabilityOfImprovement { xi: f64 },
    UpperConfidenceBound { kappa: f64 },
}

impl Default for AcquisitionKind {
    fn default() -> Self {
        Self::ExpectedImprovement { xi: 0.01 }
    }
}

/// Settings for the adaptive surrogate-driven optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub space: Vec<DimensionSpec>,
    /// Random bootstrap proposals before the surrogate guides the search.
    pub n_initial_points: usize,
    pub max_iterations: usize,
    /// Consecutive non-improving updates that trigger early stopping.
    pub patience: usize,
    /// Minimum gain over the reference score that counts as improvement.
    pub improvement_threshold: f64,
    pub acquisition: AcquisitionKind,
    /// Random restarts of the acquisition local search.
    pub restarts: usize,
    /// Perturbation steps per restart.
    pub local_steps: usize,
    /// Standard deviation of the per-dimension Gaussian perturbation.
    pub step_sigma: f64,
    pub seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            space: vec![
                DimensionSpec::float("temperature", 0.1, 1.5),
                DimensionSpec::float("top_p", 0.5, 1.0),
                DimensionSpec::int("top_k", 5, 150),
            ],
            n_initial_points: 8,
            max_iterations: 25,
            patience: 5,
            improvement_threshold: 0.02,
            acquisition: AcquisitionKind::default(),
            restarts: 10,
            local_steps: 50,
            step_sigma: 0.1,
            seed: None,
        }
    }
}

impl OptimizerConfig {
    pub fn with_space(mut self, space: Vec<DimensionSpec>) -> Self {
        self.space = space;
        self
    }

    pub fn with_initial_points(mut self, n: usize) -> Self {
        self.n_initial_points = n;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_early_stopping(mut self, patience: usize, improvement_threshold: f64) -> Self {
        self.patience = patience;
        self.improvement_threshold = improvement_threshold;
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionKind) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Latency limits and ordinal candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConstraints {
    /// Total request duration must stay strictly below this.
    pub time_limit_s: f64,
    /// Time to first output must stay strictly below this.
    pub ttft_limit_s: f64,
    pub num_predict: u32,
    /// Context window candidates, tried in descending order.
    pub context_candidates: Vec<u32>,
    /// Largest offload depth considered.
    pub max_offload: u32,
}

impl Default for TuningConstraints {
    fn default() -> Self {
        Self {
            time_limit_s: 60.0,
            ttft_limit_s: 5.0,
            num_predict: 256,
            context_candidates: vec![8192, 4096, 2048, 1024],
            max_offload: 100,
        }
    }
}

impl TuningConstraints {
    /// Constraint tier for a model of `size_b` billion parameters.
    /// Non-positive sizes mean "unknown" and yield the generic defaults.
    pub fn for_model_size(size_b: f64) -> Self {
        let (time_limit_s, ttft_limit_s, num_predict) = if size_b > 0.0 && size_b < 10.0 {
            (30.0, 2.0, 1024)
        } else if (10.0..=18.0).contains(&size_b) {
            (120.0, 6.0, 2048)
        } else if size_b > 18.0 {
            (180.0, 15.0, 8192)
        } else {
            (60.0, 5.0, 256)
        };
        Self {
            time_limit_s,
            ttft_limit_s,
            num_predict,
            ..Self::default()
        }
    }

    pub fn with_limits(mut self, time_limit_s: f64, ttft_limit_s: f64) -> Self {
        self.time_limit_s = time_limit_s;
        self.ttft_limit_s = ttft_limit_s;
        self
    }

    pub fn with_context_candidates(mut self, candidates: Vec<u32>) -> Self {
        self.context_candidates = candidates;
        self
    }
}

/// On-disk result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let dir = dirs::cache_dir()
            .map(|d| d.join("autotune"))
            .unwrap_or_else(|| PathBuf::from(".cache"));
        Self { dir, ttl_hours: 24 }
    }
}

impl CacheConfig {
    /// Longest accepted entry lifetime, one hundred years.
    pub const MAX_TTL_HOURS: u64 = 24 * 365 * 100;

    pub fn new(dir: impl Into<PathBuf>, ttl_hours: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl_hours,
        }
    }
}

/// Resource monitor thresholds (fractions of total memory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub poll_interval_ms: u64,
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.80,
            critical_threshold: 0.95,
            poll_interval_ms: 2_000,
            history_capacity: 1_000,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session-level timeouts and pauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for the short compatibility probe before quality evaluation.
    pub probe_timeout_s: f64,
    /// Timeout for each quality-evaluation task.
    pub item_timeout_s: f64,
    /// Added to `time_limit_s` to form the streaming measurement timeout.
    pub speed_timeout_margin_s: f64,
    /// Sleep between safety-gate checks while resources are unsafe.
    pub unsafe_pause_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_s: 30.0,
            item_timeout_s: 120.0,
            speed_timeout_margin_s: 10.0,
            unsafe_pause_ms: 5_000,
        }
    }
}

impl SessionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_s)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.item_timeout_s)
    }

    pub fn unsafe_pause(&self) -> Duration {
        Duration::from_millis(self.unsafe_pause_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub optimizer: OptimizerConfig,
    pub constraints: TuningConstraints,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
}

impl TunerConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> AtResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: TunerConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `AUTOTUNE_*` environment overrides.
    pub fn apply_env(self) -> AtResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> AtResult<Self> {
        if let Some(dir) = lookup("AUTOTUNE_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("AUTOTUNE_CACHE_TTL_HOURS") {
            self.cache.ttl_hours = raw
                .parse()
                .map_err(|_| config_error!("AUTOTUNE_CACHE_TTL_HOURS is not an integer: {raw}"))?;
        }
        if let Some(raw) = lookup("AUTOTUNE_TIME_LIMIT_S") {
            self.constraints.time_limit_s = raw
                .parse()
                .map_err(|_| config_error!("AUTOTUNE_TIME_LIMIT_S is not a number: {raw}"))?;
        }
        if let Some(raw) = lookup("AUTOTUNE_TTFT_LIMIT_S") {
            self.constraints.ttft_limit_s = raw
                .parse()
                .map_err(|_| config_error!("AUTOTUNE_TTFT_LIMIT_S is not a number: {raw}"))?;
        }
        Ok(self)
    }

    /// Reject configurations that cannot drive a session.
    pub fn validate(&self) -> AtResult<()> {
        let opt = &self.optimizer;
        if opt.space.is_empty() {
            return Err(config_error!("optimizer space has no dimensions"));
        }
        if opt.max_iterations == 0 {
            return Err(config_error!("max_iterations must be positive"));
        }
        if opt.patience == 0 {
            return Err(config_error!("patience must be positive"));
        }
        if !(opt.improvement_threshold >= 0.0) {
            return Err(config_error!(
                "improvement_threshold must be non-negative, got {}",
                opt.improvement_threshold
            ));
        }
        if opt.restarts == 0 || opt.local_steps == 0 {
            return Err(config_error!("acquisition search needs restarts and steps"));
        }
        if !(opt.step_sigma > 0.0) {
            return Err(config_error!("step_sigma must be positive"));
        }

        let c = &self.constraints;
        if !(c.time_limit_s > 0.0 && c.time_limit_s.is_finite())
            || !(c.ttft_limit_s > 0.0 && c.ttft_limit_s.is_finite())
        {
            return Err(config_error!(
                "latency limits must be positive and finite (time {}, ttft {})",
                c.time_limit_s,
                c.ttft_limit_s
            ));
        }
        if c.context_candidates.is_empty() {
            return Err(config_error!("context candidate list is empty"));
        }

        if self.cache.ttl_hours == 0 {
            return Err(config_error!("cache ttl must be at least one hour"));
        }
        if self.cache.ttl_hours > CacheConfig::MAX_TTL_HOURS {
            return Err(config_error!(
                "cache ttl of {} hours exceeds the {} hour limit",
                self.cache.ttl_hours,
                CacheConfig::MAX_TTL_HOURS
            ));
        }

        let m = &self.monitor;
        if !(0.0 < m.warning_threshold && m.warning_threshold <= m.critical_threshold && m.critical_threshold <= 1.0) {
            return Err(config_error!(
                "monitor thresholds must satisfy 0 < warning <= critical <= 1"
            ));
        }

        let s = &self.session;
        let finite_positive = |v: f64| v > 0.0 && v.is_finite();
        if !finite_positive(s.probe_timeout_s)
            || !finite_positive(s.item_timeout_s)
            || !(s.speed_timeout_margin_s >= 0.0 && s.speed_timeout_margin_s.is_finite())
        {
            return Err(config_error!("session timeouts must be positive and finite"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = TunerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.optimizer.space.len(), 3);
        assert_eq!(config.constraints.context_candidates, vec![8192, 4096, 2048, 1024]);
        assert_eq!(config.cache.ttl_hours, 24);
    }

    #[test]
    fn size_tiers_match_model_classes() {
        let small = TuningConstraints::for_model_size(7.0);
        assert_eq!((small.time_limit_s, small.ttft_limit_s, small.num_predict), (30.0, 2.0, 1024));

        let medium = TuningConstraints::for_model_size(14.0);
        assert_eq!(medium.num_predict, 2048);

        let large = TuningConstraints::for_model_size(70.0);
        assert_eq!((large.time_limit_s, large.ttft_limit_s), (180.0, 15.0));

        let unknown = TuningConstraints::for_model_size(0.0);
        assert_eq!(unknown, TuningConstraints::default());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"constraints": {{"time_limit_s": 12.5}}, "optimizer": {{"acquisition": {{"kind": "upper_confidence_bound", "kappa": 1.5}}}}}}"#
        )
        .unwrap();

        let config = TunerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.constraints.time_limit_s, 12.5);
        assert_eq!(config.constraints.ttft_limit_s, 5.0);
        assert_eq!(
            config.optimizer.acquisition,
            AcquisitionKind::UpperConfidenceBound { kappa: 1.5 }
        );
        assert_eq!(config.optimizer.max_iterations, 25);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("AUTOTUNE_CACHE_DIR", "/tmp/at-cache"),
            ("AUTOTUNE_CACHE_TTL_HOURS", "6"),
            ("AUTOTUNE_TTFT_LIMIT_S", "1.5"),
        ]
        .into_iter()
        .collect();

        let config = TunerConfig::default()
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.cache.dir, PathBuf::from("/tmp/at-cache"));
        assert_eq!(config.cache.ttl_hours, 6);
        assert_eq!(config.constraints.ttft_limit_s, 1.5);
        assert_eq!(config.constraints.time_limit_s, 60.0);
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let err = TunerConfig::default()
            .apply_overrides(|k| (k == "AUTOTUNE_CACHE_TTL_HOURS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.is_session_ending());
    }

    #[test]
    fn validation_rejects_empty_candidates() {
        let mut config = TunerConfig::default();
        config.constraints.context_candidates.clear();
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.monitor.warning_threshold = 0.99;
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.constraints.time_limit_s = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unrepresentable_durations() {
        let mut config = TunerConfig::default();
        config.cache.ttl_hours = 10_000_000_000_000_000;
        assert!(config.validate().is_err());
        config.cache.ttl_hours = CacheConfig::MAX_TTL_HOURS;
        config.validate().unwrap();

        let config = TunerConfig::default()
            .apply_overrides(|k| (k == "AUTOTUNE_TIME_LIMIT_S").then(|| "inf".to_string()))
            .unwrap();
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.session.item_timeout_s = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.session.speed_timeout_margin_s = f64::NAN;
        assert!(config.validate().is_err());
    }
}
