//! Fixed-schema inference settings passed to the evaluation oracle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{AtResult, ParameterError};

/// Settings knobs the tuner knows how to drive.
///
/// Every field is optional so a settings value can describe a partial
/// assignment (e.g. only the sampling knobs during quality tuning).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Context window length in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    /// Number of layers offloaded to the accelerator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,
    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl InferenceSettings {
    /// Names accepted by [`InferenceSettings::set`].
    pub const KNOBS: [&'static str; 6] = [
        "temperature",
        "top_p",
        "top_k",
        "num_ctx",
        "num_gpu",
        "num_predict",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is a knob of this schema.
    pub fn supports(name: &str) -> bool {
        Self::KNOBS.contains(&name)
    }

    /// Assign a knob by name. Integer knobs are rounded and floored at zero.
    pub fn set(&mut self, name: &str, value: f64) -> AtResult<()> {
        let as_count = || value.round().max(0.0) as u32;
        match name {
            "temperature" => self.temperature = Some(value),
            "top_p" => self.top_p = Some(value),
            "top_k" => self.top_k = Some(as_count()),
            "num_ctx" => self.num_ctx = Some(as_count()),
            "num_gpu" => self.num_gpu = Some(as_count()),
            "num_predict" => self.num_predict = Some(as_count()),
            _ => {
                return Err(ParameterError::UnknownParameter {
                    name: name.to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }

    pub fn with_num_gpu(mut self, num_gpu: u32) -> Self {
        self.num_gpu = Some(num_gpu);
        self
    }

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = Some(num_predict);
        self
    }

    /// Name → value view of the assigned knobs, ordered by name.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            if let Some(v) = value {
                map.insert(name.to_string(), v);
            }
        };
        put("temperature", self.temperature);
        put("top_p", self.top_p);
        put("top_k", self.top_k.map(f64::from));
        put("num_ctx", self.num_ctx.map(f64::from));
        put("num_gpu", self.num_gpu.map(f64::from));
        put("num_predict", self.num_predict.map(f64::from));
        map
    }
}

impl std::fmt::Display for InferenceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .to_map()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
