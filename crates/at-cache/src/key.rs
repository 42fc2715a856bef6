//! Canonical cache keys and parameter similarity.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use at_types::{AtResult, CacheError};

/// Order-independent JSON form of `params`.
///
/// Serializing through [`Value`] sorts object keys, so two maps with the
/// same entries in different insertion order produce the same text.
pub fn canonical_params<P: Serialize + ?Sized>(params: &P) -> AtResult<Value> {
    let value = serde_json::to_value(params).map_err(|e| CacheError::Canonicalization {
        message: e.to_string(),
    })?;
    Ok(value)
}

/// Hex SHA-256 of `"{target_id}:{canonical params}"`.
pub fn cache_key(target_id: &str, canonical: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_id.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether every numeric entry of `a` is within a relative `tolerance` of
/// the same entry in `b`. Both must have the same keys; non-numeric values
/// must match exactly.
pub fn within_tolerance(a: &Value, b: &Value, tolerance: f64) -> bool {
    let (Value::Object(a), Value::Object(b)) = (a, b) else {
        return a == b;
    };
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(name, left)| {
        let Some(right) = b.get(name) else {
            return false;
        };
        match (left.as_f64(), right.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= tolerance * x.abs().max(y.abs()),
            _ => left == right,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn key_ignores_insertion_order() {
        let mut first = HashMap::new();
        first.insert("temperature", 0.7);
        first.insert("top_p", 0.9);
        first.insert("top_k", 40.0);

        let mut second = HashMap::new();
        second.insert("top_k", 40.0);
        second.insert("top_p", 0.9);
        second.insert("temperature", 0.7);

        let a = cache_key("llama3:8b", &canonical_params(&first).unwrap());
        let b = cache_key("llama3:8b", &canonical_params(&second).unwrap());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_depends_on_target() {
        let params = canonical_params(&json!({"num_ctx": 4096})).unwrap();
        assert_ne!(cache_key("a", &params), cache_key("b", &params));
    }

    #[test]
    fn relative_tolerance() {
        let query = json!({"temperature": 0.70, "top_k": 40});
        assert!(within_tolerance(&json!({"temperature": 0.72, "top_k": 41}), &query, 0.05));
        assert!(!within_tolerance(&json!({"temperature": 0.80, "top_k": 40}), &query, 0.05));
        assert!(!within_tolerance(&json!({"temperature": 0.70}), &query, 0.05));
        assert!(within_tolerance(&json!({"mode": "fast"}), &json!({"mode": "fast"}), 0.0));
    }
}
