use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use at_types::{config_error, AtResult, CacheConfig, CacheError};

use crate::key::{cache_key, canonical_params, within_tolerance};

const ENTRY_EXTENSION: &str = "json";

/// One persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub target_id: String,
    /// Canonical parameters the entry was stored under.
    pub parameters: Value,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> AtResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Disk-backed result cache keyed by target and parameters.
///
/// Each entry is one file written atomically, so concurrent readers in
/// other sessions never observe a partial record.
#[derive(Debug)]
pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl ResultCache {
    /// Create the directory if needed and purge expired or corrupt entries.
    pub fn open(config: &CacheConfig) -> AtResult<Self> {
        let ttl = i64::try_from(config.ttl_hours)
            .ok()
            .and_then(Duration::try_hours)
            .ok_or_else(|| config_error!("cache ttl of {} hours is out of range", config.ttl_hours))?;
        Self::with_ttl(&config.dir, ttl)
    }

    pub fn with_ttl(dir: impl AsRef<Path>, ttl: Duration) -> AtResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| CacheError::DirectoryUnavailable {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        let cache = Self {
            dir,
            ttl,
            stats: RwLock::new(CacheStats::default()),
        };
        let purged = cache.sweep()?;
        info!(dir = %cache.dir.display(), ttl_hours = ttl.num_hours(), purged, "result cache opened");
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key<P: Serialize + ?Sized>(&self, target_id: &str, params: &P) -> AtResult<String> {
        Ok(cache_key(target_id, &canonical_params(params)?))
    }

    /// Cached payload, or `None` on a miss. Expired and unreadable entries
    /// are deleted and reported as misses.
    pub fn get<P: Serialize + ?Sized>(&self, target_id: &str, params: &P) -> AtResult<Option<Value>> {
        let key = self.key(target_id, params)?;
        let path = self.entry_path(&key);

        let record = match self.read_record(&path) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.stats.write().misses += 1;
                return Ok(None);
            }
            Err(e) => {
                warn!(%key, error = %e, "dropping unreadable cache entry");
                self.remove(&path);
                self.stats.write().misses += 1;
                return Ok(None);
            }
        };

        if self.is_expired(&record, Utc::now()) {
            debug!(%key, target = target_id, "cache entry expired");
            self.remove(&path);
            let mut stats = self.stats.write();
            stats.expired += 1;
            stats.misses += 1;
            return Ok(None);
        }

        self.stats.write().hits += 1;
        Ok(Some(record.payload))
    }

    /// Typed variant of [`get`](Self::get).
    pub fn get_as<P, T>(&self, target_id: &str, params: &P) -> AtResult<Option<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        match self.get(target_id, params)? {
            Some(payload) => Ok(Some(serde_json::from_value(payload)?)),
            None => Ok(None),
        }
    }

    pub fn set<P, T>(&self, target_id: &str, params: &P, payload: &T) -> AtResult<()>
    where
        P: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        self.set_with_timestamp(target_id, params, payload, Utc::now())
    }

    /// Store an entry with an explicit creation time.
    pub fn set_with_timestamp<P, T>(
        &self,
        target_id: &str,
        params: &P,
        payload: &T,
        created_at: DateTime<Utc>,
    ) -> AtResult<()>
    where
        P: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        let parameters = canonical_params(params)?;
        let key = cache_key(target_id, &parameters);
        let record = CacheRecord {
            target_id: target_id.to_string(),
            parameters,
            payload: serde_json::to_value(payload)?,
            created_at,
        };
        self.write_record(&key, &record)?;
        self.stats.write().stores += 1;
        debug!(%key, target = target_id, "cache entry stored");
        Ok(())
    }

    /// Live entries for `target_id` whose parameters are each within a
    /// relative `tolerance` of `params`, newest first.
    pub fn find_similar<P: Serialize + ?Sized>(
        &self,
        target_id: &str,
        params: &P,
        tolerance: f64,
    ) -> AtResult<Vec<CacheRecord>> {
        let query = canonical_params(params)?;
        let now = Utc::now();
        let mut matches: Vec<CacheRecord> = self
            .records()?
            .into_iter()
            .filter(|(_, record)| {
                record.target_id == target_id
                    && !self.is_expired(record, now)
                    && within_tolerance(&record.parameters, &query, tolerance)
            })
            .map(|(_, record)| record)
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    /// Delete all entries, or only those of one target. Returns the number
    /// of entries removed.
    pub fn clear(&self, target_id: Option<&str>) -> AtResult<usize> {
        let mut removed = 0;
        for path in self.entry_paths()? {
            let matches = match target_id {
                None => true,
                Some(target) => matches!(
                    self.read_record(&path),
                    Ok(Some(record)) if record.target_id == target
                ),
            };
            if matches && self.remove(&path) {
                removed += 1;
            }
        }
        if target_id.is_none() {
            *self.stats.write() = CacheStats::default();
        }
        info!(removed, target = target_id.unwrap_or("*"), "cache cleared");
        Ok(removed)
    }

    /// Purge expired and corrupt entries. Returns the number removed.
    pub fn sweep(&self) -> AtResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.entry_paths()? {
            let stale = match self.read_record(&path) {
                Ok(Some(record)) => self.is_expired(&record, now),
                Ok(None) => false,
                Err(_) => true,
            };
            if stale && self.remove(&path) {
                removed += 1;
            }
        }
        if removed > 0 {
            self.stats.write().expired += removed as u64;
        }
        Ok(removed)
    }

    pub fn disk_stats(&self) -> AtResult<DiskStats> {
        let mut stats = DiskStats::default();
        for (path, record) in self.records()? {
            let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            stats.entries += 1;
            stats.total_bytes += bytes;
            stats.oldest = Some(stats.oldest.map_or(record.created_at, |o| o.min(record.created_at)));
            stats.newest = Some(stats.newest.map_or(record.created_at, |n| n.max(record.created_at)));
            let usage = stats.targets.entry(record.target_id).or_default();
            usage.entries += 1;
            usage.bytes += bytes;
        }
        Ok(stats)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    fn is_expired(&self, record: &CacheRecord, now: DateTime<Utc>) -> bool {
        record.age(now) > self.ttl
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn entry_paths(&self) -> AtResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Readable records; unreadable files are skipped.
    fn records(&self) -> AtResult<Vec<(PathBuf, CacheRecord)>> {
        Ok(self
            .entry_paths()?
            .into_iter()
            .filter_map(|path| match self.read_record(&path) {
                Ok(Some(record)) => Some((path, record)),
                _ => None,
            })
            .collect())
    }

    fn read_record(&self, path: &Path) -> AtResult<Option<CacheRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| {
                CacheError::Corrupt {
                    key: entry_key(path),
                    message: e.to_string(),
                }
                .into()
            })
    }

    fn write_record(&self, key: &str, record: &CacheRecord) -> AtResult<()> {
        let write_failed = |e: &dyn std::fmt::Display| CacheError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| write_failed(&e))?;
        file.write_all(&bytes).map_err(|e| write_failed(&e))?;
        file.persist(self.entry_path(key))
            .map_err(|e| write_failed(&e.error))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove cache entry");
                false
            }
        }
    }
}

fn entry_key(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Counters for one cache handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

/// Per-target share of the cache directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetUsage {
    pub entries: usize,
    pub bytes: u64,
}

/// Snapshot of what is on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub targets: BTreeMap<String, TargetUsage>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn params(t: f64, k: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("temperature".to_string(), t), ("top_k".to_string(), k)])
    }

    fn open(dir: &Path) -> ResultCache {
        ResultCache::with_ttl(dir, Duration::hours(24)).unwrap()
    }

    #[test]
    fn set_then_get_returns_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());

        assert!(cache.get("llama3:8b", &params(0.7, 40.0)).unwrap().is_none());

        let payload = json!({"overall": 0.82, "tasks_evaluated": 3});
        cache.set("llama3:8b", &params(0.7, 40.0), &payload).unwrap();
        assert_eq!(cache.get("llama3:8b", &params(0.7, 40.0)).unwrap(), Some(payload));
        assert!(cache.get("mistral:7b", &params(0.7, 40.0)).unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.stores, 1);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn typed_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache.set("m", &json!({"num_ctx": 4096}), &(1.5_f64, 20.0_f64, 9.0_f64)).unwrap();
        let probe: Option<(f64, f64, f64)> = cache.get_as("m", &json!({"num_ctx": 4096})).unwrap();
        assert_eq!(probe, Some((1.5, 20.0, 9.0)));
    }

    #[test]
    fn expired_entry_is_purged_on_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let stale = Utc::now() - Duration::hours(25);
        cache
            .set_with_timestamp("m", &params(0.5, 10.0), &json!(0.4), stale)
            .unwrap();
        let key = cache.key("m", &params(0.5, 10.0)).unwrap();
        let path = cache.entry_path(&key);
        assert!(path.exists());

        assert!(cache.get("m", &params(0.5, 10.0)).unwrap().is_none());
        assert!(!path.exists());
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn open_sweeps_expired_and_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path());
            cache.set("m", &params(0.1, 5.0), &json!(1)).unwrap();
            cache
                .set_with_timestamp("m", &params(0.2, 5.0), &json!(2), Utc::now() - Duration::days(3))
                .unwrap();
        }
        fs::write(dir.path().join("garbage.json"), b"{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), b"left alone").unwrap();

        let cache = open(dir.path());
        assert_eq!(cache.disk_stats().unwrap().entries, 1);
        assert!(!dir.path().join("garbage.json").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(cache.get("m", &params(0.1, 5.0)).unwrap().is_some());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let key = cache.key("m", &params(0.3, 8.0)).unwrap();
        fs::write(cache.entry_path(&key), b"[1, 2").unwrap();

        assert!(cache.get("m", &params(0.3, 8.0)).unwrap().is_none());
        assert!(!cache.entry_path(&key).exists());
    }

    #[test]
    fn find_similar_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let now = Utc::now();
        cache
            .set_with_timestamp("m", &params(0.70, 40.0), &json!("old"), now - Duration::hours(2))
            .unwrap();
        cache
            .set_with_timestamp("m", &params(0.71, 41.0), &json!("new"), now - Duration::hours(1))
            .unwrap();
        cache.set("m", &params(1.20, 40.0), &json!("far")).unwrap();
        cache.set("other", &params(0.70, 40.0), &json!("other target")).unwrap();

        let similar = cache.find_similar("m", &params(0.70, 40.0), 0.05).unwrap();
        let payloads: Vec<&Value> = similar.iter().map(|r| &r.payload).collect();
        assert_eq!(payloads, vec![&json!("new"), &json!("old")]);
    }

    #[test]
    fn clear_by_target() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache.set("a", &params(0.1, 1.0), &json!(1)).unwrap();
        cache.set("a", &params(0.2, 1.0), &json!(2)).unwrap();
        cache.set("b", &params(0.1, 1.0), &json!(3)).unwrap();

        assert_eq!(cache.clear(Some("a")).unwrap(), 2);
        let disk = cache.disk_stats().unwrap();
        assert_eq!(disk.entries, 1);
        assert_eq!(disk.targets.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(disk.targets["b"].entries, 1);
        assert_eq!(disk.targets["b"].bytes, disk.total_bytes);

        assert_eq!(cache.clear(None).unwrap(), 1);
        assert_eq!(cache.disk_stats().unwrap(), DiskStats::default());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn overwrite_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache.set("m", &params(0.4, 4.0), &json!(0.1)).unwrap();
        cache.set("m", &params(0.4, 4.0), &json!(0.9)).unwrap();
        assert_eq!(cache.get("m", &params(0.4, 4.0)).unwrap(), Some(json!(0.9)));
        assert_eq!(cache.disk_stats().unwrap().entries, 1);
    }

    #[test]
    fn out_of_range_ttl_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        for ttl_hours in [10_000_000_000_000_000, u64::MAX] {
            let err = ResultCache::open(&CacheConfig::new(dir.path(), ttl_hours)).unwrap_err();
            assert!(matches!(err, at_types::AtError::Config(_)), "{ttl_hours}: {err}");
        }
        let cache = ResultCache::open(&CacheConfig::new(dir.path(), 48)).unwrap();
        assert_eq!(cache.ttl(), Duration::hours(48));
    }
}
