use crate::config::CacheConfig;
use crate::model::Ad;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One cached parse result together with its storage time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    ads: Vec<Ad>,
    /// Milliseconds since the Unix epoch
    timestamp: u64,
}

impl CacheEntry {
    fn new(ads: Vec<Ad>) -> Self {
        Self {
            ads,
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time-expiring key -> ad-list cache.
///
/// Memory-first, with optional one-file-per-key JSON persistence. Expired or
/// corrupt entries are treated as misses and removed on read; they never
/// surface as errors. All operations are safe under concurrent access.
pub struct AdCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    config: CacheConfig,
}

impl AdCache {
    pub fn new(config: CacheConfig) -> Self {
        let cache = Self {
            entries: Mutex::new(HashMap::new()),
            config,
        };
        cache.setup();
        cache
    }

    fn setup(&self) {
        if let Some(dir) = &self.config.dir {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("Failed to create cache dir {}: {e}", dir.display());
            }
        }
        self.sweep_expired();
    }

    pub fn put(&self, key: &str, ads: Vec<Ad>) {
        let entry = CacheEntry::new(ads);

        if let Some(path) = self.entry_path(key) {
            match serde_json::to_string(&entry) {
                Ok(json) => {
                    // Write-then-rename so a concurrent reader never sees a
                    // partially written entry
                    let tmp = path.with_extension("json.tmp");
                    if let Err(e) = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, &path)) {
                        warn!("Failed to persist cache entry {}: {e}", path.display());
                    }
                }
                Err(e) => warn!("Failed to encode cache entry for {key}: {e}"),
            }
        }

        self.entries.lock().unwrap().insert(key.to_string(), entry);
        self.enforce_max_size();
    }

    pub fn get(&self, key: &str) -> Option<Vec<Ad>> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(key) {
                if self.is_valid(entry) {
                    return Some(entry.ads.clone());
                }
                entries.remove(key);
            }
        }

        // Memory miss; the entry may still be on disk from a prior run
        let path = self.entry_path(key)?;
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry>(&text) {
            Ok(entry) if self.is_valid(&entry) => {
                let ads = entry.ads.clone();
                self.entries.lock().unwrap().insert(key.to_string(), entry);
                Some(ads)
            }
            Ok(_) => {
                debug!("Cache entry expired for key {key}");
                let _ = fs::remove_file(&path);
                None
            }
            Err(e) => {
                warn!("Corrupt cache entry for key {key}: {e}");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        if let Some(dir) = &self.config.dir {
            for file in list_entry_files(dir) {
                let _ = fs::remove_file(file);
            }
        }
    }

    fn is_valid(&self, entry: &CacheEntry) -> bool {
        now_millis().saturating_sub(entry.timestamp) < self.config.expiration.as_millis() as u64
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.config.dir.as_ref().map(|dir| dir.join(format!("{key}.json")))
    }

    /// Drops persisted entries oldest-by-modified-time until the configured
    /// size budget holds again.
    fn enforce_max_size(&self) {
        let (Some(dir), Some(max_size)) = (&self.config.dir, self.config.max_size_bytes) else {
            return;
        };

        let mut files: Vec<(PathBuf, u64, SystemTime)> = list_entry_files(dir)
            .into_iter()
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok()?;
                let modified = meta.modified().ok()?;
                Some((path, meta.len(), modified))
            })
            .collect();
        files.sort_by_key(|(_, _, modified)| *modified);

        let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
        for (path, len, _) in files {
            if total <= max_size {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total -= len;
                if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                    self.entries.lock().unwrap().remove(key);
                }
            }
        }
    }

    fn sweep_expired(&self) {
        {
            let mut entries = self.entries.lock().unwrap();
            let expiration = self.config.expiration.as_millis() as u64;
            let now = now_millis();
            entries.retain(|_, e| now.saturating_sub(e.timestamp) < expiration);
        }
        if let Some(dir) = &self.config.dir {
            for path in list_entry_files(dir) {
                let stale = match fs::read_to_string(&path) {
                    Ok(text) => match serde_json::from_str::<CacheEntry>(&text) {
                        Ok(entry) => !self.is_valid(&entry),
                        Err(_) => true,
                    },
                    Err(_) => true,
                };
                if stale {
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

fn list_entry_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|rd| {
            rd.flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect()
        })
        .unwrap_or_default()
}
