//! On-disk cache of the raw record sequence

use crate::error::CacheError;
use crate::source::RecordCache;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Stores the raw records verbatim as one JSON list file
pub struct JsonFileCache {
    path: PathBuf,
    ttl: Option<Duration>,
    refresh: bool,
}

impl JsonFileCache {
    pub fn new<P: AsRef<Path>>(path: P, ttl: Option<Duration>) -> Self {
        JsonFileCache {
            path: path.as_ref().to_path_buf(),
            ttl,
            refresh: false,
        }
    }

    /// Ignore existing cache contents; the next store still overwrites them
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn is_stale(&self, metadata: &std::fs::Metadata) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match metadata.modified().ok().and_then(|modified| modified.elapsed().ok()) {
            Some(age) => age > ttl,
            // Modification times in the future count as fresh
            None => false,
        }
    }
}

impl RecordCache for JsonFileCache {
    fn load_cached(&self) -> Result<Option<Vec<Value>>, CacheError> {
        if self.refresh {
            debug!(path = %self.path.display(), "Refresh requested, ignoring cache");
            return Ok(None);
        }

        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cache file");
                return Ok(None);
            }
            Err(err) => return Err(self.io_err(err)),
        };

        if self.is_stale(&metadata) {
            info!(path = %self.path.display(), "Cache file is older than its TTL");
            return Ok(None);
        }

        let records = read_records(&self.path)?;
        Ok(Some(records))
    }

    fn store_cache(&self, records: &[Value]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| self.io_err(err))?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let file = File::create(&tmp_path).map_err(|err| self.io_err(err))?;
        let mut writer = BufWriter::new(file);
        let written = serde_json::to_writer(&mut writer, records)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.flush());
        drop(writer);
        let written = written.and_then(|()| std::fs::rename(&tmp_path, &self.path));
        if let Err(err) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(self.io_err(err));
        }

        info!(path = %self.path.display(), records = records.len(), "Stored records in cache");
        Ok(())
    }
}

/// Read a JSON list of records from `path`
///
/// Parsing tries simd-json first and falls back to serde_json, which also
/// produces the error reported for malformed files.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Value>, CacheError> {
    let path = path.as_ref();
    let content = std::fs::read(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // simd-json parses in place, so keep the original bytes for the fallback
    let mut scratch = content.clone();
    match simd_json::serde::from_slice::<Vec<Value>>(&mut scratch) {
        Ok(records) => {
            debug!(path = %path.display(), records = records.len(), "Parsed records with simd-json");
            Ok(records)
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "simd-json parse failed, retrying with serde_json");
            serde_json::from_slice(&content).map_err(|source| CacheError::Malformed {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("food.json"), None);
        assert!(cache.load_cached().unwrap().is_none());
    }

    #[test]
    fn test_store_then_load_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("nested/food.json"), None);
        let records = vec![
            json!({"fdcId": 1, "description": "Apple", "foodNutrients": [{"number": "203", "amount": 0.26}]}),
            json!({"fdcId": 2, "ndbNumber": 9003, "foodNutrients": []}),
        ];

        cache.store_cache(&records).unwrap();
        let loaded = cache.load_cached().unwrap().unwrap();

        assert_eq!(loaded, records);
        let keys: Vec<_> = loaded[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["fdcId", "description", "foodNutrients"]);
    }

    #[test]
    fn test_refresh_ignores_existing_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food.json");
        JsonFileCache::new(&path, None).store_cache(&[json!({"fdcId": 1})]).unwrap();

        let cache = JsonFileCache::new(&path, None).refresh(true);
        assert!(cache.load_cached().unwrap().is_none());
    }

    #[test]
    fn test_fresh_cache_within_ttl_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food.json");
        let cache = JsonFileCache::new(&path, Some(Duration::from_secs(3600)));
        cache.store_cache(&[json!({"fdcId": 1})]).unwrap();

        assert_eq!(cache.load_cached().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_store_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food.json");
        // A directory in the way makes the final rename fail
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let err = JsonFileCache::new(&path, None)
            .store_cache(&[json!({"fdcId": 1})])
            .unwrap_err();

        assert!(matches!(err, CacheError::Io { .. }));
        assert!(!dir.path().join("food.json.tmp").exists());
    }

    #[test]
    fn test_malformed_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food.json");
        std::fs::write(&path, r#"{"error": "not a list"}"#).unwrap();

        let err = JsonFileCache::new(&path, None).load_cached().unwrap_err();
        assert!(matches!(err, CacheError::Malformed { .. }));
    }
}
