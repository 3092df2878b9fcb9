//! On-disk memoization of extracted tables.
//!
//! An entry is keyed by the computation name, its parameters and the
//! modification times of the files it reads. Each entry is a table file plus
//! a JSON sidecar describing how it was produced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::UNIX_EPOCH;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Hex digits of the digest kept in entry names.
const KEY_LEN: usize = 16;

const TABLE_EXT: &str = "parquet";
const METADATA_EXT: &str = "json";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyStamp {
    pub path: PathBuf,
    /// Seconds and nanoseconds since the epoch; `None` when the file is absent.
    pub modified: Option<(u64, u32)>,
}

impl DependencyStamp {
    fn digest_line(&self) -> String {
        match self.modified {
            Some((secs, nanos)) => format!("{}:{secs}.{nanos:09}\n", self.path.display()),
            None => format!("{}:missing\n", self.path.display()),
        }
    }
}

pub fn dependency_stamps(paths: &[PathBuf]) -> Vec<DependencyStamp> {
    paths
        .iter()
        .map(|path| {
            let modified = std::fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|age| (age.as_secs(), age.subsec_nanos()));
            DependencyStamp {
                path: path.clone(),
                modified,
            }
        })
        .collect()
}

/// Stable key for a computation. Object keys in `params` hash in sorted
/// order and the stamps are hashed sorted by path, so neither insertion order
/// matters.
pub fn cache_key(name: &str, params: &Value, stamps: &[DependencyStamp]) -> String {
    let mut sorted: Vec<&DependencyStamp> = stamps.iter().collect();
    sorted.sort();

    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.to_string().as_bytes());
    hasher.update(b"\n");
    for stamp in sorted {
        hasher.update(stamp.digest_line().as_bytes());
    }
    let mut key = hasher.finalize().to_hex().to_string();
    key.truncate(KEY_LEN);
    key
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub key: String,
    pub params: Value,
    pub dependencies: Vec<DependencyStamp>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheOutcome {
    pub path: PathBuf,
    pub hit: bool,
}

pub struct CacheStore {
    dir: PathBuf,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
        Ok(Self {
            dir,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str, key: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{name}_{key}.{ext}"))
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.entry(key.to_string()).or_default().clone()
    }

    /// Path of the table for this computation, running `compute` to produce
    /// it on a miss. `compute` receives the path it must write. Callers that
    /// ask for the same key concurrently wait for a single computation.
    pub fn get_or_compute<F>(
        &self,
        name: &str,
        params: &Value,
        dependencies: &[PathBuf],
        compute: F,
    ) -> Result<CacheOutcome>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let stamps = dependency_stamps(dependencies);
        let key = cache_key(name, params, &stamps);
        let table = self.entry_path(name, &key, TABLE_EXT);

        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if table.is_file() {
            info!("cache hit: {name} ({key})");
            return Ok(CacheOutcome {
                path: table,
                hit: true,
            });
        }

        info!("cache miss: {name} ({key}), computing");
        compute(&table)?;
        let entry = CacheEntry {
            name: name.to_string(),
            key: key.clone(),
            params: params.clone(),
            dependencies: stamps,
        };
        self.write_metadata(&self.entry_path(name, &key, METADATA_EXT), &entry)?;
        Ok(CacheOutcome {
            path: table,
            hit: false,
        })
    }

    fn write_metadata(&self, path: &Path, entry: &CacheEntry) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|err| Error::io(&self.dir, err))?;
        serde_json::to_writer_pretty(&mut tmp, entry).map_err(|err| Error::io(path, err))?;
        tmp.persist(path).map_err(|err| Error::io(path, err))?;
        Ok(())
    }

    /// Every entry with readable metadata, ordered by name then key.
    pub fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for path in self.files_with_ext(METADATA_EXT)? {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    warn!("skipping {}: {err}", path.display());
                    continue;
                }
            };
            match serde_json::from_str::<CacheEntry>(&text) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("skipping {}: {err}", path.display()),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    /// Deletes entries, only those of computation `name` when given.
    /// Returns how many files were removed.
    pub fn clear(&self, name: Option<&str>) -> Result<usize> {
        let prefix = name.map(|name| format!("{name}_"));
        let mut removed = 0;
        for ext in [TABLE_EXT, METADATA_EXT] {
            for path in self.files_with_ext(ext)? {
                let matches = match (&prefix, path.file_name().and_then(|n| n.to_str())) {
                    (Some(prefix), Some(file_name)) => file_name.starts_with(prefix.as_str()),
                    (None, _) => true,
                    (Some(_), None) => false,
                };
                if !matches {
                    continue;
                }
                std::fs::remove_file(&path).map_err(|err| Error::io(&path, err))?;
                debug!("removed {}", path.display());
                removed += 1;
            }
        }
        info!("cleared {removed} cache files from {}", self.dir.display());
        Ok(removed)
    }

    fn files_with_ext(&self, ext: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in self.dir.read_dir().map_err(|err| Error::io(&self.dir, err))? {
            let path = entry.map_err(|err| Error::io(&self.dir, err))?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn stamp(path: &str, modified: Option<(u64, u32)>) -> DependencyStamp {
        DependencyStamp {
            path: PathBuf::from(path),
            modified,
        }
    }

    #[test]
    fn key_is_stable_and_short() {
        let params = json!({"threshold": 0.2, "region": "DE"});
        let stamps = vec![stamp("/data/de.osm.pbf", Some((100, 5)))];
        let key = cache_key("streets", &params, &stamps);
        assert_eq!(key.len(), KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key("streets", &params, &stamps));
    }

    #[test]
    fn key_ignores_param_and_dependency_order() {
        let a = json!({"threshold": 0.2, "region": "DE"});
        let b = json!({"region": "DE", "threshold": 0.2});
        let forward = vec![stamp("/a", Some((1, 0))), stamp("/b", None)];
        let backward = vec![stamp("/b", None), stamp("/a", Some((1, 0)))];
        assert_eq!(cache_key("streets", &a, &forward), cache_key("streets", &b, &backward));
    }

    #[test]
    fn key_changes_with_inputs() {
        let params = json!({"threshold": 0.2});
        let stamps = vec![stamp("/a", Some((1, 0)))];
        let base = cache_key("streets", &params, &stamps);
        assert_ne!(base, cache_key("other", &params, &stamps));
        assert_ne!(base, cache_key("streets", &json!({"threshold": 0.3}), &stamps));
        assert_ne!(base, cache_key("streets", &params, &[stamp("/a", Some((2, 0)))]));
        assert_ne!(base, cache_key("streets", &params, &[stamp("/a", None)]));
    }

    #[test]
    fn absent_dependencies_are_stamped_missing() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.pbf");
        std::fs::write(&present, "x").unwrap();
        let stamps = dependency_stamps(&[present, dir.path().join("absent.pbf")]);
        assert!(stamps[0].modified.is_some());
        assert_eq!(stamps[1].modified, None);
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache")).unwrap();
        let params = json!({"region": "DE"});
        let calls = AtomicUsize::new(0);
        let compute = |path: &Path| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(path, "street_name\n").map_err(|err| Error::io(path, err))
        };

        let first = store.get_or_compute("streets", &params, &[], compute).unwrap();
        let second = store.get_or_compute("streets", &params, &[], compute).unwrap();
        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(first.path, second.path);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "streets");
        assert_eq!(entries[0].params, params);
    }

    #[test]
    fn failed_computation_is_not_cached() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path()).unwrap();
        let err = store
            .get_or_compute("streets", &json!({}), &[], |_| {
                Err(Error::Config("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_requests_compute_once() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path()).unwrap();
        let params = json!({"region": "DE"});
        let calls = AtomicUsize::new(0);

        let outcomes: Vec<CacheOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        store
                            .get_or_compute("streets", &params, &[], |path| {
                                calls.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(50));
                                std::fs::write(path, "street_name\n").map_err(|err| Error::io(path, err))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|outcome| !outcome.hit).count(), 1);
        assert!(outcomes.iter().all(|outcome| outcome.path == outcomes[0].path));
    }

    #[test]
    fn clear_can_target_one_computation() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path()).unwrap();
        for name in ["streets", "summary"] {
            store
                .get_or_compute(name, &json!({}), &[], |path| {
                    std::fs::write(path, "x").map_err(|err| Error::io(path, err))
                })
                .unwrap();
        }

        assert_eq!(store.clear(Some("summary")).unwrap(), 2);
        let names: Vec<String> = store.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["streets".to_string()]);
        assert_eq!(store.clear(None).unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }
}
