use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::HarvestError;
use crate::store::Store;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    RawPages,
    Citations,
    ShortDoi,
    Search,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 4] = [
        CacheDomain::RawPages,
        CacheDomain::Citations,
        CacheDomain::ShortDoi,
        CacheDomain::Search,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CacheDomain::RawPages => "figshare",
            CacheDomain::Citations => "citations",
            CacheDomain::ShortDoi => "shortdoi",
            CacheDomain::Search => "crossref",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}_cache.json", self.name())
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile<M> {
    version: u32,
    domain: String,
    entries: M,
}

#[derive(Debug)]
pub struct CacheStore<V> {
    domain: CacheDomain,
    path: Utf8PathBuf,
    entries: BTreeMap<String, V>,
    force_refresh: bool,
}

impl<V> CacheStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Opens the cache at `path`. With `force_refresh` every read misses but
    /// writes still go to disk.
    pub fn open(domain: CacheDomain, path: impl Into<Utf8PathBuf>, force_refresh: bool) -> Self {
        let path = path.into();
        let entries = match load_entries(domain, &path) {
            Ok(entries) => {
                info!(
                    cache = %domain,
                    path = %path,
                    entries = entries.len(),
                    "loaded cache"
                );
                entries
            }
            Err(err) => {
                warn!(cache = %domain, "{err}; starting with an empty cache");
                BTreeMap::new()
            }
        };
        Self {
            domain,
            path,
            entries,
            force_refresh,
        }
    }

    pub fn open_in(store: &Store, domain: CacheDomain, force_refresh: bool) -> Self {
        Self::open(domain, store.cache_path(domain), force_refresh)
    }

    pub fn domain(&self) -> CacheDomain {
        self.domain
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        if self.force_refresh {
            return None;
        }
        let hit = self.entries.get(key);
        debug!(cache = %self.domain, key, hit = hit.is_some(), "cache lookup");
        hit
    }

    pub fn contains(&self, key: &str) -> bool {
        !self.force_refresh && self.entries.contains_key(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) -> Result<(), HarvestError> {
        self.entries.insert(key.into(), value);
        self.persist()
    }

    fn persist(&self) -> Result<(), HarvestError> {
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            domain: self.domain.name().to_string(),
            entries: &self.entries,
        };
        let content =
            serde_json::to_vec(&file).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&self.path, &content)
    }

    pub fn put_logged(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Err(err) = self.put(key.clone(), value) {
            warn!(cache = %self.domain, key = %key, "failed to persist cache entry: {err}");
        }
    }
}

fn load_entries<V: DeserializeOwned>(
    domain: CacheDomain,
    path: &Utf8Path,
) -> Result<BTreeMap<String, V>, HarvestError> {
    let corrupted = |reason: String| HarvestError::CorruptedCache {
        path: path.as_std_path().to_path_buf(),
        reason,
    };
    let content = match fs::read(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(cache = %domain, path = %path, "no cache file yet");
            return Ok(BTreeMap::new());
        }
        Err(err) => return Err(corrupted(err.to_string())),
    };
    let file: CacheFile<BTreeMap<String, V>> =
        serde_json::from_slice(&content).map_err(|err| corrupted(err.to_string()))?;
    if file.version != CACHE_FORMAT_VERSION {
        return Err(corrupted(format!("unsupported version {}", file.version)));
    }
    if file.domain != domain.name() {
        return Err(corrupted(format!(
            "belongs to cache domain {:?}",
            file.domain
        )));
    }
    Ok(file.entries)
}
