use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::Builder;

use crate::cache::CacheDomain;
use crate::error::HarvestError;

#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, HarvestError> {
        let cwd = std::env::current_dir().map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let output_root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| HarvestError::Filesystem("invalid working directory path".to_string()))?;
        let cache_root = output_root.join(".bibharvest").join("cache");
        Ok(Self {
            cache_root,
            output_root,
        })
    }

    pub fn global() -> Result<Self, HarvestError> {
        let mut store = Self::new()?;
        store.cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("bibharvest")).ok()
            })
            .ok_or_else(|| {
                HarvestError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(store)
    }

    pub fn new_with_paths(cache_root: Utf8PathBuf, output_root: Utf8PathBuf) -> Self {
        Self {
            cache_root,
            output_root,
        }
    }

    pub fn with_cache_root(mut self, cache_root: Utf8PathBuf) -> Self {
        self.cache_root = cache_root;
        self
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn cache_path(&self, domain: CacheDomain) -> Utf8PathBuf {
        self.cache_root.join(domain.file_name())
    }

    pub fn output_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_root.join(path)
        }
    }

    pub fn ensure_cache_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn clear_caches(&self) -> Result<Vec<Utf8PathBuf>, HarvestError> {
        let mut removed = Vec::new();
        for domain in CacheDomain::ALL {
            let path = self.cache_path(domain);
            if path.as_std_path().exists() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".bibharvest-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
