//! File Store Adapter
//!
//! All reads and writes against the backup tree and the mapper directory go
//! through this adapter so the whole pipeline shares one async I/O model.
//! Large modules (entries, assets) use a chunked layout: an `index.json`
//! mapping chunk number to item count, plus numbered chunk files each
//! holding a JSON object keyed by UID.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::CHUNK_INDEX_FILE;
use crate::error::{CoreError, CoreResult};

/// Async adapter over an on-disk JSON tree
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a location relative to the store root
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    pub async fn exists(&self, rel: impl AsRef<Path>) -> bool {
        tokio::fs::try_exists(self.path(rel)).await.unwrap_or(false)
    }

    pub async fn ensure_dir(&self, rel: impl AsRef<Path>) -> CoreResult<()> {
        let path = self.path(rel);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| CoreError::io(path, e))
    }

    /// Read and deserialize a JSON file
    pub async fn read_json<T: DeserializeOwned>(&self, rel: impl AsRef<Path>) -> CoreResult<T> {
        let path = self.path(rel);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::NotFound { path: path.clone() }
            } else {
                CoreError::io(path.clone(), e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| CoreError::json(path, e))
    }

    /// Read a JSON file, returning `None` when it does not exist
    pub async fn read_json_opt<T: DeserializeOwned>(
        &self,
        rel: impl AsRef<Path>,
    ) -> CoreResult<Option<T>> {
        match self.read_json(rel).await {
            Ok(value) => Ok(Some(value)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and write a JSON file atomically (write temp, then rename)
    pub async fn write_json<T: Serialize>(
        &self,
        rel: impl AsRef<Path>,
        value: &T,
    ) -> CoreResult<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::io(parent.to_path_buf(), e))?;
        }
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| CoreError::json(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CoreError::io(tmp.clone(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CoreError::io(path, e))
    }

    /// Read raw bytes (asset binaries)
    pub async fn read_bytes(&self, rel: impl AsRef<Path>) -> CoreResult<Vec<u8>> {
        let path = self.path(rel);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::NotFound { path: path.clone() }
            } else {
                CoreError::io(path, e)
            }
        })
    }

    /// List immediate subdirectory names of a directory
    pub async fn list_dirs(&self, rel: impl AsRef<Path>) -> CoreResult<Vec<String>> {
        let path = self.path(rel);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(CoreError::io(path, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(path.clone(), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CoreError::io(entry.path(), e))?;
            if file_type.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// List immediate file names of a directory
    pub async fn list_files(&self, rel: impl AsRef<Path>) -> CoreResult<Vec<String>> {
        let path = self.path(rel);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(CoreError::io(path, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(path.clone(), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CoreError::io(entry.path(), e))?;
            if file_type.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read a possibly-chunked module file into one keyed object.
    ///
    /// If `<dir>/<index_name>` exists, every numbered chunk listed in it is
    /// read and merged; otherwise `<dir>/<file_name>` is read directly. A
    /// missing module yields an empty map rather than an error, since a
    /// backup tree only contains directories for exported modules.
    pub async fn read_chunked(
        &self,
        dir: impl AsRef<Path>,
        file_name: &str,
    ) -> CoreResult<Map<String, Value>> {
        let dir = dir.as_ref();
        let index_rel = dir.join(CHUNK_INDEX_FILE);

        if self.exists(&index_rel).await {
            let index_path = self.path(&index_rel);
            let index: BTreeMap<String, Value> = self.read_json(&index_rel).await?;
            let mut merged = Map::new();
            for chunk_no in index.keys() {
                // Chunk numbers must be numeric file stems
                chunk_no.parse::<u64>().map_err(|_| CoreError::ChunkIndex {
                    path: index_path.clone(),
                    message: format!("non-numeric chunk key '{}'", chunk_no),
                })?;
                let chunk_rel = dir.join(format!("{}.json", chunk_no));
                let chunk: Map<String, Value> = self.read_json(&chunk_rel).await?;
                debug!(chunk = %chunk_no, items = chunk.len(), "Merged chunk file");
                merged.extend(chunk);
            }
            return Ok(merged);
        }

        match self
            .read_json_opt::<Map<String, Value>>(dir.join(file_name))
            .await?
        {
            Some(map) => Ok(map),
            None => Ok(Map::new()),
        }
    }

    /// Write a keyed object into the chunked layout: `index.json` plus
    /// `1.json..n.json`, each chunk holding at most `chunk_size` items.
    pub async fn write_chunked(
        &self,
        dir: impl AsRef<Path>,
        items: &Map<String, Value>,
        chunk_size: usize,
    ) -> CoreResult<()> {
        let dir = dir.as_ref();
        let chunk_size = chunk_size.max(1);
        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        let mut chunk_no = 0u64;
        let keys: Vec<&String> = items.keys().collect();

        for window in keys.chunks(chunk_size) {
            chunk_no += 1;
            let mut chunk = Map::new();
            for key in window {
                chunk.insert((*key).clone(), items[*key].clone());
            }
            index.insert(chunk_no.to_string(), chunk.len());
            self.write_json(dir.join(format!("{}.json", chunk_no)), &Value::Object(chunk))
                .await?;
        }

        self.write_json(dir.join(CHUNK_INDEX_FILE), &index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_read_json_round_trip() {
        let (_dir, store) = store();

        store
            .write_json("locales/locales.json", &json!({"en-us": {"code": "en-us"}}))
            .await
            .unwrap();

        let value: Value = store.read_json("locales/locales.json").await.unwrap();
        assert_eq!(value["en-us"]["code"], "en-us");
    }

    #[tokio::test]
    async fn test_read_json_opt_missing_file() {
        let (_dir, store) = store();

        let value: Option<Value> = store.read_json_opt("missing.json").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_read_chunked_merges_numbered_chunks() {
        let (_dir, store) = store();

        store
            .write_json("entries/index.json", &json!({"1": 2, "2": 1}))
            .await
            .unwrap();
        store
            .write_json("entries/1.json", &json!({"e1": {"title": "one"}, "e2": {"title": "two"}}))
            .await
            .unwrap();
        store
            .write_json("entries/2.json", &json!({"e3": {"title": "three"}}))
            .await
            .unwrap();

        let merged = store.read_chunked("entries", "entries.json").await.unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["e3"]["title"], "three");
    }

    #[tokio::test]
    async fn test_read_chunked_falls_back_to_single_file() {
        let (_dir, store) = store();

        store
            .write_json("environments/environments.json", &json!({"env1": {"name": "production"}}))
            .await
            .unwrap();

        let merged = store
            .read_chunked("environments", "environments.json")
            .await
            .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["env1"]["name"], "production");
    }

    #[tokio::test]
    async fn test_read_chunked_missing_module_is_empty() {
        let (_dir, store) = store();

        let merged = store.read_chunked("webhooks", "webhooks.json").await.unwrap();
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_write_chunked_round_trip() {
        let (_dir, store) = store();

        let mut items = Map::new();
        for i in 0..5 {
            items.insert(format!("uid{}", i), json!({"n": i}));
        }

        store.write_chunked("assets", &items, 2).await.unwrap();

        let index: BTreeMap<String, usize> = store.read_json("assets/index.json").await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index["1"], 2);
        assert_eq!(index["3"], 1);

        let merged = store.read_chunked("assets", "assets.json").await.unwrap();
        assert_eq!(merged.len(), 5);
    }

    #[tokio::test]
    async fn test_list_dirs_sorted() {
        let (_dir, store) = store();
        store.ensure_dir("entries/blog").await.unwrap();
        store.ensure_dir("entries/author").await.unwrap();

        let dirs = store.list_dirs("entries").await.unwrap();
        assert_eq!(dirs, vec!["author".to_string(), "blog".to_string()]);
    }
}
