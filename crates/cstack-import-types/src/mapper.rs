//! Checkpoint Store: the mapper files
//!
//! `mapper/<module>/uid-mapping.json` is the system's only persistent
//! mutable state. Once a source UID appears in a module's mapping it is
//! never re-created on a later run; it is skipped or looked up for update.
//!
//! Mappers are loaded fully into memory at module start and flushed after
//! every batch. A crash therefore loses at most one batch's worth of
//! recorded progress; the re-run re-attempts those items and leans on the
//! API's duplicate detection, which gives the system at-least-once
//! semantics for the unflushed tail of a batch.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cstack_core::constants::{FAILS_FILE, SUCCESS_FILE, UID_MAPPING_FILE};
use cstack_core::{CoreResult, FileStore};

use crate::modules::ModuleKind;

/// One audit line in `success.json` / `fails.json` (informational only,
/// never consulted for resume logic)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub uid: String,
    pub message: String,
    pub recorded_at: chrono::DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Hands out per-module mappers and side files rooted at `<backup>/mapper/`
#[derive(Debug, Clone)]
pub struct MapperStore {
    store: FileStore,
}

impl MapperStore {
    /// `root` is the mapper directory itself (`<backup_dir>/mapper`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: FileStore::new(root),
        }
    }

    fn rel(module: ModuleKind, file: &str) -> PathBuf {
        PathBuf::from(module.as_str()).join(file)
    }

    /// The module's primary source-UID -> destination-UID mapping
    pub async fn uid_mapper(&self, module: ModuleKind) -> CoreResult<UidMapper> {
        self.named_mapper(module, UID_MAPPING_FILE).await
    }

    /// A secondary string->string mapping (url-mapping, folder-mapping, ...)
    pub async fn named_mapper(&self, module: ModuleKind, file: &str) -> CoreResult<UidMapper> {
        let rel = Self::rel(module, file);
        let map = self
            .store
            .read_json_opt::<HashMap<String, String>>(&rel)
            .await?
            .unwrap_or_default();
        debug!(module = %module, file, entries = map.len(), "Loaded mapper file");
        Ok(UidMapper {
            store: self.store.clone(),
            rel,
            map,
        })
    }

    /// Append audit records to `success.json`
    pub async fn record_success(
        &self,
        module: ModuleKind,
        records: &[AuditRecord],
    ) -> CoreResult<()> {
        self.append(module, SUCCESS_FILE, records).await
    }

    /// Append audit records to `fails.json`
    pub async fn record_failure(
        &self,
        module: ModuleKind,
        records: &[AuditRecord],
    ) -> CoreResult<()> {
        self.append(module, FAILS_FILE, records).await
    }

    async fn append(
        &self,
        module: ModuleKind,
        file: &str,
        records: &[AuditRecord],
    ) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let rel = Self::rel(module, file);
        let mut existing = self
            .store
            .read_json_opt::<Vec<AuditRecord>>(&rel)
            .await?
            .unwrap_or_default();
        existing.extend_from_slice(records);
        self.store.write_json(&rel, &existing).await
    }

    /// Write an arbitrary side file (pending-publish, field rules, details)
    pub async fn write_side(&self, module: ModuleKind, file: &str, value: &Value) -> CoreResult<()> {
        self.store.write_json(Self::rel(module, file), value).await
    }

    /// Read a side file, `None` if it has not been written yet
    pub async fn read_side(&self, module: ModuleKind, file: &str) -> CoreResult<Option<Value>> {
        self.store.read_json_opt(Self::rel(module, file)).await
    }
}

/// An in-memory source->destination mapping backed by one JSON file
#[derive(Debug)]
pub struct UidMapper {
    store: FileStore,
    rel: PathBuf,
    map: HashMap<String, String>,
}

impl UidMapper {
    /// Whether this source UID was already imported on a previous run/batch
    pub fn has_imported(&self, source_uid: &str) -> bool {
        self.map.contains_key(source_uid)
    }

    pub fn get(&self, source_uid: &str) -> Option<&str> {
        self.map.get(source_uid).map(String::as_str)
    }

    /// Record a mapping. Recording the same source UID twice overwrites.
    pub fn record(&mut self, source_uid: impl Into<String>, dest_uid: impl Into<String>) {
        self.map.insert(source_uid.into(), dest_uid.into());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn mappings(&self) -> &HashMap<String, String> {
        &self.map
    }

    /// Persist the mapping (atomic write-then-rename)
    pub async fn flush(&self) -> CoreResult<()> {
        self.store.write_json(&self.rel, &self.map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper_store() -> (tempfile::TempDir, MapperStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MapperStore::new(dir.path().join("mapper"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_record_flush_reload() {
        let (_dir, mappers) = mapper_store();

        let mut mapper = mappers.uid_mapper(ModuleKind::Entries).await.unwrap();
        assert!(mapper.is_empty());

        mapper.record("src1", "dst1");
        mapper.record("src2", "dst2");
        mapper.flush().await.unwrap();

        let reloaded = mappers.uid_mapper(ModuleKind::Entries).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.has_imported("src1"));
        assert_eq!(reloaded.get("src2"), Some("dst2"));
    }

    #[tokio::test]
    async fn test_record_is_idempotent_overwrite() {
        let (_dir, mappers) = mapper_store();

        let mut mapper = mappers.uid_mapper(ModuleKind::Assets).await.unwrap();
        mapper.record("src", "first");
        mapper.record("src", "second");

        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.get("src"), Some("second"));
    }

    #[tokio::test]
    async fn test_modules_have_independent_mappers() {
        let (_dir, mappers) = mapper_store();

        let mut entries = mappers.uid_mapper(ModuleKind::Entries).await.unwrap();
        entries.record("uid", "entry_dest");
        entries.flush().await.unwrap();

        let assets = mappers.uid_mapper(ModuleKind::Assets).await.unwrap();
        assert!(!assets.has_imported("uid"));
    }

    #[tokio::test]
    async fn test_audit_append_accumulates() {
        let (_dir, mappers) = mapper_store();

        mappers
            .record_failure(ModuleKind::Entries, &[AuditRecord::new("e1", "boom")])
            .await
            .unwrap();
        mappers
            .record_failure(ModuleKind::Entries, &[AuditRecord::new("e2", "bang")])
            .await
            .unwrap();

        let side = mappers
            .read_side(ModuleKind::Entries, FAILS_FILE)
            .await
            .unwrap()
            .unwrap();
        let records = side.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["uid"], "e2");
    }
}
