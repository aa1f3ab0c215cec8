//! Execution context for import runs
//!
//! One `ImportContext` is constructed per run and passed by reference into
//! every module importer and the batch executor. Shared state that earlier
//! modules produce for later ones (master locale, environment map,
//! installed extensions) lives behind an async `RwLock` on the context —
//! there is no ambient global state in the pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use cstack_api::ManagementApi;
use cstack_core::constants::MAPPER_DIR;
use cstack_core::FileStore;

use crate::mapper::MapperStore;
use crate::modules::ModuleKind;

/// Settings for one import run
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Backup tree to replay (read-only)
    pub data_dir: PathBuf,
    /// Where mapper state lives; defaults to the data dir itself
    pub backup_dir: Option<PathBuf>,
    /// Restrict the run to a single module
    pub module_filter: Option<ModuleKind>,
    /// Upper bound on items fetched/written per API page; the entries
    /// importer derives its batch size from this (`batch_limit / 3`)
    pub batch_limit: usize,
    /// Bounded in-flight count for general batches (entries, assets)
    pub concurrency: usize,
    /// Lower bound for folder creation, where level ordering makes high
    /// parallelism unsafe
    pub folder_concurrency: usize,
    /// Re-parent all imported asset folders under a fresh Import-<ts> root
    pub replace_existing: bool,
    /// Skip the deferred publish phase entirely
    pub skip_publish: bool,
    /// Import webhooks in a disabled state
    pub disable_webhooks: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            backup_dir: None,
            module_filter: None,
            batch_limit: 100,
            concurrency: 5,
            folder_concurrency: 3,
            replace_existing: false,
            skip_publish: false,
            disable_webhooks: false,
        }
    }
}

impl ImportConfig {
    /// Entries are created in smaller batches than they are read in
    pub fn entry_batch_size(&self) -> usize {
        (self.batch_limit / 3).max(1)
    }

    /// Directory holding mapper state for this run
    pub fn mapper_root(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.clone())
            .join(MAPPER_DIR)
    }
}

/// Destination environment resolved from the environments module
#[derive(Debug, Clone)]
pub struct EnvironmentTarget {
    pub uid: String,
    pub name: String,
}

/// State produced by earlier modules and consumed by later ones
#[derive(Debug, Default)]
pub struct SharedState {
    /// Master locale of the destination stack (conceptually first in every
    /// per-locale loop)
    pub master_locale: String,
    /// Source environment UID -> destination environment
    pub environments: HashMap<String, EnvironmentTarget>,
    /// Source extension UID -> destination extension UID (includes
    /// marketplace app installation UIDs)
    pub extension_uids: HashMap<String, String>,
    /// Personalize project UID created during this run, if any
    pub personalize_project_uid: Option<String>,
}

/// Everything a module importer needs for one run
pub struct ImportContext {
    pub config: ImportConfig,
    /// Read side: the backup tree
    pub store: FileStore,
    /// Write side: the mapper directory
    pub mappers: MapperStore,
    pub api: Arc<dyn ManagementApi>,
    pub state: RwLock<SharedState>,
}

impl ImportContext {
    pub fn new(config: ImportConfig, api: Arc<dyn ManagementApi>) -> Self {
        let store = FileStore::new(&config.data_dir);
        let mappers = MapperStore::new(config.mapper_root());
        Self {
            config,
            store,
            mappers,
            api,
            state: RwLock::new(SharedState::default()),
        }
    }

    /// Locales to iterate for entry creation, master locale first
    pub async fn ordered_locales(&self, mut locales: Vec<String>) -> Vec<String> {
        let master = self.state.read().await.master_locale.clone();
        locales.sort();
        if let Some(pos) = locales.iter().position(|l| *l == master) {
            let master = locales.remove(pos);
            locales.insert(0, master);
        }
        locales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_batch_size_floor() {
        let mut config = ImportConfig::default();
        config.batch_limit = 2;
        assert_eq!(config.entry_batch_size(), 1);

        config.batch_limit = 100;
        assert_eq!(config.entry_batch_size(), 33);
    }

    #[test]
    fn test_mapper_root_prefers_backup_dir() {
        let mut config = ImportConfig::default();
        config.data_dir = PathBuf::from("/data/export");
        assert_eq!(config.mapper_root(), PathBuf::from("/data/export/mapper"));

        config.backup_dir = Some(PathBuf::from("/tmp/backup"));
        assert_eq!(config.mapper_root(), PathBuf::from("/tmp/backup/mapper"));
    }
}
