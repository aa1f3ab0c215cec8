//! The module catalogue and its fixed dependency order

use serde::{Deserialize, Serialize};

use crate::error::ImportError;

/// One importable content category.
///
/// The string form of each variant doubles as the backup-tree directory
/// name and the mapper subdirectory name, so it is part of the on-disk
/// contract with the export side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Locales,
    Environments,
    Extensions,
    MarketplaceApps,
    GlobalFields,
    ContentTypes,
    Workflows,
    Assets,
    Entries,
    Labels,
    CustomRoles,
    Webhooks,
    Personalize,
    Releases,
    Publish,
}

/// Fixed total order modules run in. Locales, environments, extensions and
/// global fields precede content types; content types precede assets and
/// entries; publish is last so its failures never block content creation.
pub const IMPORT_ORDER: [ModuleKind; 15] = [
    ModuleKind::Locales,
    ModuleKind::Environments,
    ModuleKind::Extensions,
    ModuleKind::MarketplaceApps,
    ModuleKind::GlobalFields,
    ModuleKind::ContentTypes,
    ModuleKind::Workflows,
    ModuleKind::Assets,
    ModuleKind::Entries,
    ModuleKind::Labels,
    ModuleKind::CustomRoles,
    ModuleKind::Webhooks,
    ModuleKind::Personalize,
    ModuleKind::Releases,
    ModuleKind::Publish,
];

impl ModuleKind {
    /// Directory/mapper name for this module
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Locales => "locales",
            ModuleKind::Environments => "environments",
            ModuleKind::Extensions => "extensions",
            ModuleKind::MarketplaceApps => "marketplace_apps",
            ModuleKind::GlobalFields => "global_fields",
            ModuleKind::ContentTypes => "content_types",
            ModuleKind::Workflows => "workflows",
            ModuleKind::Assets => "assets",
            ModuleKind::Entries => "entries",
            ModuleKind::Labels => "labels",
            ModuleKind::CustomRoles => "custom_roles",
            ModuleKind::Webhooks => "webhooks",
            ModuleKind::Personalize => "personalize",
            ModuleKind::Releases => "releases",
            ModuleKind::Publish => "publish",
        }
    }

    /// Default single-object file name inside the module directory
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }

    pub fn parse(s: &str) -> Result<Self, ImportError> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "locales" => Ok(ModuleKind::Locales),
            "environments" => Ok(ModuleKind::Environments),
            "extensions" => Ok(ModuleKind::Extensions),
            "marketplace_apps" => Ok(ModuleKind::MarketplaceApps),
            "global_fields" => Ok(ModuleKind::GlobalFields),
            "content_types" => Ok(ModuleKind::ContentTypes),
            "workflows" => Ok(ModuleKind::Workflows),
            "assets" => Ok(ModuleKind::Assets),
            "entries" => Ok(ModuleKind::Entries),
            "labels" => Ok(ModuleKind::Labels),
            "custom_roles" => Ok(ModuleKind::CustomRoles),
            "webhooks" => Ok(ModuleKind::Webhooks),
            "personalize" => Ok(ModuleKind::Personalize),
            "releases" => Ok(ModuleKind::Releases),
            "publish" => Ok(ModuleKind::Publish),
            other => Err(ImportError::UnknownModule(other.to_string())),
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
