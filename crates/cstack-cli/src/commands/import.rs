use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::{info, warn};

use cstack_api::{CsClient, CsClientConfig};
use cstack_import::ImportOrchestrator;
use cstack_import_types::{ImportConfig, ImportContext, ModuleKind};

#[derive(Args)]
pub struct ImportCommand {
    /// Backup directory holding the exported stack content
    #[arg(long, short = 'd')]
    data_dir: PathBuf,

    /// Alternate directory for mapper files and checkpoints
    /// (defaults to <data-dir>)
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Import a single module instead of the full ordered run
    #[arg(long, short = 'm')]
    module: Option<String>,

    /// Management API base URL
    #[arg(
        long,
        default_value = "https://api.contentstack.io",
        env = "CSTACK_API_HOST"
    )]
    api_host: String,

    /// Destination stack API key
    #[arg(long, short = 'k', env = "CSTACK_API_KEY")]
    stack_api_key: String,

    /// Management token for the destination stack
    #[arg(long, short = 'a', env = "CSTACK_MANAGEMENT_TOKEN")]
    management_token: String,

    /// Branch to import into
    #[arg(long, env = "CSTACK_BRANCH")]
    branch: Option<String>,

    /// Maximum items read per batch
    #[arg(long, default_value_t = 100)]
    batch_limit: usize,

    /// Concurrent API writes per batch
    #[arg(long, default_value_t = 5)]
    concurrency: usize,

    /// Concurrent folder creations per tree level
    #[arg(long, default_value_t = 3)]
    folder_concurrency: usize,

    /// Upload assets under a fresh dated root folder instead of
    /// merging into existing folders
    #[arg(long)]
    replace_existing: bool,

    /// Skip the final publish pass
    #[arg(long)]
    skip_publish: bool,

    /// Create webhooks in a disabled state
    #[arg(long)]
    disable_webhooks: bool,
}

impl ImportCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let module_filter = match &self.module {
            Some(name) => Some(ModuleKind::parse(name)?),
            None => None,
        };

        let mut client_config = CsClientConfig::new(
            &self.api_host,
            &self.stack_api_key,
            &self.management_token,
        );
        client_config.branch = self.branch.clone();
        let api = CsClient::new(client_config)?;

        let config = ImportConfig {
            data_dir: self.data_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            module_filter,
            batch_limit: self.batch_limit,
            concurrency: self.concurrency,
            folder_concurrency: self.folder_concurrency,
            replace_existing: self.replace_existing,
            skip_publish: self.skip_publish,
            disable_webhooks: self.disable_webhooks,
        };

        info!(
            data_dir = %self.data_dir.display(),
            module = self.module.as_deref().unwrap_or("all"),
            "Starting import"
        );

        let ctx = ImportContext::new(config, Arc::new(api));
        let orchestrator = ImportOrchestrator::new(ctx);

        let rt = tokio::runtime::Runtime::new()?;
        let summary = rt.block_on(orchestrator.run())?;

        if summary.has_failures() {
            let totals = summary.totals();
            warn!(
                created = totals.created,
                skipped = totals.skipped,
                failed = totals.failed,
                "Import finished with failures"
            );
            anyhow::bail!(
                "{} item(s) failed to import; see the mapper audit files for details",
                totals.failed
            );
        }

        Ok(())
    }
}
