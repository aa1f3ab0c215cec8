use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use tracing::info;

use cstack_api::{CsClient, CsClientConfig, ManagementApi};
use cstack_export::{
    EntriesExporter, ExportOptions, TaxonomiesExporter, TeamsExporter, UsersExporter,
};

#[derive(Args)]
pub struct ExportCommand {
    /// Management API base URL
    #[arg(
        long,
        default_value = "https://api.contentstack.io",
        env = "CSTACK_API_HOST",
        global = true
    )]
    api_host: String,

    /// Source stack API key
    #[arg(long, short = 'k', env = "CSTACK_API_KEY", global = true)]
    stack_api_key: Option<String>,

    /// Management token for the source stack
    #[arg(long, short = 'a', env = "CSTACK_MANAGEMENT_TOKEN", global = true)]
    management_token: Option<String>,

    /// Branch to export from
    #[arg(long, env = "CSTACK_BRANCH", global = true)]
    branch: Option<String>,

    /// Directory the CSV files are written to
    #[arg(long, short = 'o', default_value = ".", global = true)]
    output_dir: PathBuf,

    /// Items fetched per API page
    #[arg(long, default_value_t = 100, global = true)]
    page_size: usize,

    #[command(subcommand)]
    command: ExportCommands,
}

#[derive(Subcommand)]
enum ExportCommands {
    /// Export one content type's entries in one locale
    Entries(EntriesArgs),
    /// Export the stack's taxonomies with their terms
    Taxonomies,
    /// Export the organization's users
    Users,
    /// Export the organization's teams
    Teams,
}

#[derive(Args)]
struct EntriesArgs {
    /// Content type uid to export
    #[arg(long, short = 'c')]
    content_type: String,

    /// Locale code to export
    #[arg(long, short = 'l', default_value = "en-us")]
    locale: String,
}

impl ExportCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let api_key = self
            .stack_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--stack-api-key is required"))?;
        let token = self
            .management_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--management-token is required"))?;

        let mut client_config = CsClientConfig::new(&self.api_host, api_key, token);
        client_config.branch = self.branch.clone();
        let api: Arc<dyn ManagementApi> = Arc::new(CsClient::new(client_config)?);

        let options = ExportOptions {
            output_dir: self.output_dir.clone(),
            page_size: self.page_size,
        };

        let rt = tokio::runtime::Runtime::new()?;
        let path = match &self.command {
            ExportCommands::Entries(args) => {
                let exporter = EntriesExporter {
                    api,
                    content_type: args.content_type.clone(),
                    locale: args.locale.clone(),
                };
                rt.block_on(exporter.run(&options))?
            }
            ExportCommands::Taxonomies => rt.block_on(TaxonomiesExporter { api }.run(&options))?,
            ExportCommands::Users => rt.block_on(UsersExporter { api }.run(&options))?,
            ExportCommands::Teams => rt.block_on(TeamsExporter { api }.run(&options))?,
        };

        info!(path = %path.display(), "Export complete");
        Ok(())
    }
}
