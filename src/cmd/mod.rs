//! CLI command implementations.
//!
//! | Module   | Commands handled                          |
//! |----------|-------------------------------------------|
//! | `run`    | `Run`, `Resume`                           |
//! | `status` | `Status`, `List`, `Validate`, `Graph`     |
//!
//! Every command returns the process exit code.

pub mod run;
pub mod status;

pub use run::{cmd_resume, cmd_run};
pub use status::{cmd_graph, cmd_list, cmd_status, cmd_validate};

use anyhow::Result;
use claw::config::ClawConfig;
use claw::feature::FeatureStore;
use claw::store::{DocumentStore, MarkdownVault};
use std::path::Path;
use std::sync::Arc;

use super::Cli;

/// Configuration plus the document store it points at.
pub(crate) struct Project {
    pub config: ClawConfig,
    pub store: Arc<dyn DocumentStore>,
}

impl Project {
    pub fn open(cli: &Cli, project_dir: &Path) -> Result<Self> {
        let config = ClawConfig::load(project_dir, cli.verbose, cli.yes)?;
        let store: Arc<dyn DocumentStore> = Arc::new(MarkdownVault::new(config.vault_dir()));
        Ok(Self { config, store })
    }

    pub fn features(&self) -> FeatureStore {
        FeatureStore::new(self.store.clone(), self.config.notes_project_path())
    }
}
