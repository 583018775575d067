mod backup;
mod init;
mod key;
mod ls;
mod restore;
mod snapshots;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Subcommand;

use cairn::prelude::*;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialise a new repository
    Init,
    /// Archive the given paths into a new snapshot
    Backup {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List snapshots in the repository
    Snapshots,
    /// List the files and directories in a snapshot
    Ls {
        /// Snapshot name, or a unique prefix of one
        snapshot: String,
    },
    /// Restore a snapshot into a target directory
    Restore {
        /// Snapshot name, or a unique prefix of one
        snapshot: String,
        target: PathBuf,
    },
    /// Manage repository keys
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// List key files
    List,
}

pub async fn run(repo_path: &Path, password: &str, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Init => init::run(repo_path, password).await,
        Command::Backup { paths } => {
            let repo = open_repository(repo_path, password).await?;
            backup::run(&repo, paths).await
        }
        Command::Snapshots => {
            let repo = open_repository(repo_path, password).await?;
            snapshots::run(&repo).await
        }
        Command::Ls { snapshot } => {
            let repo = open_repository(repo_path, password).await?;
            ls::run(&repo, snapshot).await
        }
        Command::Restore { snapshot, target } => {
            let repo = open_repository(repo_path, password).await?;
            restore::run(&repo, snapshot, target).await
        }
        Command::Key { command } => {
            let repo = open_repository(repo_path, password).await?;
            key::run(&repo, command).await
        }
    }
}

async fn open_repository(path: &Path, password: &str) -> anyhow::Result<Repository> {
    let backend = LocalBackend::open(path).await?;
    Ok(Repository::open(Arc::new(backend), password).await?)
}

/// Resolve a snapshot name or unique prefix to the full storage name
pub(crate) async fn resolve_snapshot(repo: &Repository, prefix: &str) -> anyhow::Result<String> {
    Ok(find_name(repo.backend().as_ref(), ObjectKind::Snapshot, prefix).await?)
}
