use std::path::Path;

use cairn::prelude::*;
use cairn_cli::restorer::Restorer;

use crate::commands::resolve_snapshot;

pub async fn run(repo: &Repository, prefix: &str, target: &Path) -> anyhow::Result<()> {
    let name = resolve_snapshot(repo, prefix).await?;
    let snapshot = Snapshot::load(repo, &name).await?;

    Restorer::new(repo).restore(&snapshot, target).await?;
    println!("restored snapshot {} to {}", &name[..8], target.display());
    Ok(())
}
