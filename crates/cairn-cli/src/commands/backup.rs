use std::path::PathBuf;

use cairn::prelude::*;

use cairn_cli::archiver::Archiver;

pub async fn run(repo: &Repository, paths: &[PathBuf]) -> anyhow::Result<()> {
    let archiver = Archiver::new(repo);
    let snapshot = archiver.snapshot(paths, None).await?;
    println!("snapshot {} saved", snapshot);
    Ok(())
}
