use std::path::Path;
use std::sync::Arc;

use cairn::prelude::*;

pub async fn run(repo_path: &Path, password: &str) -> anyhow::Result<()> {
    let backend = LocalBackend::create(repo_path).await?;
    Repository::init(Arc::new(backend), password).await?;
    println!("created repository at {}", repo_path.display());
    Ok(())
}
