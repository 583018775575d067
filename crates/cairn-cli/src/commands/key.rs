use time::format_description::well_known::Rfc3339;

use cairn::prelude::*;

use crate::commands::KeyCommand;

pub async fn run(repo: &Repository, command: &KeyCommand) -> anyhow::Result<()> {
    match command {
        KeyCommand::List => list(repo).await,
    }
}

async fn list(repo: &Repository) -> anyhow::Result<()> {
    let mut names = repo.list(ObjectKind::Key).await?;
    while let Some(name) = names.recv().await {
        let key_file = KeyFile::load(repo.backend().as_ref(), &name).await?;
        let created = key_file
            .created
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".to_string());
        println!(
            "{} {} {}@{}",
            &name[..8],
            created,
            key_file.username,
            key_file.hostname
        );
    }
    Ok(())
}
