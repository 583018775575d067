use time::format_description::well_known::Rfc3339;

use cairn::prelude::*;

pub async fn run(repo: &Repository) -> anyhow::Result<()> {
    let mut entries = Vec::new();
    let mut names = repo.list(ObjectKind::Snapshot).await?;
    while let Some(name) = names.recv().await {
        let snapshot = Snapshot::load(repo, &name).await?;
        entries.push((name, snapshot));
    }
    entries.sort_by_key(|(_, snapshot)| snapshot.time);

    for (name, snapshot) in entries {
        let time = snapshot
            .time
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".to_string());
        println!(
            "{} {} {:12} {}",
            &name[..8],
            time,
            snapshot.hostname,
            snapshot.paths.join(", ")
        );
    }
    Ok(())
}
