use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use time::format_description::well_known::Rfc3339;

use cairn::prelude::*;

use crate::commands::resolve_snapshot;

pub async fn run(repo: &Repository, prefix: &str) -> anyhow::Result<()> {
    let name = resolve_snapshot(repo, prefix).await?;
    let snapshot = Snapshot::load(repo, &name).await?;

    let time = snapshot
        .time
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string());
    println!("snapshot of {} at {}:", snapshot.paths.join(", "), time);

    let root = snapshot.tree(repo).await?;
    print_tree(repo, &root, Path::new("")).await
}

fn print_tree<'a>(
    repo: &'a Repository,
    tree: &'a Tree,
    prefix: &'a Path,
) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        for node in &tree.nodes {
            println!("{}", format_node(prefix, node));

            if let Some(subtree) = node.subtree() {
                let blob = repo
                    .index()
                    .find(subtree)
                    .ok_or_else(|| anyhow::anyhow!("subtree {subtree} not in index"))?;
                let sub = Tree::load(repo, &blob).await?;
                print_tree(repo, &sub, &prefix.join(&node.name)).await?;
            }
        }
        Ok(())
    })
}

fn format_node(prefix: &Path, node: &Node) -> String {
    let path = prefix.join(&node.name);
    let time = node
        .mod_time
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string());

    let line = format!(
        "{} {:5} {:5} {:8} {} {}",
        mode_string(node),
        node.uid,
        node.gid,
        node.size,
        time,
        path.display()
    );
    match &node.kind {
        NodeKind::Symlink { linktarget } => format!("{line} -> {linktarget}"),
        _ => line,
    }
}

/// Unix-style mode line, `drwxr-xr-x` and friends
fn mode_string(node: &Node) -> String {
    let type_char = match &node.kind {
        NodeKind::File { .. } => '-',
        NodeKind::Dir { .. } => 'd',
        NodeKind::Symlink { .. } => 'l',
        NodeKind::Dev { .. } => 'b',
        NodeKind::Chardev { .. } => 'c',
        NodeKind::Fifo => 'p',
        NodeKind::Socket => 's',
    };

    let mut out = String::with_capacity(10);
    out.push(type_char);
    for shift in [6u32, 3, 0] {
        let bits = (node.mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
