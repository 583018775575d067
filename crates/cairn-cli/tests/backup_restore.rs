//! End-to-end archive and restore through a real on-disk repository.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use cairn::crypto::KdfParams;
use cairn::prelude::*;
use cairn_cli::archiver::Archiver;
use cairn_cli::restorer::Restorer;

const PASSWORD: &str = "geheim";

fn pseudo_random(len: usize, mut seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        out.extend_from_slice(&seed.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Lay out a small source tree: nested directories, an empty file, a large
/// file spanning several chunks, and a symlink
fn build_source(root: &Path) {
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::create_dir_all(root.join("docs/deep")).unwrap();

    std::fs::write(root.join("readme.txt"), b"top level file\n").unwrap();
    std::fs::write(root.join("docs/empty"), b"").unwrap();
    std::fs::write(root.join("docs/deep/big.bin"), pseudo_random(600 * 1024, 99)).unwrap();
    std::os::unix::fs::symlink("readme.txt", root.join("link")).unwrap();
}

fn assert_same_file(a: &Path, b: &Path) {
    let left = std::fs::read(a).unwrap();
    let right = std::fs::read(b).unwrap();
    assert_eq!(left, right, "contents differ: {} vs {}", a.display(), b.display());
}

#[tokio::test]
async fn test_backup_then_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    build_source(&source);

    let repo_path = dir.path().join("repo");
    let backend = LocalBackend::create(&repo_path).await.unwrap();
    let repo = Repository::init_with_params(Arc::new(backend), PASSWORD, KdfParams::weak())
        .await
        .unwrap();

    let snapshot_name = Archiver::new(&repo)
        .snapshot(&[source.clone()], None)
        .await
        .unwrap();

    // restore through a completely fresh session
    drop(repo);
    let backend = LocalBackend::open(&repo_path).await.unwrap();
    let repo = Repository::open(Arc::new(backend), PASSWORD).await.unwrap();

    let snapshot = Snapshot::load(&repo, &snapshot_name.to_hex()).await.unwrap();
    assert_eq!(snapshot.paths, vec![source.display().to_string()]);

    let target = dir.path().join("restored");
    Restorer::new(&repo)
        .restore(&snapshot, &target)
        .await
        .unwrap();

    // the snapshot root holds one entry per archived path
    let restored_root = target.join("source");
    assert_same_file(&source.join("readme.txt"), &restored_root.join("readme.txt"));
    assert_same_file(&source.join("docs/empty"), &restored_root.join("docs/empty"));
    assert_same_file(
        &source.join("docs/deep/big.bin"),
        &restored_root.join("docs/deep/big.bin"),
    );

    let link = restored_root.join("link");
    let meta = std::fs::symlink_metadata(&link).unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(
        std::fs::read_link(&link).unwrap().to_string_lossy(),
        "readme.txt"
    );
}

#[tokio::test]
async fn test_second_backup_of_unchanged_data_adds_no_data_objects() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    build_source(&source);

    let repo_path = dir.path().join("repo");
    let backend = LocalBackend::create(&repo_path).await.unwrap();
    let repo = Repository::init_with_params(Arc::new(backend), PASSWORD, KdfParams::weak())
        .await
        .unwrap();

    let first = Archiver::new(&repo)
        .snapshot(&[source.clone()], None)
        .await
        .unwrap();
    let stats_first = repo.stats().await.unwrap();

    let second = Archiver::new(&repo)
        .snapshot(&[source.clone()], Some(first))
        .await
        .unwrap();
    let stats_second = repo.stats().await.unwrap();

    assert_ne!(first, second);
    // identical content dedups away: no new data blobs, one more snapshot
    assert_eq!(stats_first.data_count, stats_second.data_count);
    assert_eq!(stats_second.snapshot_count, stats_first.snapshot_count + 1);

    let loaded = Snapshot::load(&repo, &second.to_hex()).await.unwrap();
    assert_eq!(loaded.parent, Some(first));
}

#[tokio::test]
async fn test_archiver_preserves_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    let script = source.join("run.sh");
    std::fs::write(&script, b"#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let backend = LocalBackend::create(dir.path().join("repo")).await.unwrap();
    let repo = Repository::init_with_params(Arc::new(backend), PASSWORD, KdfParams::weak())
        .await
        .unwrap();

    let name = Archiver::new(&repo)
        .snapshot(&[source], None)
        .await
        .unwrap();
    let snapshot = Snapshot::load(&repo, &name.to_hex()).await.unwrap();

    let target = dir.path().join("out");
    Restorer::new(&repo).restore(&snapshot, &target).await.unwrap();

    let restored = target.join("source/run.sh");
    let mode = std::fs::metadata(&restored).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}
