//! Shared test utilities for repository integration tests
#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use cairn::crypto::KdfParams;
use cairn::prelude::*;

pub const PASSWORD: &str = "geheim";

/// A repository over a fresh in-memory backend, plus the backend handle for
/// poking at stored objects directly
pub async fn memory_repo() -> (Repository, MemoryBackend) {
    let backend = MemoryBackend::new();
    let repo = Repository::init_with_params(
        Arc::new(backend.clone()),
        PASSWORD,
        KdfParams::weak(),
    )
    .await
    .unwrap();
    (repo, backend)
}

/// A repository over a local directory backend in a temp dir
pub async fn local_repo() -> (Repository, TempDir) {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::create(dir.path().join("repo")).await.unwrap();
    let repo = Repository::init_with_params(Arc::new(backend), PASSWORD, KdfParams::weak())
        .await
        .unwrap();
    (repo, dir)
}

/// Deterministic filler bytes so tests need no RNG dependency
pub fn pseudo_random(len: usize, mut seed: u64) -> Vec<u8> {
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
