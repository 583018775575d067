mod common;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cairn::crypto::{CryptoError, KeyError};
use cairn::prelude::*;
use cairn::repo::RepositoryError;

use common::{memory_repo, pseudo_random, PASSWORD};

#[tokio::test]
async fn test_save_load_round_trip() {
    let (repo, _backend) = memory_repo().await;

    let blob = repo.save(ObjectKind::Data, b"hello\n").await.unwrap();
    assert_eq!(
        blob.id.to_hex(),
        "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
    );
    assert_eq!(blob.size, 6);

    let data = repo.load(ObjectKind::Data, &blob).await.unwrap();
    assert_eq!(data, b"hello\n");
}

#[tokio::test]
async fn test_duplicate_save_hits_the_index() {
    let (repo, backend) = memory_repo().await;

    let first = repo.save(ObjectKind::Data, b"hello\n").await.unwrap();
    let second = repo.save(ObjectKind::Data, b"hello\n").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.len(ObjectKind::Data).await, 1);

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.data_count, 1);
    assert_eq!(stats.key_count, 1);
}

#[tokio::test]
async fn test_parallel_duplicate_saves_converge() {
    let (repo, backend) = memory_repo().await;
    let repo = Arc::new(repo);
    let payload = pseudo_random(64 * 1024, 6);

    let a = {
        let repo = Arc::clone(&repo);
        let payload = payload.clone();
        tokio::spawn(async move { repo.save(ObjectKind::Data, &payload).await })
    };
    let b = {
        let repo = Arc::clone(&repo);
        let payload = payload.clone();
        tokio::spawn(async move { repo.save(ObjectKind::Data, &payload).await })
    };

    let blob_a = a.await.unwrap().unwrap();
    let blob_b = b.await.unwrap().unwrap();

    assert_eq!(blob_a, blob_b);
    assert_eq!(backend.len(ObjectKind::Data).await, 1);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct TestObject {
    #[serde(rename = "Foo")]
    foo: u32,
    #[serde(rename = "Bar")]
    bar: String,
    #[serde(rename = "Baz")]
    baz: String,
}

fn test_object() -> TestObject {
    TestObject {
        foo: 23,
        bar: "Teststring".to_string(),
        baz: "eHg=".to_string(),
    }
}

#[tokio::test]
async fn test_save_json_digests_exact_bytes() {
    let (repo, _backend) = memory_repo().await;

    let value = test_object();
    let mut expected_bytes = serde_json::to_vec(&value).unwrap();
    expected_bytes.push(b'\n');
    let expected_id = Id::digest(&expected_bytes);

    let blob = repo.save_json(ObjectKind::Tree, &value).await.unwrap();
    assert_eq!(blob.id, expected_id);
    assert_eq!(blob.size, expected_bytes.len() as u64);

    // the stored plaintext is byte-identical, trailing newline included
    let data = repo.load(ObjectKind::Tree, &blob).await.unwrap();
    assert_eq!(data, expected_bytes);
}

#[tokio::test]
async fn test_load_json_id_round_trip() {
    let (repo, _backend) = memory_repo().await;

    let value = test_object();
    let blob = repo.save_json(ObjectKind::Tree, &value).await.unwrap();

    let back: TestObject = repo
        .load_json_id(ObjectKind::Tree, &blob.id)
        .await
        .unwrap();
    assert_eq!(back, value);
}

#[tokio::test]
async fn test_load_json_id_unknown_id() {
    let (repo, _backend) = memory_repo().await;
    let missing = Id::digest(b"never stored");
    let result: Result<TestObject, _> = repo.load_json_id(ObjectKind::Tree, &missing).await;
    assert!(matches!(
        result,
        Err(RepositoryError::BlobNotFound { .. })
    ));
}

#[tokio::test]
async fn test_tampered_object_fails_authentication() {
    let (repo, backend) = memory_repo().await;

    let blob = repo
        .save(ObjectKind::Data, b"precious bytes")
        .await
        .unwrap();

    backend
        .tamper(ObjectKind::Data, &blob.storage_id.to_hex(), |bytes| {
            let mid = bytes.len() / 2;
            bytes[mid] ^= 0xff;
        })
        .await
        .unwrap();

    assert!(matches!(
        repo.load(ObjectKind::Data, &blob).await,
        Err(RepositoryError::Crypto(CryptoError::AuthenticationFailed))
    ));
}

#[tokio::test]
async fn test_save_from_round_trip() {
    let (repo, _backend) = memory_repo().await;

    for size in [5usize, 23, (2 << 18) + 23, 1 << 20] {
        let data = pseudo_random(size, size as u64);
        let id = Id::digest(&data);

        let blob = repo
            .save_from(ObjectKind::Data, id, size as u64, data.as_slice())
            .await
            .unwrap();
        assert_eq!(blob.id, id);
        assert_eq!(blob.size, size as u64);

        let back = repo.load(ObjectKind::Data, &blob).await.unwrap();
        assert_eq!(back, data);
    }
}

#[tokio::test]
async fn test_save_from_rejects_digest_mismatch() {
    let (repo, backend) = memory_repo().await;
    let stored_before = backend.len(ObjectKind::Data).await;

    let wrong_id = Id::digest(b"something else");
    let result = repo
        .save_from(ObjectKind::Data, wrong_id, 4, &b"data"[..])
        .await;

    assert!(matches!(
        result,
        Err(RepositoryError::DigestMismatch { .. })
    ));
    // nothing must have been stored
    assert_eq!(backend.len(ObjectKind::Data).await, stored_before);
}

#[tokio::test]
async fn test_save_requires_key() {
    let backend = Arc::new(MemoryBackend::new());
    let repo = Repository::new(backend);
    assert!(matches!(
        repo.save(ObjectKind::Data, b"x").await,
        Err(RepositoryError::KeyNotSet)
    ));
}

#[tokio::test]
async fn test_open_checks_password() {
    let (_repo, backend) = memory_repo().await;

    let reopened = Repository::open(Arc::new(backend.clone()), PASSWORD).await;
    assert!(reopened.is_ok());

    let wrong = Repository::open(Arc::new(backend.clone()), "falsch").await;
    assert!(matches!(
        wrong,
        Err(RepositoryError::Key(KeyError::BadPassword))
    ));

    let empty = Repository::open(Arc::new(MemoryBackend::new()), PASSWORD).await;
    assert!(matches!(
        empty,
        Err(RepositoryError::Key(KeyError::NoKeyFound))
    ));
}

#[tokio::test]
async fn test_list_yields_storage_names() {
    let (repo, _backend) = memory_repo().await;

    let blob = repo.save(ObjectKind::Data, b"listed").await.unwrap();

    let mut names = Vec::new();
    let mut rx = repo.list(ObjectKind::Data).await.unwrap();
    while let Some(name) = rx.recv().await {
        names.push(name);
    }
    assert_eq!(names, vec![blob.storage_id.to_hex()]);
}

#[tokio::test]
async fn test_stats_totals() {
    let (repo, _backend) = memory_repo().await;

    repo.save(ObjectKind::Data, b"one").await.unwrap();
    repo.save(ObjectKind::Data, b"two").await.unwrap();
    repo.save_json(ObjectKind::Tree, &test_object()).await.unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.data_count, 2);
    assert_eq!(stats.tree_count, 1);
    assert_eq!(stats.key_count, 1);
    assert_eq!(stats.snapshot_count, 0);
    assert!(stats.total_bytes > 0);
}

#[tokio::test]
async fn test_prefix_resolution_over_repository() {
    let (repo, backend) = memory_repo().await;

    let a = repo.save(ObjectKind::Data, b"first").await.unwrap();
    let b = repo.save(ObjectKind::Data, b"second").await.unwrap();
    let name_a = a.storage_id.to_hex();
    let name_b = b.storage_id.to_hex();

    // the shortest distinguishing prefix resolves each object
    let mut len = 1;
    while name_a[..len] == name_b[..len] {
        len += 1;
    }
    let resolved = find_name(&backend, ObjectKind::Data, &name_a[..len])
        .await
        .unwrap();
    assert_eq!(resolved, name_a);

    // a shared prefix is ambiguous
    if len > 1 {
        assert!(matches!(
            find_name(&backend, ObjectKind::Data, &name_a[..len - 1]).await,
            Err(cairn::backend::BackendError::Ambiguous { .. })
        ));
    }
}
