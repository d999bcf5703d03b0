//! End-to-end tests over in-memory backends: dedup, reconstruction,
//! redundancy, pack, clone, verify and repository lifecycle.

mod common;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use common::{fast_config, opts, pseudo_random, TestRepo, PASSWORD};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestRunner};
use stowage_reduce::ChunkerConfig;
use stowage_repo::{
    ArchiveType, EngineConfig, FailureKind, RepoError, Repository, Snapshot, StoreEvent,
    StoreOptions, VerifyEvent, VerifyOptions, VerifyScope,
};
use stowage_storage::piece_key;

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_identical_content_is_written_once() {
    let mut t = TestRepo::new(1).await;
    let data = pseudo_random(200 * 1024, 1);
    t.write_file("a.bin", &data);
    t.write_file("copy/b.bin", &data);

    let snapshot = t.store_all(&opts(0)).await;
    let a = snapshot.archive("a.bin").unwrap();
    let b = snapshot.archive("copy/b.bin").unwrap();
    assert_eq!(a.chunks, b.chunks);

    let distinct: HashSet<_> = a.chunk_hashes().collect();
    assert_eq!(t.index.len(), distinct.len());
    assert_eq!(t.pieces_on(0), distinct.len());
    let one_copy: u64 = a.chunks.iter().map(|c| c.encoded_size).sum();
    assert_eq!(snapshot.stats.storage_size, one_copy);
    assert_eq!(snapshot.stats.size, 2 * data.len() as u64);
    assert_eq!(b.storage_size, 0);

    // storing the same tree again writes nothing
    let puts_before = t.mems[0].stats().puts;
    let (_, again) = t.add(Snapshot::new("again"), &[], &opts(0)).await;
    let again = again.unwrap();
    assert_eq!(again.stats.storage_size, 0);
    assert_eq!(t.mems[0].stats().puts, puts_before);
    for hash in distinct {
        assert_eq!(t.index.get(hash).unwrap().ref_count(), 4);
    }
}

#[tokio::test]
async fn test_round_trip_files_dirs_and_symlinks() {
    let mut t = TestRepo::new(2).await;
    let big = pseudo_random(150 * 1024, 2);
    let text = b"hello stowage\n".repeat(5000);
    t.write_file("docs/big.bin", &big);
    t.write_file("docs/notes.txt", &text);
    t.write_file("empty", b"");
    std::os::unix::fs::symlink("docs/notes.txt", t.root().join("link")).unwrap();

    let snapshot = t.store_all(&opts(1)).await;
    let reader = t.repo.reader();

    assert_eq!(reader.decode_archive_data(snapshot.archive("docs/big.bin").unwrap()).await.unwrap(), big);
    assert_eq!(reader.decode_archive_data(snapshot.archive("docs/notes.txt").unwrap()).await.unwrap(), text);
    assert!(reader.decode_archive_data(snapshot.archive("empty").unwrap()).await.unwrap().is_empty());

    let link = snapshot.archive("link").unwrap();
    assert_eq!(link.archive_type, ArchiveType::SymLink);
    assert_eq!(link.points_to.as_deref(), Some("docs/notes.txt"));
    assert!(link.chunks.is_empty());
    assert_eq!(snapshot.archive("docs").unwrap().archive_type, ArchiveType::Directory);

    assert_eq!(snapshot.stats.files, 3);
    assert_eq!(snapshot.stats.dirs, 1);
    assert_eq!(snapshot.stats.symlinks, 1);
    assert_eq!(snapshot.stats.size, (big.len() + text.len()) as u64);

    let paths: Vec<&str> = snapshot.archives_sorted().iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["docs", "docs/big.bin", "docs/notes.txt", "empty", "link"]);
}

#[test]
fn test_partial_reads_match_full_decode() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (t, archive, full) = rt.block_on(async {
        let mut t = TestRepo::new(3).await;
        t.write_file("f.bin", &pseudo_random(120 * 1024, 3));
        let snapshot = t.store_all(&opts(1)).await;
        let archive = snapshot.archive("f.bin").unwrap().clone();
        let full = t.repo.reader().decode_archive_data(&archive).await.unwrap();
        (t, archive, full)
    });
    assert!(archive.chunks.len() > 5);
    let reader = t.repo.reader();
    let len = full.len() as u64;

    let mut runner = TestRunner::new(ProptestConfig::with_cases(64));
    runner
        .run(&(0..len, 0..len + 4096), |(offset, size)| {
            let got = rt.block_on(reader.read_archive(&archive, offset, size)).unwrap();
            let end = (offset + size).min(len) as usize;
            prop_assert_eq!(&got[..], &full[offset as usize..end]);
            Ok(())
        })
        .unwrap();

    assert!(matches!(
        rt.block_on(reader.read_archive(&archive, len, 1)),
        Err(RepoError::EndOfArchive)
    ));
}

#[tokio::test]
async fn test_reconstruction_survives_f_losses_only() {
    let mut t = TestRepo::new(4).await;
    let data = pseudo_random(64 * 1024, 4);
    t.write_file("f.bin", &data);
    let snapshot = t.store_all(&opts(2)).await;
    let archive = snapshot.archive("f.bin").unwrap();
    let reader = t.repo.reader();

    for (x, y) in [(0, 1), (0, 3), (1, 2), (2, 3)] {
        t.disable(x);
        t.disable(y);
        assert_eq!(reader.decode_archive_data(archive).await.unwrap(), data, "lost {} and {}", x, y);
        t.enable(x);
        t.enable(y);
    }

    t.disable(0);
    t.disable(1);
    t.disable(2);
    assert!(matches!(
        reader.decode_archive_data(archive).await,
        Err(RepoError::Redundancy { needed: 2, available: 1 })
    ));
}

#[tokio::test]
async fn test_write_beyond_tolerance_fails_the_add() {
    let t = TestRepo::new(3).await;
    t.write_file("f.bin", &pseudo_random(10 * 1024, 5));
    t.disable(1);
    t.disable(2);
    let (_, result) = t.add(Snapshot::new("x"), &[], &opts(1)).await;
    assert!(matches!(result, Err(RepoError::Redundancy { needed: 2, available: 1 })));
    assert!(t.index.unreferenced().is_empty());
    assert_eq!(t.pieces_on(0), 0);
}

#[tokio::test]
async fn test_impossible_tolerance_is_rejected_up_front() {
    let t = TestRepo::new(2).await;
    let result = t
        .repo
        .add(Arc::clone(&t.index), Snapshot::new("x"), t.root(), &[], &opts(2));
    assert!(matches!(result, Err(RepoError::Configuration(_))));
}

#[tokio::test]
async fn test_pack_frees_only_chunks_of_removed_snapshot() {
    let mut t = TestRepo::new(2).await;
    let only_first = pseudo_random(40 * 1024, 6);
    let shared = pseudo_random(40 * 1024, 7);
    t.write_file("first/only.bin", &only_first);
    t.write_file("shared/s.bin", &shared);

    let (_, first) = t.add(Snapshot::new("first"), &["first", "shared"], &opts(1)).await;
    let first = first.unwrap();
    t.commit(&first).await;
    let (_, second) = t.add(Snapshot::new("second"), &["shared"], &opts(1)).await;
    let second = second.unwrap();
    t.commit(&second).await;

    let only_chunks: Vec<_> = first.archive("first/only.bin").unwrap().chunk_hashes().copied().collect();
    let expected: u64 = only_chunks.iter().map(|h| t.index.get(h).unwrap().stored_bytes()).sum();

    let report = t.repo.pack(&t.index).await.unwrap();
    assert_eq!(report.chunks_removed, 0);

    t.repo.remove_snapshot(&first.id, &t.index).await.unwrap();
    assert!(matches!(t.repo.load_snapshot(&first.id).await, Err(RepoError::NotFound { .. })));
    let report = t.repo.pack(&t.index).await.unwrap();
    assert_eq!(report.chunks_removed, only_chunks.len());
    assert_eq!(report.freed_bytes, expected);
    assert_eq!(report.delete_failures, 0);
    for hash in &only_chunks {
        assert!(!t.index.contains(hash));
        assert_eq!(t.mems[0].count_prefix(&piece_key(&hash.to_hex(), 0)), 0);
    }

    let second = t.repo.load_snapshot(&second.id).await.unwrap();
    let got = t.repo.reader().decode_archive_data(second.archive("shared/s.bin").unwrap()).await.unwrap();
    assert_eq!(got, shared);
}

#[tokio::test]
async fn test_pack_reports_delete_failures_and_continues() {
    let mut t = TestRepo::new(2).await;
    t.write_file("f.bin", &pseudo_random(30 * 1024, 8));
    let snapshot = t.store_all(&opts(1)).await;
    let chunks = snapshot.archive("f.bin").unwrap().chunks.len();
    t.repo.remove_snapshot(&snapshot.id, &t.index).await.unwrap();

    t.disable(1);
    let (events, report) = t.repo.spawn_pack(Arc::clone(&t.index)).collect().await;
    let report = report.unwrap();
    assert_eq!(report.chunks_removed, chunks);
    assert_eq!(report.delete_failures, chunks);
    assert_eq!(events.len(), 2 * chunks);
    assert_eq!(t.pieces_on(0), 0);
}

#[tokio::test]
async fn test_clone_is_independent_of_original() {
    let mut t = TestRepo::new(1).await;
    let v1 = pseudo_random(50 * 1024, 9);
    t.write_file("doc.bin", &v1);
    t.write_file("stable.txt", b"unchanged");
    let base = t.store_all(&opts(0)).await;

    let puts_before = t.mems[0].stats().puts;
    let clone = base.clone_snapshot(&t.index).await.unwrap();
    assert_eq!(t.mems[0].stats().puts, puts_before);
    assert_ne!(clone.id, base.id);
    assert_eq!(clone.archives, base.archives);

    // base + delta: rewrite one file into the clone
    let mut v2 = v1.clone();
    v2[100] ^= 0xff;
    t.write_file("doc.bin", &v2);
    let (_, delta) = t.add(clone, &["doc.bin"], &opts(0)).await;
    let delta = delta.unwrap();
    t.commit(&delta).await;

    let reader = t.repo.reader();
    let original = t.repo.load_snapshot(&base.id).await.unwrap();
    assert_eq!(original, base);
    assert_eq!(reader.decode_archive_data(original.archive("doc.bin").unwrap()).await.unwrap(), v1);
    assert_eq!(reader.decode_archive_data(delta.archive("doc.bin").unwrap()).await.unwrap(), v2);
    assert_eq!(delta.archive("stable.txt").unwrap(), base.archive("stable.txt").unwrap());
    assert_eq!(delta.stats.files, base.stats.files);

    // dropping the base keeps everything the delta still uses
    t.repo.remove_snapshot(&base.id, &t.index).await.unwrap();
    t.repo.pack(&t.index).await.unwrap();
    assert_eq!(reader.decode_archive_data(delta.archive("doc.bin").unwrap()).await.unwrap(), v2);
    assert_eq!(
        reader.decode_archive_data(delta.archive("stable.txt").unwrap()).await.unwrap(),
        b"unchanged"
    );
}

#[tokio::test]
async fn test_ten_megabytes_on_three_backends_tolerating_one() {
    let config = EngineConfig {
        chunker: ChunkerConfig::default(),
        ..fast_config()
    };
    let mut t = TestRepo::with_config(3, config).await;
    let data = pseudo_random(10 * MIB, 10);
    t.write_file("big.bin", &data);

    let (_, snapshot) = t.add(Snapshot::new("v1"), &[], &opts(1)).await;
    let snapshot = snapshot.unwrap();
    t.commit(&snapshot).await;
    assert_eq!(snapshot.stats.size, 10 * MIB as u64);
    for descriptor in t.index.descriptors() {
        assert_eq!(descriptor.total_pieces(), 3);
        assert_eq!(descriptor.required_pieces(), 2);
        assert_eq!(descriptor.piece_locations.len(), 3);
    }

    let archive = snapshot.archive("big.bin").unwrap();
    let reader = t.repo.reader();
    t.disable(1);
    assert_eq!(reader.read_archive(archive, 0, 10 * MIB as u64).await.unwrap(), data);
    t.disable(2);
    assert!(matches!(
        reader.read_archive(archive, 0, 10 * MIB as u64).await,
        Err(RepoError::Redundancy { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_share_every_chunk() {
    let t = TestRepo::new(2).await;
    let data = pseudo_random(300 * 1024, 11);
    t.write_file("one/f.bin", &data);
    t.write_file("two/f.bin", &data);

    let start = |target: &str| {
        t.repo
            .add(
                Arc::clone(&t.index),
                Snapshot::new(target),
                t.root(),
                &[PathBuf::from(target)],
                &opts(1),
            )
            .unwrap()
    };
    let (a, b) = tokio::join!(start("one").finish(), start("two").finish());
    let (a, b) = (a.unwrap(), b.unwrap());

    let hashes: HashSet<_> = a.archive("one/f.bin").unwrap().chunk_hashes().copied().collect();
    assert_eq!(t.index.len(), hashes.len());
    assert_eq!(t.pieces_on(0), hashes.len());
    assert_eq!(t.pieces_on(1), hashes.len());
    for hash in &hashes {
        let d = t.index.get(hash).unwrap();
        assert_eq!(d.refs.get(&a.id), Some(&1));
        assert_eq!(d.refs.get(&b.id), Some(&1));
    }
    assert_eq!(a.stats.storage_size + b.stats.storage_size, t.index.descriptors().iter().map(|d| d.encoded_size).sum::<u64>());
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let t = TestRepo::new(1).await;
    let result = Repository::open(&t.url, "not the password", &t.registry, fast_config()).await;
    assert!(matches!(result, Err(RepoError::Authentication)));
}

#[tokio::test]
async fn test_change_password_keeps_data_readable() {
    let mut t = TestRepo::new(2).await;
    let data = pseudo_random(20 * 1024, 12);
    t.write_file("f.bin", &data);
    let snapshot = t.store_all(&opts(0)).await;

    t.repo.change_password("new secret").await.unwrap();
    assert!(matches!(
        Repository::open(&t.url, PASSWORD, &t.registry, fast_config()).await,
        Err(RepoError::Authentication)
    ));

    let reopened = Repository::open("mem://b1", "new secret", &t.registry, fast_config()).await.unwrap();
    let index = reopened.open_index().await.unwrap();
    assert_eq!(index.descriptors(), t.index.descriptors());
    let loaded = reopened.load_snapshot(&snapshot.id[..6]).await.unwrap();
    let got = reopened.reader().decode_archive_data(loaded.archive("f.bin").unwrap()).await.unwrap();
    assert_eq!(got, data);
}

#[tokio::test]
async fn test_snapshot_prefix_lookup() {
    let mut t = TestRepo::new(1).await;
    t.write_file("f", b"x");
    for id in ["abcd0001", "abcd0002", "ef000001"] {
        let mut snapshot = Snapshot::new(id);
        snapshot.id = id.to_string();
        let (_, snapshot) = t.add(snapshot, &[], &opts(0)).await;
        t.commit(&snapshot.unwrap()).await;
    }

    assert_eq!(t.repo.find_snapshot("abcd0001").unwrap(), "abcd0001");
    assert_eq!(t.repo.find_snapshot("ef").unwrap(), "ef000001");
    assert!(matches!(
        t.repo.find_snapshot("abcd"),
        Err(RepoError::Ambiguous { kind: "snapshot", .. })
    ));
    assert!(matches!(
        t.repo.find_snapshot("99"),
        Err(RepoError::NotFound { kind: "snapshot", .. })
    ));
    assert!(matches!(
        t.repo.find_volume("nope"),
        Err(RepoError::NotFound { kind: "volume", .. })
    ));

    let snapshots = t.repo.volume_snapshots(&t.volume).await.unwrap();
    assert_eq!(snapshots.len(), 3);
    let total: stowage_repo::Stats = snapshots.iter().map(|s| s.stats).sum();
    assert_eq!(total.files, 3);
}

#[tokio::test]
async fn test_cancelled_add_rolls_back_references() {
    let config = EngineConfig {
        progress_capacity: 1,
        ..fast_config()
    };
    let t = TestRepo::with_config(1, config).await;
    for i in 0..40 {
        t.write_file(&format!("f{:02}.bin", i), &pseudo_random(8 * 1024, 100 + i));
    }

    let snapshot = Snapshot::new("cancelled");
    let id = snapshot.id.clone();
    let mut handle = t
        .repo
        .add(Arc::clone(&t.index), snapshot, t.root(), &[], &StoreOptions::default())
        .unwrap();
    assert!(handle.next_event().await.is_some());
    handle.cancel();
    let (_, result) = handle.collect().await;
    assert!(matches!(result, Err(RepoError::Cancelled)));

    // chunks written before the cancel are kept but unreferenced
    assert_eq!(t.index.referenced_by(&id), 0);
    assert!(!t.index.is_empty());
    assert_eq!(t.index.unreferenced().len(), t.index.len());
    let report = t.repo.pack(&t.index).await.unwrap();
    assert!(report.chunks_removed > 0);
    assert_eq!(t.pieces_on(0), 0);
}

#[tokio::test]
async fn test_unreadable_targets_and_excludes() {
    let t = TestRepo::new(1).await;
    t.write_file("keep.txt", b"keep");
    t.write_file("skip.tmp", b"skip");
    t.write_file("cache/blob", b"cached");

    let options = StoreOptions {
        excludes: vec!["*.tmp".into(), "cache".into()],
        ..StoreOptions::default()
    };
    let (events, snapshot) = t.add(Snapshot::new("x"), &[".", "missing"], &options).await;
    let snapshot = snapshot.unwrap();
    assert!(snapshot.archive("keep.txt").is_ok());
    assert!(snapshot.archive("skip.tmp").is_err());
    assert!(snapshot.archive("cache").is_err());
    assert!(snapshot.archive("cache/blob").is_err());
    assert_eq!(snapshot.stats.errors, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, StoreEvent::ItemFailed { path, .. } if path == "missing")));
}

#[tokio::test]
async fn test_verify_reports_corruption_and_missing_pieces() {
    let mut t = TestRepo::new(2).await;
    t.write_file("a.bin", &pseudo_random(20 * 1024, 13));
    t.write_file("b.bin", &pseudo_random(20 * 1024, 14));
    let snapshot = t.store_all(&opts(0)).await;
    let all = VerifyOptions { percentage: 100, seed: 7 };

    let (events, report) = t.repo.verify(VerifyScope::Repository, all).await.unwrap().collect().await;
    assert_eq!(report.unwrap(), stowage_repo::VerifyReport { checked: 2, errors: 0 });
    assert!(events.iter().all(|e| matches!(e, VerifyEvent::Verified { .. })));

    let victim = snapshot.archive("b.bin").unwrap().chunks[0].hash;
    assert!(t.mems[0].tamper(&piece_key(&victim.to_hex(), 0), |p| p[30] ^= 0x01));
    let (events, report) = t
        .repo
        .verify(VerifyScope::Snapshot(snapshot.id[..4].to_string()), all)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(report.unwrap().errors, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        VerifyEvent::Failed { path, kind: FailureKind::Corruption, .. } if path == "b.bin"
    )));

    // striped without tolerance: losing a backend loses every chunk
    t.disable(1);
    let (events, report) = t
        .repo
        .verify(VerifyScope::Volume(t.volume.clone()), all)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(report.unwrap().errors, 2);
    assert!(events.iter().all(|e| matches!(
        e,
        VerifyEvent::Failed { kind: FailureKind::Reconstruction, .. }
    )));
}

#[tokio::test]
async fn test_verify_sample_is_reproducible() {
    let mut t = TestRepo::new(1).await;
    for i in 0..20 {
        t.write_file(&format!("f{:02}", i), format!("file {}", i).as_bytes());
    }
    t.store_all(&StoreOptions::default()).await;
    let options = VerifyOptions { percentage: 70, seed: 99 };

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (events, report) = t.repo.verify(VerifyScope::Repository, options).await.unwrap().collect().await;
        assert_eq!(report.unwrap().checked, 14);
        let paths: Vec<String> = events
            .into_iter()
            .map(|e| match e {
                VerifyEvent::Verified { path, .. } | VerifyEvent::Failed { path, .. } => path,
            })
            .collect();
        runs.push(paths);
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_backend_added_later_serves_new_chunks_only() {
    let mut t = TestRepo::new(1).await;
    let old = pseudo_random(20 * 1024, 15);
    t.write_file("old.bin", &old);
    let first = t.store_all(&opts(0)).await;

    t.repo.add_backend("mem://late").await.unwrap();
    t.repo.save().await.unwrap();
    let late = t.registry.memory_backend("late").unwrap();
    assert_eq!(late.count_prefix("chunks/"), 0);

    let new = pseudo_random(20 * 1024, 16);
    t.write_file("new.bin", &new);
    let (_, second) = t.add(Snapshot::new("second"), &["new.bin"], &opts(1)).await;
    let second = second.unwrap();
    assert!(late.count_prefix("chunks/") > 0);

    let reader = t.repo.reader();
    assert_eq!(reader.decode_archive_data(first.archive("old.bin").unwrap()).await.unwrap(), old);
    late.set_available(false);
    assert_eq!(reader.decode_archive_data(second.archive("new.bin").unwrap()).await.unwrap(), new);

    let info = t.repo.backend_info().await;
    assert_eq!(info.len(), 2);
    assert_eq!(info[1].location, "mem://late");
}

#[tokio::test]
async fn test_failed_password_change_leaves_every_backend_unchanged() {
    let mut t = TestRepo::new(2).await;
    t.disable(1);
    assert!(matches!(
        t.repo.change_password("new secret").await,
        Err(RepoError::Backend(_))
    ));
    t.enable(1);

    for url in ["mem://b0", "mem://b1"] {
        assert!(
            Repository::open(url, PASSWORD, &t.registry, fast_config()).await.is_ok(),
            "old password rejected by {}",
            url
        );
        assert!(matches!(
            Repository::open(url, "new secret", &t.registry, fast_config()).await,
            Err(RepoError::Authentication)
        ));
    }

    // the handle still works with the old password after the failed change
    t.repo.change_password("new secret").await.unwrap();
    assert!(Repository::open("mem://b1", "new secret", &t.registry, fast_config()).await.is_ok());
}

#[tokio::test]
async fn test_failed_commit_lists_the_snapshot_nowhere() {
    let mut t = TestRepo::new(2).await;
    t.write_file("f.bin", &pseudo_random(10 * 1024, 17));
    let (_, snapshot) = t.add(Snapshot::new("x"), &[], &opts(0)).await;
    let snapshot = snapshot.unwrap();

    t.disable(1);
    let volume = t.volume.clone();
    assert!(t.repo.commit_snapshot(&volume, &snapshot, &t.index).await.is_err());
    assert!(matches!(
        t.repo.find_snapshot(&snapshot.id),
        Err(RepoError::NotFound { .. })
    ));
    t.enable(1);

    for (i, url) in ["mem://b0", "mem://b1"].into_iter().enumerate() {
        let repo = Repository::open(url, PASSWORD, &t.registry, fast_config()).await.unwrap();
        assert!(repo.find_snapshot(&snapshot.id).is_err());
        assert!(repo.volume_snapshots(&volume).await.unwrap().is_empty());
        assert_eq!(t.mems[i].count_prefix("snapshots/"), 0);
    }

    // a retry once the backend is back commits normally
    t.commit(&snapshot).await;
    assert_eq!(t.repo.find_snapshot(&snapshot.id).unwrap(), snapshot.id);
}

#[tokio::test]
async fn test_failed_remove_keeps_the_snapshot_listed() {
    let mut t = TestRepo::new(2).await;
    t.write_file("f.bin", b"kept");
    let snapshot = t.store_all(&opts(0)).await;

    t.disable(0);
    assert!(t.repo.remove_snapshot(&snapshot.id, &t.index).await.is_err());
    assert_eq!(t.repo.find_snapshot(&snapshot.id).unwrap(), snapshot.id);
    assert!(t.index.referenced_by(&snapshot.id) > 0);
    t.enable(0);

    let reopened = Repository::open(&t.url, PASSWORD, &t.registry, fast_config()).await.unwrap();
    let loaded = reopened.load_snapshot(&snapshot.id).await.unwrap();
    let got = reopened.reader().decode_archive_data(loaded.archive("f.bin").unwrap()).await.unwrap();
    assert_eq!(got, b"kept");
}
