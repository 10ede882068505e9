mod common;

use common::*;
use depot_core::{BuildType, Progress};
use depot_sync::{PackageOptions, SyncError, package};
use std::sync::Mutex;

#[tokio::test]
async fn packaged_files_reconstruct_exactly() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    write_build(&root, 7);

    let manifest = package_dir(&root, &ws.chunks, "1.0.0", BuildType::Production).await;

    let names: Vec<_> = manifest.files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["bin/game.exe", "data/level1.pak", "readme.txt"]);

    for file in &manifest.files {
        let original = std::fs::read(root.join(&file.filename)).unwrap();
        assert_eq!(file.total_size, original.len() as u64);

        let mut out = Vec::new();
        ws.chunks.reconstruct(&file.chunks, &mut out).await.unwrap();
        assert_eq!(out, original, "{}", file.filename);
    }
}

#[tokio::test]
async fn excluded_files_are_not_packaged() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    write_build(&root, 1);
    write_file(&root, "manifest.json", b"{}");
    write_file(&root, "version.json", b"{}");
    write_file(&root, "bin/game.pdb", b"symbols");
    write_file(&root, "Game.dSYM/Contents/Resources/DWARF/Game", b"dwarf");
    write_file(&root, "Game/Saved/Logs/game.log", b"log");
    write_file(&root, "SaveGames/slot0.sav", b"save");

    let manifest = package_dir(&root, &ws.chunks, "1.0.0", BuildType::Staging).await;
    assert_eq!(manifest.files.len(), 3);

    let mut options = PackageOptions::new(&root, "1.0.1", BuildType::Staging)
        .with_chunking(small_chunking());
    options.exclude_debug_symbols = false;
    options.exclude_save_data = false;
    let report = package(&options, &ws.chunks, &depot_core::NoProgress)
        .await
        .unwrap();

    let names: Vec<_> = report
        .manifest
        .files
        .iter()
        .map(|f| f.filename.as_str())
        .collect();
    assert!(names.contains(&"bin/game.pdb"));
    assert!(names.contains(&"SaveGames/slot0.sav"));
    assert!(!names.contains(&"manifest.json"));
    assert!(!names.contains(&"version.json"));
}

#[tokio::test]
async fn repackaging_writes_no_new_chunks() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    write_build(&root, 3);

    let options =
        PackageOptions::new(&root, "1.0.0", BuildType::Development).with_chunking(small_chunking());
    let first = package(&options, &ws.chunks, &depot_core::NoProgress)
        .await
        .unwrap();
    assert_eq!(first.chunks_written, first.unique_chunks);
    assert_eq!(first.total_bytes, first.manifest.total_size());

    let second = package(&options, &ws.chunks, &depot_core::NoProgress)
        .await
        .unwrap();
    assert_eq!(second.chunks_written, 0);
    assert_eq!(second.bytes_written, 0);
    assert_eq!(second.manifest, first.manifest);
}

#[tokio::test]
async fn empty_files_have_no_chunks() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    write_file(&root, "empty.dat", b"");

    let manifest = package_dir(&root, &ws.chunks, "0.1", BuildType::Development).await;
    assert_eq!(manifest.files.len(), 1);
    assert_eq!(manifest.files[0].total_size, 0);
    assert!(manifest.files[0].chunks.is_empty());
}

#[tokio::test]
async fn progress_is_monotonic_and_finishes() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    write_build(&root, 11);

    let seen = Mutex::new(Vec::new());
    let reporter = |p: Progress| seen.lock().unwrap().push(p.percentage);
    let options =
        PackageOptions::new(&root, "2.0", BuildType::Production).with_chunking(small_chunking());
    package(&options, &ws.chunks, &reporter).await.unwrap();

    let seen = seen.into_inner().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test]
async fn missing_source_is_an_error() {
    let ws = Workspace::new().await;
    let options = PackageOptions::new(ws.dir.path().join("nope"), "1.0", BuildType::Production);
    let err = package(&options, &ws.chunks, &depot_core::NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SourceMissing(_)), "{err:?}");
}

#[tokio::test]
async fn invalid_chunking_is_rejected() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    let mut options = PackageOptions::new(&root, "1.0", BuildType::Production);
    options.chunking.min_size = options.chunking.max_size + 1;

    let err = package(&options, &ws.chunks, &depot_core::NoProgress)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            SyncError::Core(depot_core::Error::InvalidChunkerConfig(_))
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn versions_that_escape_their_key_segment_are_rejected() {
    let ws = Workspace::new().await;
    let root = ws.build_dir("build");
    write_build(&root, 3);

    for version in ["2.0/../../staging/9", "1.0\\beta", ""] {
        let options = PackageOptions::new(&root, version, BuildType::Production);
        let err = package(&options, &ws.chunks, &depot_core::NoProgress)
            .await
            .unwrap_err();
        assert!(
            matches!(
                &err,
                SyncError::Core(depot_core::Error::Manifest(
                    depot_core::ManifestError::InvalidField { field, .. }
                )) if field == "version"
            ),
            "{version:?}: {err:?}"
        );
    }

    assert!(ws.chunks.list().await.unwrap().is_empty());
}
