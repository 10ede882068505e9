//! Operator CLI for depot.

mod config;
mod progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::config::AppConfig;
use depot_core::{BuildType, Manifest, PackageManifest, Validation};
use depot_storage::ChunkStore;
use depot_sync::{PackageOptions, RemoteRepository, UploadSession, Uploader, plan_upload};
use progress::StderrProgress;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "depotctl")]
#[command(about = "Package, publish and promote chunked builds")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "DEPOT_CONFIG", default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a build directory into the local store and write its manifest
    Package {
        /// Build directory
        source: PathBuf,
        /// Version label
        #[arg(long)]
        version: String,
        /// Release track (production, staging, development)
        #[arg(long)]
        build_type: BuildType,
        /// Where to write the manifest
        #[arg(long, short)]
        output: PathBuf,
        /// Package .pdb/.debug/.sym/.dbg files and .dSYM bundles
        #[arg(long)]
        include_debug_symbols: bool,
        /// Package Saved/SaveGames/saves directories
        #[arg(long)]
        include_save_data: bool,
    },
    /// Show what changed between two manifests
    Diff {
        /// Previous manifest
        old: PathBuf,
        /// New manifest
        new: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a packaged version and publish its manifest
    Upload {
        /// Manifest written by `depotctl package`
        manifest: PathBuf,
        /// Only upload chunks missing from this earlier manifest
        #[arg(long, conflicts_with = "delta_latest")]
        delta_from: Option<PathBuf>,
        /// Only upload chunks missing from the track's latest manifest
        #[arg(long)]
        delta_latest: bool,
    },
    /// Check that every chunk of a version exists remotely
    Verify {
        /// Version to check
        version: String,
        #[arg(long)]
        build_type: BuildType,
        /// Check this manifest instead of the published one
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Make a version the latest of its track once all its chunks exist
    Promote {
        /// Version to promote
        version: String,
        #[arg(long)]
        build_type: BuildType,
        /// Promote this manifest instead of the published one
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// List published versions of a track
    Versions {
        #[arg(long)]
        build_type: BuildType,
    },
    /// Rebuild files from the local chunk store
    Reconstruct {
        /// Manifest describing the files
        manifest: PathBuf,
        /// Output directory
        #[arg(long, short)]
        output: PathBuf,
        /// Only rebuild this file
        #[arg(long)]
        file: Option<String>,
    },
    /// Delete local chunks not referenced by any of the given manifests
    Cleanup {
        /// Manifests whose chunks are kept
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config: config_path,
        command,
    } = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match command {
        Commands::Package {
            source,
            version,
            build_type,
            output,
            include_debug_symbols,
            include_save_data,
        } => {
            let config = config::load(&config_path)?;
            let mut options = PackageOptions::new(source, version, build_type)
                .with_chunking(config.chunking.clone());
            options.exclude_debug_symbols = !include_debug_symbols;
            options.exclude_save_data = !include_save_data;
            handle_package_command(&config, &options, &output).await
        }
        Commands::Diff { old, new, json } => handle_diff_command(&old, &new, json).await,
        Commands::Upload {
            manifest,
            delta_from,
            delta_latest,
        } => {
            let config = config::load(&config_path)?;
            handle_upload_command(&config, &manifest, delta_from.as_deref(), delta_latest).await
        }
        Commands::Verify {
            version,
            build_type,
            manifest,
        } => {
            let config = config::load(&config_path)?;
            handle_verify_command(&config, build_type, &version, manifest.as_deref()).await
        }
        Commands::Promote {
            version,
            build_type,
            manifest,
        } => {
            let config = config::load(&config_path)?;
            handle_promote_command(&config, build_type, &version, manifest.as_deref()).await
        }
        Commands::Versions { build_type } => {
            let config = config::load(&config_path)?;
            handle_versions_command(&config, build_type).await
        }
        Commands::Reconstruct {
            manifest,
            output,
            file,
        } => {
            let config = config::load(&config_path)?;
            handle_reconstruct_command(&config, &manifest, &output, file.as_deref()).await
        }
        Commands::Cleanup { manifests } => {
            let config = config::load(&config_path)?;
            handle_cleanup_command(&config, &manifests).await
        }
    }
}

async fn open_chunk_store(config: &AppConfig) -> Result<ChunkStore> {
    let store = ChunkStore::open(&config.cache.path)
        .await
        .with_context(|| format!("failed to open chunk store at {}", config.cache.path.display()))?;
    Ok(store.with_batch_size(config.publish.reconstruct_batch_size))
}

async fn open_remote(config: &AppConfig) -> Result<RemoteRepository> {
    let store = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize remote storage")?;
    Ok(RemoteRepository::new(store).with_public_base_url(config.publish.public_base_url.clone()))
}

async fn uploader(config: &AppConfig) -> Result<Uploader> {
    let chunks = open_chunk_store(config).await?;
    let remote = open_remote(config).await?;
    Ok(Uploader::new(Arc::new(chunks), remote))
}

async fn read_manifest(path: &Path) -> Result<Manifest> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    PackageManifest::parse(&json, Validation::Lenient)
        .and_then(PackageManifest::into_chunk_based)
        .with_context(|| format!("invalid manifest {}", path.display()))
}

async fn handle_package_command(
    config: &AppConfig,
    options: &PackageOptions,
    output: &Path,
) -> Result<()> {
    let chunks = open_chunk_store(config).await?;
    println!(
        "Packaging {} as {} {}...",
        options.root.display(),
        options.build_type,
        options.version
    );

    let progress = StderrProgress::new();
    let result = depot_sync::package(options, &chunks, &progress).await;
    progress.finish();
    let report = result.context("packaging failed")?;

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output, report.manifest.to_json_pretty()?)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "✓ Packaged {} files ({} bytes) into {} chunks ({} unique, {} new)",
        report.file_count,
        report.total_bytes,
        report.chunk_count,
        report.unique_chunks,
        report.chunks_written
    );
    println!("  Manifest written to {}", output.display());
    Ok(())
}

async fn handle_diff_command(old: &Path, new: &Path, json: bool) -> Result<()> {
    let old = read_manifest(old).await?;
    let new = read_manifest(new).await?;
    let report = depot_core::diff(&old, &new)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} {} -> {}", new.build_type, old.version, new.version);
    for file in &report.new_files {
        println!("  + {file}");
    }
    for file in &report.changed_files {
        println!("  ~ {file}");
    }
    for file in &report.deleted_files {
        println!("  - {file}");
    }
    let summary = &report.summary;
    println!(
        "\n{} added, {} changed, {} deleted, {} unchanged",
        summary.files_added, summary.files_changed, summary.files_deleted, summary.files_unchanged
    );
    println!(
        "{} chunks ({} bytes) to upload",
        summary.chunks_to_upload, summary.bytes_to_upload
    );
    Ok(())
}

async fn handle_upload_command(
    config: &AppConfig,
    manifest_path: &Path,
    delta_from: Option<&Path>,
    delta_latest: bool,
) -> Result<()> {
    let mut manifest = read_manifest(manifest_path).await?;
    let uploader = uploader(config).await?;

    let previous = if let Some(path) = delta_from {
        Some(read_manifest(path).await?)
    } else if delta_latest {
        match uploader.remote().fetch_latest(manifest.build_type).await? {
            Some(latest) => Some(latest.into_chunk_based()?),
            None => {
                println!(
                    "No latest manifest for {}, uploading every chunk",
                    manifest.build_type
                );
                None
            }
        }
    } else {
        None
    };

    let worklist = plan_upload(&mut manifest, previous.as_ref())?;
    match &previous {
        Some(previous) => println!(
            "Uploading {} {}: {} chunks not in {}",
            manifest.build_type,
            manifest.version,
            worklist.len(),
            previous.version
        ),
        None => println!(
            "Uploading {} {}: {} chunks",
            manifest.build_type,
            manifest.version,
            worklist.len()
        ),
    }

    let session = UploadSession::new();
    let canceller = session.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling upload after the current chunk...");
            canceller.cancel();
        }
    });

    let progress = StderrProgress::new();
    let result = uploader
        .upload(&session, &mut manifest, &worklist, &progress)
        .await;
    ctrl_c.abort();
    progress.finish();

    let stats = result.context("upload failed")?;
    println!(
        "✓ Published {} {}: {} uploaded, {} skipped, {} failed ({} bytes)",
        manifest.build_type,
        manifest.version,
        stats.uploaded,
        stats.skipped,
        stats.failed,
        stats.bytes_uploaded
    );
    if stats.failed > 0 {
        anyhow::bail!(
            "{} chunk(s) failed to upload; run the upload again before promoting",
            stats.failed
        );
    }
    Ok(())
}

async fn resolve_manifest(
    uploader: &Uploader,
    build_type: BuildType,
    version: &str,
    path: Option<&Path>,
) -> Result<Manifest> {
    if let Some(path) = path {
        return read_manifest(path).await;
    }
    uploader
        .remote()
        .fetch_manifest(build_type, version)
        .await?
        .with_context(|| format!("no published manifest for {build_type} {version}"))?
        .into_chunk_based()
        .map_err(Into::into)
}

async fn handle_verify_command(
    config: &AppConfig,
    build_type: BuildType,
    version: &str,
    manifest: Option<&Path>,
) -> Result<()> {
    let uploader = uploader(config).await?;
    let manifest = resolve_manifest(&uploader, build_type, version, manifest).await?;

    let progress = StderrProgress::new();
    let result = uploader.verify(&manifest, &progress).await;
    progress.finish();
    let report = result.context("verification failed")?;

    if report.all_exist {
        println!(
            "✓ All {} chunks of {build_type} {version} are present",
            report.existing.len()
        );
        return Ok(());
    }
    for hash in &report.missing {
        println!("  missing {hash}");
    }
    anyhow::bail!(
        "{} of {} chunks missing",
        report.missing.len(),
        report.missing.len() + report.existing.len()
    )
}

async fn handle_promote_command(
    config: &AppConfig,
    build_type: BuildType,
    version: &str,
    manifest: Option<&Path>,
) -> Result<()> {
    let uploader = uploader(config).await?;
    let manifest = match manifest {
        Some(path) => Some(read_manifest(path).await?),
        None => None,
    };

    let progress = StderrProgress::new();
    let result = uploader
        .promote(build_type, version, manifest, &progress)
        .await;
    progress.finish();
    let report = result.context("promotion failed")?;

    println!(
        "✓ {} {} is now latest ({} chunks verified)",
        report.build_type, report.version, report.chunks_verified
    );
    Ok(())
}

async fn handle_versions_command(config: &AppConfig, build_type: BuildType) -> Result<()> {
    let remote = open_remote(config).await?;
    let versions = remote.list_versions(build_type).await?;
    let latest = remote
        .fetch_latest(build_type)
        .await?
        .map(|m| m.version().to_string());

    if versions.is_empty() {
        println!("No versions published for {build_type}");
        return Ok(());
    }
    for version in &versions {
        let marker = if latest.as_deref() == Some(version.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {version}");
    }
    Ok(())
}

/// Resolve a manifest filename under `root`, refusing paths that escape it.
fn output_path(root: &Path, filename: &str) -> Result<PathBuf> {
    let relative = Path::new(filename);
    if filename.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        anyhow::bail!("refusing to write outside the output directory: {filename}");
    }
    Ok(root.join(relative))
}

async fn handle_reconstruct_command(
    config: &AppConfig,
    manifest: &Path,
    output: &Path,
    only: Option<&str>,
) -> Result<()> {
    let manifest = read_manifest(manifest).await?;
    let chunks = open_chunk_store(config).await?;

    let files: Vec<_> = match only {
        Some(name) => vec![
            manifest
                .file(name)
                .with_context(|| format!("{name} is not in the manifest"))?,
        ],
        None => manifest.files.iter().collect(),
    };

    for entry in files {
        let target = output_path(output, &entry.filename)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target)
            .await
            .with_context(|| format!("failed to create {}", target.display()))?;
        let written = chunks
            .reconstruct(&entry.chunks, &mut file)
            .await
            .with_context(|| format!("failed to reconstruct {}", entry.filename))?;
        println!("✓ {} ({written} bytes)", entry.filename);
    }
    Ok(())
}

async fn handle_cleanup_command(config: &AppConfig, manifests: &[PathBuf]) -> Result<()> {
    let mut keep = HashSet::new();
    for path in manifests {
        keep.extend(read_manifest(path).await?.unique_chunk_hashes());
    }

    let chunks = open_chunk_store(config).await?;
    let removed = chunks.cleanup(&keep).await?;
    println!("✓ Removed {removed} unreferenced chunks, kept {}", keep.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_stays_inside_root() {
        let root = Path::new("/restore");
        assert_eq!(
            output_path(root, "bin/game.exe").unwrap(),
            PathBuf::from("/restore/bin/game.exe")
        );
        assert!(output_path(root, "../etc/passwd").is_err());
        assert!(output_path(root, "/etc/passwd").is_err());
        assert!(output_path(root, "").is_err());
    }

    #[test]
    fn upload_delta_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "depotctl",
            "upload",
            "m.json",
            "--delta-from",
            "old.json",
            "--delta-latest",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn build_type_is_parsed() {
        let cli = Cli::try_parse_from(["depotctl", "versions", "--build-type", "Staging"]).unwrap();
        match cli.command {
            Commands::Versions { build_type } => assert_eq!(build_type, BuildType::Staging),
            _ => panic!("wrong command"),
        }
    }
}
