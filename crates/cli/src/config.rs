//! Configuration loading for depotctl.

use anyhow::{Context, Result};
use depot_core::config::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "depot.toml";

fn figment(path: &Path) -> Figment {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path.display());
    }

    // DEPOT_CONFIG names the file itself and is not a setting.
    figment.merge(Env::prefixed("DEPOT_").ignore(&["config"]).split("__"))
}

/// Load configuration from an optional TOML file overlaid with `DEPOT_`
/// environment variables (`DEPOT_STORAGE__TYPE=s3`).
pub fn load(path: &Path) -> Result<AppConfig> {
    let config: AppConfig = figment(path)
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::config::StorageConfig;
    use std::path::PathBuf;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.cache.path, PathBuf::from("./data/chunks"));
        assert_eq!(config.publish.reconstruct_batch_size, 50);
    }

    #[test]
    fn file_settings_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depot.toml");
        std::fs::write(
            &path,
            r#"
[storage]
type = "s3"
bucket = "releases"
region = "eu-west-1"
force_path_style = true

[cache]
path = "/var/cache/depot"

[chunking]
min_size = 1024
avg_size = 4096
max_size = 16384

[publish]
public_base_url = "https://cdn.example.com/games"
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        match config.storage {
            StorageConfig::S3 {
                bucket,
                region,
                force_path_style,
                ..
            } => {
                assert_eq!(bucket, "releases");
                assert_eq!(region.as_deref(), Some("eu-west-1"));
                assert!(force_path_style);
            }
            other => panic!("unexpected storage config: {other:?}"),
        }
        assert_eq!(config.cache.path, PathBuf::from("/var/cache/depot"));
        assert_eq!(config.chunking.avg_size, 4096);
        assert_eq!(
            config.publish.public_base_url.as_deref(),
            Some("https://cdn.example.com/games")
        );
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depot.toml");
        std::fs::write(&path, "[chunking]\nmin_size = 0\n").unwrap();

        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("min_size"), "{err:#}");
    }
}
