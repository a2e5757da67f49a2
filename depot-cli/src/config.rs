//! Configuration loading for the `depot` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use depot_core::ClientConfig;
use directories::ProjectDirs;

/// Client settings together with where they came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub client: ClientConfig,
    pub config_path: PathBuf,
    /// Whether `config_path` actually existed.
    pub from_file: bool,
}

/// Load configuration from `--config`, or the default location, then apply
/// environment and `--base-url` overrides in that order.
pub fn load_config(path: Option<&Path>, base_url: Option<&str>) -> Result<LoadedConfig> {
    load_config_with(path, base_url, |key| std::env::var(key).ok())
}

fn load_config_with(
    path: Option<&Path>,
    base_url: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<LoadedConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let from_file = config_path.exists();
    let mut client = if from_file {
        ClientConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else if path.is_some() {
        bail!("Config file {:?} does not exist", config_path);
    } else {
        ClientConfig::default()
    };

    client
        .apply_env_overrides(lookup)
        .context("Invalid configuration override in environment")?;

    if let Some(base_url) = base_url {
        client.base_url = ClientConfig::new(base_url)
            .with_context(|| format!("Invalid --base-url {:?}", base_url))?
            .base_url;
    }

    Ok(LoadedConfig {
        client,
        config_path,
        from_file,
    })
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("client.toml"))
        .unwrap_or_else(|| PathBuf::from("depot.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "depot-wms", "depot")
}
