// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "landspill";
const CONFIG_FILE_NAME: &str = "landspill.toml";
const CONFIG_ENV_VAR: &str = "LANDSPILL_CONFIG_PATH";
const CREDENTIAL_FILE_NAME: &str = "credential.bin";
const DEFAULT_VM_SIZE: &str = "STANDARD_H8";
const DEFAULT_NODE_TYPE: &str = "dedicated";
const DEFAULT_MAX_NODES: u32 = 1;
const DEFAULT_UPLOAD_PARALLELISM: usize = 4;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    credential_path: Option<String>,
    working_dir: Option<String>,
    vm_size: Option<String>,
    node_type: Option<String>,
    max_nodes: Option<u32>,
    upload_parallelism: Option<usize>,
    core_quota: Option<u32>,
    poll_interval_secs: Option<u64>,
    verbose: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credential_path: PathBuf,
    /// Mission records are kept here.
    pub working_dir: PathBuf,
    pub vm_size: String,
    pub node_type: String,
    pub max_nodes: u32,
    pub upload_parallelism: usize,
    pub core_quota: Option<u32>,
    pub poll_interval_secs: u64,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub credential_path: ConfigValue<PathBuf>,
    pub working_dir: ConfigValue<PathBuf>,
    pub vm_size: ConfigValue<String>,
    pub node_type: ConfigValue<String>,
    pub max_nodes: ConfigValue<u32>,
    pub upload_parallelism: ConfigValue<usize>,
    pub core_quota: ConfigValue<Option<u32>>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub verbose: ConfigValue<bool>,
}

impl ConfigReport {
    /// Logs every resolved value together with where it came from.
    pub fn log(&self) {
        match (&self.config_path, self.config_path_source) {
            (Some(path), Some(source)) => tracing::info!(
                path = %path.display(),
                source = source.as_str(),
                present = self.config_file_present,
                "config path"
            ),
            (Some(path), None) => tracing::info!(
                path = %path.display(),
                present = self.config_file_present,
                "config path"
            ),
            (None, _) => tracing::info!("config path: (none)"),
        }
        let entries = [
            (
                "credential_path",
                self.credential_path.value.display().to_string(),
                self.credential_path.source,
            ),
            (
                "working_dir",
                self.working_dir.value.display().to_string(),
                self.working_dir.source,
            ),
            ("vm_size", self.vm_size.value.clone(), self.vm_size.source),
            ("node_type", self.node_type.value.clone(), self.node_type.source),
            ("max_nodes", self.max_nodes.value.to_string(), self.max_nodes.source),
            (
                "upload_parallelism",
                self.upload_parallelism.value.to_string(),
                self.upload_parallelism.source,
            ),
            (
                "core_quota",
                self.core_quota
                    .value
                    .map_or_else(|| "(none)".to_string(), |quota| quota.to_string()),
                self.core_quota.source,
            ),
            (
                "poll_interval_secs",
                self.poll_interval_secs.value.to_string(),
                self.poll_interval_secs.source,
            ),
            ("verbose", self.verbose.value.to_string(), self.verbose.source),
        ];
        for (key, value, source) in entries {
            tracing::info!(key, value = %value, source = source.as_str(), "config value");
        }
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub credential_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub vm_size: Option<String>,
    pub node_type: Option<String>,
    pub max_nodes: Option<u32>,
    pub upload_parallelism: Option<usize>,
    pub core_quota: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

/// First present value wins: flag, then file, then default.
fn layered<T>(flag: Option<T>, file: Option<T>, default: impl FnOnce() -> T) -> ConfigValue<T> {
    match (flag, file) {
        (Some(value), _) => ConfigValue {
            value,
            source: ConfigSource::Override,
        },
        (None, Some(value)) => ConfigValue {
            value,
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default(),
            source: ConfigSource::Default,
        },
    }
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let credential_path = match (overrides.credential_path, file_config.credential_path) {
        (Some(path), _) => ConfigValue {
            value: expand_path(path),
            source: ConfigSource::Override,
        },
        (None, Some(raw)) => ConfigValue {
            value: resolve_path(&raw, base_dir),
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default_credential_path().with_context(|| {
                "failed to resolve default credential path; specify --credential or set credential_path in the config file"
            })?,
            source: ConfigSource::Default,
        },
    };
    let working_dir = match (overrides.working_dir, file_config.working_dir) {
        (Some(path), _) => ConfigValue {
            value: expand_path(path),
            source: ConfigSource::Override,
        },
        (None, Some(raw)) => ConfigValue {
            value: resolve_path(&raw, base_dir),
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: PathBuf::from("."),
            source: ConfigSource::Default,
        },
    };

    let vm_size = layered(overrides.vm_size, file_config.vm_size, || {
        DEFAULT_VM_SIZE.to_string()
    });
    let node_type = layered(overrides.node_type, file_config.node_type, || {
        DEFAULT_NODE_TYPE.to_string()
    });
    let max_nodes = layered(overrides.max_nodes, file_config.max_nodes, || {
        DEFAULT_MAX_NODES
    });
    if max_nodes.value == 0 {
        anyhow::bail!("max_nodes must be at least 1");
    }
    let upload_parallelism = layered(
        overrides.upload_parallelism,
        file_config.upload_parallelism,
        || DEFAULT_UPLOAD_PARALLELISM,
    );
    if upload_parallelism.value == 0 {
        anyhow::bail!("upload_parallelism must be at least 1");
    }
    let core_quota = match (overrides.core_quota, file_config.core_quota) {
        (Some(quota), _) => ConfigValue {
            value: Some(quota),
            source: ConfigSource::Override,
        },
        (None, Some(quota)) => ConfigValue {
            value: Some(quota),
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: None,
            source: ConfigSource::Default,
        },
    };
    let poll_interval_secs = layered(
        overrides.poll_interval_secs,
        file_config.poll_interval_secs,
        || DEFAULT_POLL_INTERVAL_SECS,
    );
    if poll_interval_secs.value == 0 {
        anyhow::bail!("poll_interval_secs must be at least 1");
    }
    let verbose = layered(overrides.verbose, file_config.verbose, || false);

    let config = Config {
        credential_path: credential_path.value.clone(),
        working_dir: working_dir.value.clone(),
        vm_size: vm_size.value.clone(),
        node_type: node_type.value.clone(),
        max_nodes: max_nodes.value,
        upload_parallelism: upload_parallelism.value,
        core_quota: core_quota.value,
        poll_interval_secs: poll_interval_secs.value,
        verbose: verbose.value,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        credential_path,
        working_dir,
        vm_size,
        node_type,
        max_nodes,
        upload_parallelism,
        core_quota,
        poll_interval_secs,
        verbose,
    };

    Ok(LoadResult { config, report })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_credential_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CREDENTIAL_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                match &self.prev {
                    Some(value) => std::env::set_var(self.key, value),
                    None => std::env::remove_var(self.key),
                }
            }
        }
    }

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, contents).unwrap();
        config_path
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let cfg = read_config_file(&dir.path().join("missing.toml"), false).unwrap();
        assert!(cfg.credential_path.is_none());
        assert!(cfg.max_nodes.is_none());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = read_config_file(&dir.path().join("missing.toml"), true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "max_node = 3\n");
        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn relative_paths_resolve_from_config_dir() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "credential_path = \"secrets/cred.bin\"\nworking_dir = \"missions\"\n",
        );
        let config_dir = config_path.parent().unwrap().to_path_buf();

        let config = load(Some(config_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.credential_path, config_dir.join("secrets").join("cred.bin"));
        assert_eq!(config.working_dir, config_dir.join("missions"));
        assert_eq!(config.config_path, Some(config_path));
    }

    #[test]
    fn defaults_fill_missing_values() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "credential_path = \"cred.bin\"\n");

        let LoadResult { config, report } =
            load_with_report(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.vm_size, DEFAULT_VM_SIZE);
        assert_eq!(config.node_type, DEFAULT_NODE_TYPE);
        assert_eq!(config.max_nodes, DEFAULT_MAX_NODES);
        assert_eq!(config.upload_parallelism, DEFAULT_UPLOAD_PARALLELISM);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.core_quota, None);
        assert!(!config.verbose);
        assert_eq!(report.max_nodes.source, ConfigSource::Default);
        assert_eq!(report.credential_path.source, ConfigSource::ConfigFile);
    }

    #[test]
    fn overrides_apply_per_field() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "credential_path = \"cred.bin\"\nmax_nodes = 4\nvm_size = \"STANDARD_H16\"\ncore_quota = 64\n",
        );

        let LoadResult { config, report } = load_with_report(
            Some(config_path),
            Overrides {
                max_nodes: Some(2),
                verbose: Some(true),
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(config.max_nodes, 2);
        assert_eq!(config.vm_size, "STANDARD_H16");
        assert_eq!(config.core_quota, Some(64));
        assert!(config.verbose);
        assert_eq!(report.max_nodes.source, ConfigSource::Override);
        assert_eq!(report.vm_size.source, ConfigSource::ConfigFile);
    }

    #[test]
    fn zero_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "credential_path = \"cred.bin\"\nmax_nodes = 0\n");
        let err = load(Some(config_path.clone()), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("max_nodes"));

        let err = load(
            Some(config_path),
            Overrides {
                max_nodes: Some(1),
                upload_parallelism: Some(0),
                ..Overrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("upload_parallelism"));
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "credential_path = \"cred.bin\"\nmax_nodes = 7\n");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, config_path.to_str().unwrap());

        let LoadResult { config, report } = load_with_report(None, Overrides::default()).unwrap();
        assert_eq!(config.max_nodes, 7);
        assert_eq!(config.config_path, Some(config_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Env));
    }

    #[test]
    fn cli_config_path_takes_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("env.toml");
        let cli_path = dir.path().join("cli.toml");
        fs::write(&env_path, "credential_path = \"cred.bin\"\nmax_nodes = 3\n").unwrap();
        fs::write(&cli_path, "credential_path = \"cred.bin\"\nmax_nodes = 5\n").unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, env_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(Some(cli_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.max_nodes, 5);
        assert_eq!(config.config_path, Some(cli_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Override));
    }

    #[test]
    fn empty_env_config_path_errors() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, "");
        let err = load(None, Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("set but empty"));
    }
}
