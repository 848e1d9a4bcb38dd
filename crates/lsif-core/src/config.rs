use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3186,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one file per repository@commit per encoding.
    pub root: PathBuf,
    /// Soft limit on total disk usage. A single dump larger than this is still kept.
    pub soft_max_bytes: u64,
    /// Largest dump accepted by `/upload`.
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lsif-storage"),
            soft_max_bytes: 100 * GIB,
            max_upload_bytes: 100 * MIB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Budget for resident databases, measured in on-disk bytes.
    pub soft_max_memory_bytes: u64,
    /// Budget for decoded document blobs, by approximate in-memory size.
    pub blob_cache_max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            soft_max_memory_bytes: 100 * MIB,
            blob_cache_max_bytes: 64 * MIB,
        }
    }
}

/// Independent switches for each on-disk encoding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendFlags {
    pub json: bool,
    pub graph: bool,
    pub blob: bool,
}

impl Default for BackendFlags {
    fn default() -> Self {
        Self {
            json: true,
            graph: true,
            blob: true,
        }
    }
}

impl BackendFlags {
    pub fn any_enabled(&self) -> bool {
        self.json || self.graph || self.blob
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// External converter binary. The in-process converter is used when unset.
    pub binary: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub backends: BackendFlags,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            backends: BackendFlags::default(),
            converter: ConverterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Flat variables understood by earlier deployments, mapped onto settings keys.
const LEGACY_INT_VARS: [(&str, &str); 4] = [
    ("LSIF_SOFT_MAX_STORAGE", "storage.soft_max_bytes"),
    ("LSIF_MAX_FILE_SIZE", "storage.max_upload_bytes"),
    ("LSIF_SOFT_MAX_STORAGE_IN_MEMORY", "cache.soft_max_memory_bytes"),
    ("LSIF_HTTP_PORT", "server.port"),
];

const LEGACY_BOOL_VARS: [(&str, &str); 3] = [
    ("LSIF_ENABLE_JSON", "backends.json"),
    ("LSIF_ENABLE_GRAPH", "backends.graph"),
    ("LSIF_ENABLE_BLOB", "backends.blob"),
];

impl Settings {
    fn default_env() -> String {
        env::var("LSIF_ENV")
            .ok()
            .or_else(|| env::var("APP_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    /// Load settings from `config_dir` and the process environment.
    pub fn load(config_dir: &Path, env_name: Option<&str>) -> Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        let env_name = env_name
            .map(str::to_string)
            .unwrap_or_else(Self::default_env);
        Self::load_from_sources(config_dir, &env_name, vars)
    }

    /// Layered load: defaults, `default.toml`, `<env>.toml`, `local.toml`,
    /// `LSIF__SECTION__KEY` variables, then the legacy flat variables.
    pub fn load_from_sources(
        config_dir: &Path,
        env_name: &str,
        vars: HashMap<String, String>,
    ) -> Result<Self> {
        let mut builder = cfg::Config::builder()
            .set_default("env", env_name)?
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix("LSIF")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars.clone().into_iter().collect())),
            );

        for (var, key) in LEGACY_INT_VARS {
            let value = vars.get(var).and_then(|v| v.trim().parse::<i64>().ok());
            builder = builder.set_override_option(key, value)?;
        }
        for (var, key) in LEGACY_BOOL_VARS {
            let value = vars.get(var).and_then(|v| parse_flag(v));
            builder = builder.set_override_option(key, value)?;
        }
        if let Some(root) = vars.get("LSIF_STORAGE_ROOT").filter(|v| !v.is_empty()) {
            builder = builder.set_override("storage.root", root.as_str())?;
        }

        let settings: Settings = builder
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("failed to deserialize settings")?;

        info!(
            env = %settings.env,
            storage_root = %settings.storage.root.display(),
            "Loaded configuration"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            !self.storage.root.as_os_str().is_empty(),
            "storage.root cannot be empty"
        );
        anyhow::ensure!(
            self.storage.max_upload_bytes > 0,
            "storage.max_upload_bytes must be > 0"
        );
        anyhow::ensure!(
            self.backends.any_enabled(),
            "at least one of backends.json, backends.graph, backends.blob must be enabled"
        );
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_sources(dir.path(), "test", HashMap::new()).unwrap();
        assert_eq!(settings.server.port, 3186);
        assert_eq!(settings.storage.root, PathBuf::from("lsif-storage"));
        assert_eq!(settings.storage.max_upload_bytes, 100 * MIB);
        assert_eq!(settings.cache.soft_max_memory_bytes, 100 * MIB);
        assert!(settings.backends.json && settings.backends.graph && settings.backends.blob);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn legacy_variables_override_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[server]\nport = 4000\n[storage]\nroot = \"/from/file\"\n",
        )
        .unwrap();
        let settings = Settings::load_from_sources(
            dir.path(),
            "test",
            vars(&[
                ("LSIF_HTTP_PORT", "5000"),
                ("LSIF_STORAGE_ROOT", "/from/env"),
                ("LSIF_ENABLE_GRAPH", "false"),
                ("LSIF_SOFT_MAX_STORAGE_IN_MEMORY", "not-a-number"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.storage.root, PathBuf::from("/from/env"));
        assert!(!settings.backends.graph);
        assert_eq!(settings.cache.soft_max_memory_bytes, 100 * MIB);
    }

    #[test]
    fn nested_variables_and_env_files_are_layered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("staging.toml"), "[cache]\nblob_cache_max_bytes = 10\n")
            .unwrap();
        let settings = Settings::load_from_sources(
            dir.path(),
            "staging",
            vars(&[("LSIF__STORAGE__MAX_UPLOAD_BYTES", "2048")]),
        )
        .unwrap();
        assert_eq!(settings.env, "staging");
        assert_eq!(settings.cache.blob_cache_max_bytes, 10);
        assert_eq!(settings.storage.max_upload_bytes, 2048);
    }

    #[test]
    fn validation_requires_an_enabled_backend() {
        let mut settings = Settings::default();
        settings.backends = BackendFlags {
            json: false,
            graph: false,
            blob: false,
        };
        assert!(settings.validate().is_err());
    }
}
