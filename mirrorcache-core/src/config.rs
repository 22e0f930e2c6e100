use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Process-wide proxy configuration, loaded from defaults, overlaid with the
/// on-disk JSON file, and finally overlaid with CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Absolute form of `storage_path`, computed at load time. Not meant to
    /// be hand-edited; present in the serialized form purely so external
    /// tooling that reads the config file can see the resolved value.
    #[serde(default)]
    pub storage_path_resolved: String,

    #[serde(default = "default_cache_days")]
    pub cache_days: u32,

    #[serde(default = "default_true")]
    pub cache_retention_enabled: bool,

    #[serde(default = "default_true")]
    pub passthrough_mode: bool,

    #[serde(default)]
    pub admin_token: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3142
}
fn default_storage_path() -> String {
    "storage".to_string()
}
fn default_cache_days() -> u32 {
    7
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_database_path() -> String {
    "data/stats.db".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage_path: default_storage_path(),
            storage_path_resolved: String::new(),
            cache_days: default_cache_days(),
            cache_retention_enabled: true,
            passthrough_mode: true,
            admin_token: String::new(),
            log_level: default_log_level(),
            database_path: default_database_path(),
        }
    }
}

impl ProxyConfig {
    /// Resolve `storage_path` to an absolute path relative to `base_dir`
    /// (the directory the config file lives in), creating it if necessary,
    /// and set `storage_path_resolved` accordingly.
    pub fn resolve_storage_path(&mut self, base_dir: &Path) -> std::io::Result<()> {
        let raw = PathBuf::from(&self.storage_path);
        let resolved = if raw.is_absolute() {
            raw
        } else {
            base_dir.join(raw)
        };
        std::fs::create_dir_all(&resolved)?;
        self.storage_path_resolved = resolved.to_string_lossy().into_owned();
        Ok(())
    }
}

/// Thread-safe key→value config store backed by a JSON file.
///
/// `set` round-trips through the on-disk representation (read → modify →
/// write) so that keys the running process does not know about (added by an
/// operator editing the file directly) survive an admin-triggered update of
/// an unrelated key.
pub struct ConfigStore {
    path: PathBuf,
    base_dir: PathBuf,
    inner: RwLock<ProxyConfig>,
    /// Serializes the read-modify-write cycle in `set` so concurrent admin
    /// writes cannot interleave and drop each other's changes.
    write_lock: parking_lot::Mutex<()>,
}

impl ConfigStore {
    /// Load `path`, falling back to defaults if the file does not exist.
    /// Any existing config file is deserialized over the defaults, so
    /// missing keys still get their documented default.
    pub fn load(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<ProxyConfig>(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "malformed config file, using defaults");
                    ProxyConfig::default()
                }
            }
        } else {
            info!(path = %path.display(), "no config file found, using defaults");
            ProxyConfig::default()
        };

        config.resolve_storage_path(&base_dir)?;

        Ok(Self {
            path,
            base_dir,
            inner: RwLock::new(config),
            write_lock: parking_lot::Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> ProxyConfig {
        self.inner.read().clone()
    }

    /// Re-read the on-disk file into memory, same logic as `load`.
    pub fn reload(&self) -> std::io::Result<()> {
        let mut config = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path)?;
            serde_json::from_str::<ProxyConfig>(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "malformed config file on reload, keeping in-memory values");
                self.inner.read().clone()
            })
        } else {
            self.inner.read().clone()
        };
        config.resolve_storage_path(&self.base_dir)?;
        *self.inner.write() = config;
        Ok(())
    }

    /// Update a single field and persist it, preserving any unrelated keys
    /// that may have been added directly to the file on disk.
    pub fn set(&self, key: &str, value: serde_json::Value) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();

        let mut disk: serde_json::Value = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path)?;
            serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        if let Some(obj) = disk.as_object_mut() {
            obj.insert(key.to_string(), value.clone());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&disk)?)?;

        let mut updated: ProxyConfig = serde_json::from_value(disk).unwrap_or_else(|_| self.inner.read().clone());
        updated.resolve_storage_path(&self.base_dir)?;
        *self.inner.write() = updated;

        info!(key, "config updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.cache_days, 7);
        assert!(cfg.cache_retention_enabled);
        assert!(cfg.passthrough_mode);
        assert!(cfg.admin_token.is_empty());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path).unwrap();
        let cfg = store.snapshot();
        assert_eq!(cfg.cache_days, 7);
        assert!(!cfg.storage_path_resolved.is_empty());
    }

    #[test]
    fn load_malformed_file_is_noop_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json at all {{{").unwrap();
        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.snapshot().cache_days, 7);
    }

    #[test]
    fn set_preserves_unrelated_disk_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            serde_json::json!({"cache_days": 3, "some_external_key": "keep-me"}).to_string(),
        )
        .unwrap();

        let store = ConfigStore::load(&path).unwrap();
        store.set("cache_days", serde_json::json!(14)).unwrap();

        let disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(disk["cache_days"], 14);
        assert_eq!(disk["some_external_key"], "keep-me");
        assert_eq!(store.snapshot().cache_days, 14);
    }

    #[test]
    fn storage_path_resolves_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::json!({"storage_path": "cache"}).to_string()).unwrap();
        let store = ConfigStore::load(&path).unwrap();
        let cfg = store.snapshot();
        assert_eq!(cfg.storage_path_resolved, dir.path().join("cache").to_string_lossy());
        assert!(Path::new(&cfg.storage_path_resolved).is_dir());
    }
}
