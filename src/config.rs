use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Bounded retry policy for opening the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Parent directory holding the store directory
    pub database_dir: PathBuf,
    /// Name of the store; the store lives in `<database_dir>/<store_name>/`
    pub store_name: String,
    /// Use a named shared-cache in-memory store instead of a file
    pub in_memory: bool,
    pub cache_size_kib: u32,
    pub busy_timeout_ms: u64,
    /// Roots under which indexed files must live to survive a sweep.
    /// Empty means no root restriction.
    pub shared_roots: Vec<PathBuf>,
    pub log_level: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_dir: default_database_dir(),
            store_name: "medias".to_string(),
            in_memory: false,
            cache_size_kib: 16 * 1024,
            busy_timeout_ms: 5_000,
            shared_roots: Vec::new(),
            log_level: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// In-memory configuration for tests and throwaway runs
    pub fn in_memory(store_name: &str) -> Self {
        Self {
            store_name: store_name.to_string(),
            in_memory: true,
            ..Self::default()
        }
    }

    /// Configuration for an on-disk store under `database_dir`
    pub fn on_disk(database_dir: &Path, store_name: &str) -> Self {
        Self {
            database_dir: database_dir.to_path_buf(),
            store_name: store_name.to_string(),
            ..Self::default()
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.database_dir.join(&self.store_name)
    }

    pub fn store_file(&self) -> PathBuf {
        self.store_dir().join(format!("{}.db", self.store_name))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Reject values the store cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        check_store_name(&self.store_name)?;
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A store name becomes a directory under `database_dir` that recovery may
/// delete, so it must be exactly one plain path component
pub fn check_store_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(crate::Error::Config("store_name must not be empty".to_string()));
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | '?' | '&' | '#')) {
        return Err(crate::Error::Config(format!(
            "store_name {:?} contains path or URI separators",
            name
        )));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(crate::Error::Config(format!(
            "store_name {:?} must be a plain directory name",
            name
        ))),
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("mediacache.toml")
}

pub fn default_database_dir() -> PathBuf {
    PathBuf::from(".mediacache").join("database")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<CacheConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: CacheConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &CacheConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(config: &CacheConfig) -> anyhow::Result<()> {
    let dir = &config.database_dir;
    if !dir.as_os_str().is_empty() && !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            store_name = "library"
            shared_roots = ["/srv/media"]

            [retry]
            max_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.store_name, "library");
        assert_eq!(config.shared_roots, vec![PathBuf::from("/srv/media")]);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.backoff_ms, 250);
        assert!(!config.in_memory);
    }

    #[test]
    fn test_store_paths() {
        let config = CacheConfig::on_disk(Path::new("/var/cache"), "medias");
        assert_eq!(config.store_dir(), PathBuf::from("/var/cache/medias"));
        assert_eq!(config.store_file(), PathBuf::from("/var/cache/medias/medias.db"));
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediacache.toml");
        let config = CacheConfig::default();

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_separators() {
        assert!(CacheConfig::in_memory("a/b").validate().is_err());
        assert!(CacheConfig::in_memory("").validate().is_err());
        assert!(CacheConfig::in_memory("ok").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_components() {
        for name in ["..", ".", "./x", "x/..", "/abs"] {
            let config = CacheConfig::on_disk(Path::new("/var/cache"), name);
            assert!(config.validate().is_err(), "{:?} was accepted", name);
        }
        assert!(CacheConfig::on_disk(Path::new("/var/cache"), "medias.v2").validate().is_ok());
    }
}
