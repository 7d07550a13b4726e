use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::reconcile::IdentityPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReftreeConfig {
    pub database: Option<String>,
    pub identity_policy: IdentityPolicy,
    pub cache: CacheConfig,
}

/// Capacities of the bounded lookup caches; 0 disables a cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub field_map: usize,
    pub parents: usize,
    pub roots: usize,
    pub published: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            field_map: 256,
            parents: 4096,
            roots: 4096,
            published: 4096,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("reftree.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("reftree.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ReftreeConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ReftreeConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &ReftreeConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reftree.toml");
        std::fs::write(
            &path,
            "identity_policy = \"save_first\"\n[cache]\nparents = 10\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.identity_policy, IdentityPolicy::SaveFirst);
        assert_eq!(config.cache.parents, 10);
        assert_eq!(config.cache.roots, CacheConfig::default().roots);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_write_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reftree.toml");
        let config = ReftreeConfig {
            database: Some("data/edges.db".to_string()),
            ..ReftreeConfig::default()
        };

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.database.as_deref(), Some("data/edges.db"));
        assert_eq!(loaded.identity_policy, IdentityPolicy::Require);
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("reftree.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().exists());
    }
}
