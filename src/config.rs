use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::IndexOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/convodex.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_prefix")]
    pub prefix: bool,
    #[serde(default = "default_max_edit_distance")]
    pub max_edit_distance: u32,
    #[serde(default = "default_title_boost")]
    pub title_boost: f64,
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max_edit_distance: default_max_edit_distance(),
            title_boost: default_title_boost(),
            k1: default_k1(),
            b: default_b(),
        }
    }
}

fn default_prefix() -> bool {
    true
}
fn default_max_edit_distance() -> u32 {
    1
}
fn default_title_boost() -> f64 {
    2.0
}
fn default_k1() -> f64 {
    1.2
}
fn default_b() -> f64 {
    0.75
}

impl IndexConfig {
    /// Build options handed to the index engine. Changing any of these
    /// invalidates persisted index artifacts on the next load.
    pub fn options(&self) -> IndexOptions {
        IndexOptions {
            prefix: self.prefix,
            max_edit_distance: self.max_edit_distance,
            title_boost: self.title_boost,
            k1: self.k1,
            b: self.b,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> i64 {
    20
}

impl Config {
    /// All-defaults configuration, used when no config file is present.
    pub fn minimal() -> Config {
        Config::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.index.title_boost <= 0.0 {
        anyhow::bail!("index.title_boost must be > 0");
    }
    if config.index.k1 <= 0.0 {
        anyhow::bail!("index.k1 must be > 0");
    }
    if !(0.0..=1.0).contains(&config.index.b) {
        anyhow::bail!("index.b must be in [0.0, 1.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("convodex.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_empty_config_gets_defaults() {
        let (_tmp, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/convodex.sqlite"));
        assert_eq!(config.retrieval.final_limit, 20);
        assert!(config.index.prefix);
        assert_eq!(config.index.max_edit_distance, 1);
    }

    #[test]
    fn test_partial_config() {
        let (_tmp, path) = write_config(
            r#"
            [db]
            path = "/tmp/x.sqlite"

            [index]
            title_boost = 3.5
            "#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(config.index.title_boost, 3.5);
        // Untouched sections keep defaults.
        assert_eq!(config.index.k1, 1.2);
    }

    #[test]
    fn test_invalid_limit_rejected() {
        let (_tmp, path) = write_config("[retrieval]\nfinal_limit = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_invalid_b_rejected() {
        let (_tmp, path) = write_config("[index]\nb = 1.5\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_options_mirror_config() {
        let config = Config::minimal();
        let options = config.index.options();
        assert_eq!(options, IndexOptions::default());
    }
}
