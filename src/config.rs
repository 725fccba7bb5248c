use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub snapshot_dir: PathBuf,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

/// Grade cut-offs shared by every metric deriver.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Thresholds {
    pub passing: f64,
    pub deans_list: f64,
    pub good_standing: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            passing: 75.0,
            deans_list: 90.0,
            good_standing: 75.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub thresholds: Thresholds,
    pub log: LogConfig,
}

impl AppConfig {
    /// Layers defaults, an optional TOML file and `ACADEMIC_*` environment
    /// variables. `DATABASE_URL` wins over everything for the database url.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("source.kind", "file")?
            .set_default("source.snapshot_dir", "data/snapshots")?
            .set_default("source.cache_dir", "data/cache")?
            .set_default("database.max_connections", 5)?
            .set_default("cache.ttl_secs", 300)?
            .set_default("cache.max_capacity", 64)?
            .set_default("thresholds.passing", 75.0)?
            .set_default("thresholds.deans_list", 90.0)?
            .set_default("thresholds.good_standing", 75.0)?
            .set_default("log.level", "info")?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("academic").required(false)),
        };

        builder = builder
            .add_source(
                Environment::with_prefix("ACADEMIC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?;

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_registrar_cutoffs() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.passing, 75.0);
        assert_eq!(thresholds.deans_list, 90.0);
        assert_eq!(thresholds.good_standing, 75.0);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("academic.toml");
        std::fs::write(
            &path,
            "[source]\nkind = \"postgres\"\n\n[thresholds]\npassing = 70.0\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.source.kind, SourceKind::Postgres);
        assert_eq!(config.thresholds.passing, 70.0);
        assert_eq!(config.thresholds.deans_list, 90.0);
        assert_eq!(config.cache.ttl_secs, 300);
    }
}
