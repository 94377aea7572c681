use anyhow::{Context, Result};
use collector_core::Anonymizer;
use ingest::StoreConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE: &str = "collector.yaml";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig { path: PathBuf::from("collector.db") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { listen: "127.0.0.1:7420".into() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSection {
    pub batch_size: usize,
    pub cache_size: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        let d = StoreConfig::default();
        StoreSection { batch_size: d.batch_size, cache_size: d.cache_size }
    }
}

/// Without a salt, labels are stored as-is in the anonymized tables.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct AnonymizerConfig {
    pub salt: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub batch_size: usize,
    pub window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig { batch_size: 50, window: 100 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub store: StoreSection,
    pub anonymizer: AnonymizerConfig,
    pub log_level: String,
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db: DbConfig::default(),
            server: ServerConfig::default(),
            store: StoreSection::default(),
            anonymizer: AnonymizerConfig::default(),
            log_level: "info".into(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    pub fn store(&self) -> StoreConfig {
        StoreConfig { batch_size: self.store.batch_size, cache_size: self.store.cache_size }
    }

    pub fn anonymizer(&self) -> Anonymizer {
        match &self.anonymizer.salt {
            Some(salt) => Anonymizer::salted_sha256(salt.clone()),
            None => Anonymizer::identity(),
        }
    }
}

/// An explicit path must exist; otherwise `./collector.yaml` is used when present.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("read config {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "store:\n  batch_size: 10\nanonymizer:\n  salt: pepper\nclient:\n  window: 7").unwrap();
        let cfg = load_config(Some(f.path())).unwrap();
        assert_eq!(cfg.store.batch_size, 10);
        assert_eq!(cfg.store.cache_size, 10_000);
        assert_eq!(cfg.client.batch_size, 50);
        assert_eq!(cfg.client.window, 7);
        assert_eq!(cfg.server.listen, "127.0.0.1:7420");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.anonymizer.salt.as_deref(), Some("pepper"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "store: [1, 2").unwrap();
        let err = load_config(Some(f.path())).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }
}
