use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_PATH: &str = ".currant/currant.db";
pub const DEFAULT_MAX_MISSING: i64 = 10;

/// Already-resolved engine settings. Directory discovery is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    /// Consecutive testsets a known test may be absent from before it is
    /// deleted. `<= 0` disables deletion.
    pub max_missing: i64,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_missing: DEFAULT_MAX_MISSING,
            log_level: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_max_missing(mut self, max_missing: i64) -> Self {
        self.max_missing = max_missing;
        self
    }

    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// Applies `CURRANT_DB`, `CURRANT_MAX_MISSING` and `CURRANT_LOG`.
    /// Unparsable values are ignored.
    pub fn overlay_env(mut self) -> Self {
        if let Ok(v) = env::var("CURRANT_DB") {
            if !v.trim().is_empty() {
                self.db_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("CURRANT_MAX_MISSING") {
            if let Ok(n) = v.trim().parse() {
                self.max_missing = n;
            }
        }
        if let Ok(v) = env::var("CURRANT_LOG") {
            self.log_level = v;
        }
        self
    }
}

/// Reads an engine config from YAML. Unknown keys are reported; in strict
/// mode they are an error.
pub fn load_config(path: &Path, strict: bool) -> Result<EngineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))
}

pub fn parse_config(raw: &str, strict: bool) -> Result<EngineConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: EngineConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    if !ignored_keys.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields in strict mode: {:?}",
                ignored_keys
            )));
        }
        tracing::warn!(
            event = "currant.config.unknown_fields",
            fields = ?ignored_keys,
            "ignored unknown config fields"
        );
    }

    if cfg.db_path.as_os_str().is_empty() {
        return Err(ConfigError("db_path must not be empty".into()));
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_missing, 10);
        assert_eq!(cfg.db_path, PathBuf::from(".currant/currant.db"));
    }

    #[test]
    fn parses_partial_yaml() {
        let cfg = parse_config("max_missing: 3\n", false).unwrap();
        assert_eq!(cfg.max_missing, 3);
        assert_eq!(cfg.log_level, "warn");
    }

    #[test]
    fn strict_rejects_unknown_keys() {
        let err = parse_config("max_missing: 3\nhistory: 5\n", true).unwrap_err();
        assert!(err.0.contains("history"));
        assert!(parse_config("max_missing: 3\nhistory: 5\n", false).is_ok());
    }

    #[test]
    fn empty_db_path_is_rejected() {
        assert!(parse_config("db_path: \"\"\n", false).is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("currant.yaml");
        std::fs::write(&path, "db_path: /tmp/x.db\nmax_missing: 0\n").unwrap();
        let cfg = load_config(&path, true).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.max_missing, 0);
    }
}
