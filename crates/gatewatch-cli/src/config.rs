use anyhow::{Context, Result};
use gatewatch_core::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI configuration: built-in defaults, then the optional TOML file named by
/// `GATEWATCH_CONFIG`, then `GATEWATCH_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Tesseract executable used for plate OCR.
    pub tesseract: String,
    pub engine: EngineConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    db_path: Option<PathBuf>,
    tesseract: Option<String>,
    engine: EngineConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match lookup("GATEWATCH_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let db_path = lookup("GATEWATCH_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&lookup).join("recognition.db"));

        let mut engine = file.engine;
        engine.match_threshold = env_parse(&lookup, "GATEWATCH_MATCH_THRESHOLD", engine.match_threshold);
        engine.embedding_dim = env_parse(&lookup, "GATEWATCH_EMBEDDING_DIM", engine.embedding_dim);
        engine.policy = env_parse(&lookup, "GATEWATCH_POLICY", engine.policy);
        engine.tracking_ttl_secs =
            env_parse(&lookup, "GATEWATCH_TRACKING_TTL_SECS", engine.tracking_ttl_secs);
        if let Some(v) = lookup("GATEWATCH_AUTO_SAVE") {
            engine.auto_save = v != "0";
        }

        Ok(Self {
            db_path,
            tesseract: lookup("GATEWATCH_TESSERACT")
                .or(file.tesseract)
                .unwrap_or_else(|| "tesseract".to_string()),
            engine,
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("gatewatch")
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable override");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewatch_core::AccessPolicy;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/gate")])).unwrap();
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/gate/.local/share/gatewatch/recognition.db")
        );
        assert_eq!(config.tesseract, "tesseract");
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("XDG_DATA_HOME", "/data"),
            ("GATEWATCH_MATCH_THRESHOLD", "0.45"),
            ("GATEWATCH_POLICY", "marked"),
            ("GATEWATCH_TRACKING_TTL_SECS", "0"),
            ("GATEWATCH_AUTO_SAVE", "1"),
            ("GATEWATCH_EMBEDDING_DIM", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/data/gatewatch/recognition.db"));
        assert_eq!(config.engine.match_threshold, 0.45);
        assert_eq!(config.engine.policy, AccessPolicy::Marked);
        assert_eq!(config.engine.tracking_ttl_secs, 0);
        assert!(config.engine.auto_save);
        assert_eq!(config.engine.embedding_dim, 128);
    }

    #[test]
    fn test_file_then_env() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
db_path = "/srv/gate.db"
tesseract = "/opt/tesseract"

[engine]
match_threshold = 0.5
policy = "marked"

[engine.extractor]
max_candidates = 4
"#,
        )
        .unwrap();

        let path_str = file.path().to_string_lossy().into_owned();
        let config = Config::from_lookup(lookup(&[
            ("GATEWATCH_CONFIG", path_str.as_str()),
            ("GATEWATCH_MATCH_THRESHOLD", "0.3"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/srv/gate.db"));
        assert_eq!(config.tesseract, "/opt/tesseract");
        assert_eq!(config.engine.match_threshold, 0.3);
        assert_eq!(config.engine.policy, AccessPolicy::Marked);
        assert_eq!(config.engine.extractor.max_candidates, 4);
        assert_eq!(config.engine.tracking_ttl_secs, 60);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(Config::from_lookup(lookup(&[("GATEWATCH_CONFIG", "/nonexistent/gatewatch.toml")])).is_err());
    }
}
