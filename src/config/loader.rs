//! Configuration file loading
//!
//! JSON (with `// comment` lines stripped) or YAML, chosen by extension.
//! Files listed under `include` are merged after the main file: their
//! `alerts` are appended and every other key overrides.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::Options;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{0} must contain a mapping at the top level")]
    NotAMapping(PathBuf),

    #[error("Invalid options: {0}")]
    Options(#[from] serde_json::Error),
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)//[ \t]+.*$").expect("comment pattern is valid"))
}

/// Remove `// comment` tails. A `//` directly followed by text, as in URLs,
/// is left alone.
pub fn strip_comments(source: &str) -> String {
    comment_regex().replace_all(source, "").into_owned()
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Read one file into a JSON mapping
pub fn read_file(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let value: Value = if is_yaml(path) {
        serde_yaml::from_str(&source).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_json::from_str(&strip_comments(&source)).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(ConfigError::NotAMapping(path.to_path_buf())),
    }
}

/// Merge `overlay` into `base`: alert lists concatenate, other keys replace
pub fn merge(base: &mut Map<String, Value>, mut overlay: Map<String, Value>) {
    if let Some(Value::Array(alerts)) = overlay.remove("alerts") {
        match base.get_mut("alerts") {
            Some(Value::Array(existing)) => existing.extend(alerts),
            _ => {
                base.insert("alerts".to_string(), Value::Array(alerts));
            }
        }
    }
    for (key, value) in overlay {
        base.insert(key, value);
    }
}

/// Load `path` plus its includes into [`Options`]
pub fn load(path: &Path) -> Result<Options, ConfigError> {
    let mut merged = read_file(path)?;
    let includes = take_includes(&mut merged);

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    for include in includes {
        let include = if include.is_relative() {
            base_dir.join(include)
        } else {
            include
        };
        tracing::info!(path = %include.display(), "Load configuration");
        let mut overlay = read_file(&include)?;
        overlay.remove("include");
        merge(&mut merged, overlay);
    }

    Ok(serde_json::from_value(Value::Object(merged))?)
}

fn take_includes(map: &mut Map<String, Value>) -> Vec<PathBuf> {
    match map.remove("include") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(PathBuf::from))
            .collect(),
        Some(Value::String(path)) => vec![PathBuf::from(path)],
        _ => Vec::new(),
    }
}
