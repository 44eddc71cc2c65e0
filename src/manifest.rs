//! Loading objects from manifest files

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Read a JSON or YAML manifest into a JSON value.
///
/// Files ending in `.json` are parsed as JSON, everything else as YAML.
pub fn load_object(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    debug!(path = %path.display(), is_json, "loading manifest");

    type ParseError = Box<dyn std::error::Error + Send + Sync>;
    let parsed: std::result::Result<Value, ParseError> = if is_json {
        serde_json::from_str(&contents).map_err(Into::into)
    } else {
        serde_yaml::from_str(&contents).map_err(Into::into)
    };
    parsed.map_err(|source| Error::ManifestParse {
        path: path.to_path_buf(),
        source,
    })
}
