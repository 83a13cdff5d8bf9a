//! Walk configuration
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default ceiling on directory descents per walk
pub const DEFAULT_MAX_DESCENTS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Directory descents allowed in one top-level walk before branches are
    /// cut off
    pub max_descents: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_descents: DEFAULT_MAX_DESCENTS,
        }
    }
}

impl WalkConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading walk config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing walk config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
