use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Data knobs of the enhancer. Function-valued knobs (id generation, put
/// action naming, targeted dispatch naming) are set on the `Enhancer` builder.
///
/// Fingerprint keys use dotted-path semantics: `"meta.id"` writes
/// `{ "meta": { "id": .. } }` into the action. When `meta_key` is set, all
/// three keys are grouped under it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub fingerprinting: bool,
    pub id_key: String,
    pub parent_key: String,
    pub origin_key: String,
    pub meta_key: Option<String>,

    /// Continuation batches allowed per top-level dispatch.
    pub max_iterations: usize,

    /// Drop declared effects instead of scheduling them.
    #[serde(alias = "disable_side_effects")]
    pub disable_effects: bool,

    /// Appended to the triggering action's type to name put-state actions.
    pub put_action_suffix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fingerprinting: true,
            id_key: "__id".to_string(),
            parent_key: "__parent".to_string(),
            origin_key: "__origin".to_string(),
            meta_key: None,
            max_iterations: 15,
            disable_effects: false,
            put_action_suffix: "/PUT".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse enhancer config")
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
