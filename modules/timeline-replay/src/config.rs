use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use timeline_engine::RunContext;
use timeline_events::ActorId;

/// TOML-backed replay configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub pull: u32,
    pub actor: Option<ActorId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModulesConfig {
    /// Handles to run. Empty runs every bundled module.
    #[serde(default)]
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

impl ReplayConfig {
    pub fn run_context(&self) -> RunContext {
        RunContext {
            report: self.run.report.clone(),
            pull: self.run.pull,
            actor: self.run.actor,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<ReplayConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<ReplayConfig> {
    Ok(toml::from_str(content)?)
}
