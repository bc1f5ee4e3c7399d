use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::mapping::ProjectMapping;

fn default_interval() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub portfolio: PortfolioConfig,
    pub tracker: TrackerConfig,
    /// Bounds the first-run backfill: tracker items created before this
    /// date are never pulled.
    #[serde(default)]
    pub run_from: Option<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub projects: Vec<ProjectMapping>,
}

#[derive(Debug, Deserialize)]
pub struct PortfolioConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackerConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".worksync")
        .join("config.toml")
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.map_or_else(default_config_path, Path::to_path_buf);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig =
        toml::from_str(&contents).with_context(|| "Failed to parse config.toml")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    if let Some(run_from) = &config.run_from {
        NaiveDate::parse_from_str(run_from, "%Y-%m-%d")
            .with_context(|| format!("run_from is not a YYYY-MM-DD date: {run_from}"))?;
    }
    let mut seen = HashSet::new();
    for mapping in &config.projects {
        let pair = (
            mapping.local_project.as_str(),
            mapping.tracker_project.as_str(),
        );
        if !seen.insert(pair) {
            bail!("duplicate project pair: {}", mapping.label());
        }
    }
    Ok(())
}
