use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::site::DEFAULT_LINK_TRAIL;

pub const DEFAULT_USER_AGENT: &str = "wikirelink/0.2";
pub const DEFAULT_SITE_CODE: &str = "en";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RelinkConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub code: Option<String>,
    pub link_trail: Option<String>,
    #[serde(default)]
    pub interwiki: Vec<String>,
    #[serde(default)]
    pub custom_namespaces: Vec<CustomNamespace>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomNamespace {
    pub name: String,
    pub id: i32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

impl RelinkConfig {
    /// Resolve the site code: env `WIKI_SITE_CODE` > config > default.
    pub fn site_code(&self) -> String {
        if let Some(value) = env_value("WIKI_SITE_CODE") {
            return value;
        }
        self.site
            .code
            .clone()
            .unwrap_or_else(|| DEFAULT_SITE_CODE.to_string())
    }

    /// Resolve the link-trail fragment: env `WIKI_LINK_TRAIL` > config > default.
    pub fn link_trail(&self) -> String {
        if let Some(value) = env_value("WIKI_LINK_TRAIL") {
            return value;
        }
        self.site
            .link_trail
            .clone()
            .unwrap_or_else(|| DEFAULT_LINK_TRAIL.to_string())
    }

    /// Resolve the wiki API URL: env `WIKI_API_URL` > config > None.
    pub fn api_url(&self) -> Option<String> {
        if let Some(value) = env_value("WIKI_API_URL") {
            return Some(value);
        }
        self.remote.api_url.clone()
    }

    /// Resolve the user agent: env `WIKI_USER_AGENT` > config > default.
    pub fn user_agent(&self) -> String {
        if let Some(value) = env_value("WIKI_USER_AGENT") {
            return value;
        }
        self.remote
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Load a RelinkConfig from a TOML file. Returns the default configuration
/// when the file does not exist.
pub fn load_config(config_path: &Path) -> Result<RelinkConfig> {
    if !config_path.exists() {
        return Ok(RelinkConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: RelinkConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_value(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
