use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::columns::ColumnPolicy;
use crate::paginate::EmptyPages;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Articles older than this are dropped from the snapshot
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Where to write the RSS re-export; nothing is written when unset
    #[serde(default)]
    pub rss_path: Option<PathBuf>,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub channel: ChannelConfig,
    pub feeds: Vec<FeedSource>,
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_max_age_days() -> i64 {
    21
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/news.json")
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

/// Environment variable holding the NewsAPI key unless a source names another.
pub const NEWSAPI_KEY_ENV: &str = "NEWSAPI_KEY";

/// Wire format a source answers with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// RSS 2.0, RSS 1.0 or Atom
    #[default]
    Rss,
    /// NewsAPI `/v2/everything` JSON; the key is appended as `apiKey`
    #[serde(rename = "newsapi")]
    NewsApi,
    /// rss2json.com proxy JSON wrapping an RSS feed
    #[serde(rename = "rss2json")]
    Rss2Json,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: FeedKind,
    /// Only read for `newsapi` sources
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    NEWSAPI_KEY_ENV.to_string()
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, kind: FeedKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind,
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    /// Total attempts per source, including the first one
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 3,
            retry_base_delay_ms: 2000,
            user_agent: "Mozilla/5.0 (compatible; newsgrid/0.1)".to_string(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplaySettings {
    pub articles_per_section: usize,
    pub sections: usize,
    pub column_policy: ColumnPolicy,
    pub empty_pages: EmptyPages,
    /// Store the column layout in the snapshot so readers skip distribution
    pub precompute_columns: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            articles_per_section: 10,
            sections: 3,
            column_policy: ColumnPolicy::default(),
            empty_pages: EmptyPages::default(),
            precompute_columns: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelConfig {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            title: "News Aggregator".to_string(),
            link: "http://localhost:3000/".to_string(),
            description: "The latest aggregated news from curated sources.".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.display.sections >= 1, "display.sections must be at least 1");
        anyhow::ensure!(
            self.display.articles_per_section >= 1,
            "display.articles_per_section must be at least 1"
        );
        anyhow::ensure!(self.max_age_days >= 0, "max_age_days must not be negative");
        Ok(())
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_age_days)
    }
}
