//! The JSON document produced by each fetch cycle.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::article::{parse_timestamp, Article};
use crate::error::SnapshotError;

/// On-disk shape. `columns` is only present when the writer distributed
/// articles ahead of time.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_articles")]
    articles: Vec<Article>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_columns"
    )]
    columns: Option<Vec<Vec<Article>>>,
}

/// An article record as written, before its date is checked.
#[derive(Debug, Deserialize)]
struct StoredArticle {
    #[serde(default)]
    title: String,
    url: String,
    source: String,
    #[serde(default)]
    published_at: Option<String>,
}

impl StoredArticle {
    fn into_article(self) -> Option<Article> {
        let raw = self.published_at.unwrap_or_default();
        match parse_timestamp(&raw) {
            Some(published_at) => Some(Article {
                title: self.title,
                url: self.url,
                source: self.source,
                published_at,
            }),
            None => {
                warn!(url = %self.url, published_at = %raw, "Dropping snapshot article with unreadable date");
                None
            }
        }
    }
}

fn readable(stored: Vec<StoredArticle>) -> Vec<Article> {
    stored.into_iter().filter_map(StoredArticle::into_article).collect()
}

fn deserialize_articles<'de, D>(deserializer: D) -> Result<Vec<Article>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(readable(Vec::<StoredArticle>::deserialize(deserializer)?))
}

fn deserialize_columns<'de, D>(deserializer: D) -> Result<Option<Vec<Vec<Article>>>, D::Error>
where
    D: Deserializer<'de>,
{
    let columns = Option::<Vec<Vec<StoredArticle>>>::deserialize(deserializer)?;
    Ok(columns.map(|columns| columns.into_iter().map(readable).collect()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    FlatArticleList(Vec<Article>),
    PrebuiltColumns {
        articles: Vec<Article>,
        columns: Vec<Vec<Article>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub updated_at: Option<DateTime<Utc>>,
    pub layout: Layout,
}

impl Snapshot {
    pub fn new(updated_at: DateTime<Utc>, articles: Vec<Article>) -> Self {
        Self {
            updated_at: Some(updated_at),
            layout: Layout::FlatArticleList(articles),
        }
    }

    pub fn with_columns(self, columns: Vec<Vec<Article>>) -> Self {
        let articles = match self.layout {
            Layout::FlatArticleList(articles) | Layout::PrebuiltColumns { articles, .. } => articles,
        };
        Self {
            updated_at: self.updated_at,
            layout: Layout::PrebuiltColumns { articles, columns },
        }
    }

    pub fn articles(&self) -> &[Article] {
        match &self.layout {
            Layout::FlatArticleList(articles) => articles,
            Layout::PrebuiltColumns { articles, .. } => articles,
        }
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let file: SnapshotFile = serde_json::from_str(content)?;
        Ok(file.into())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&SnapshotFile::from(self.clone()))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write to a sibling temp file and rename it over `path`, so readers
    /// never observe a partially written snapshot.
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };

        let json = self.to_json().map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

        info!(
            "Saved {} articles to {}",
            self.articles().len(),
            path.display()
        );
        Ok(())
    }
}

impl From<SnapshotFile> for Snapshot {
    fn from(file: SnapshotFile) -> Self {
        let layout = match file.columns {
            Some(columns) => Layout::PrebuiltColumns {
                articles: file.articles,
                columns,
            },
            None => Layout::FlatArticleList(file.articles),
        };
        Self {
            updated_at: file.updated_at,
            layout,
        }
    }
}

impl From<Snapshot> for SnapshotFile {
    fn from(snapshot: Snapshot) -> Self {
        let (articles, columns) = match snapshot.layout {
            Layout::FlatArticleList(articles) => (articles, None),
            Layout::PrebuiltColumns { articles, columns } => (articles, Some(columns)),
        };
        Self {
            updated_at: snapshot.updated_at,
            articles,
            columns,
        }
    }
}
