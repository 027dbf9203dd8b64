use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const UNTITLED: &str = "No title";

/// One normalized feed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub published_at: DateTime<Utc>,
}

impl Article {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        let title = match title.trim() {
            "" => UNTITLED.to_string(),
            trimmed => trimmed.to_string(),
        };

        Self {
            title,
            url: url.into(),
            source: source.into(),
            published_at,
        }
    }

    /// Host part of the article URL, without a leading `www.`
    pub fn host(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        Some(host.trim_start_matches("www.").to_string())
    }

    /// Human relative age such as `3 hours 12 mins ago`
    pub fn time_ago(&self, now: DateTime<Utc>) -> String {
        time_ago(self.published_at, now)
    }
}

/// Absolute `http`/`https` URL with a host; anything else cannot be linked
/// or shown as a source host.
pub fn is_web_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let mins = now.signed_duration_since(then).num_minutes().max(0);
    if mins < 60 {
        return format!("{} mins ago", mins);
    }

    let hours = mins / 60;
    let rem = mins % 60;
    if hours < 24 {
        return if rem == 0 {
            format!("{} hours ago", hours)
        } else {
            format!("{} hours {} mins ago", hours, rem)
        };
    }

    format!("{} days ago", hours / 24)
}

/// Accepts RFC 3339, the RFC 2822 dates RSS feeds carry, and the
/// `YYYY-MM-DD HH:MM:SS` UTC form JSON feed proxies emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}
