//! Turns raw feed responses into [`Article`]s.

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::article::{is_web_url, parse_timestamp, Article};
use crate::config::{FeedKind, FeedSource};
use crate::error::FetchError;

/// Named HTML entities that show up in feeds but are undefined in XML.
const HTML_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", "&#160;"),
    ("&ndash;", "&#8211;"),
    ("&mdash;", "&#8212;"),
    ("&lsquo;", "&#8216;"),
    ("&rsquo;", "&#8217;"),
    ("&ldquo;", "&#8220;"),
    ("&rdquo;", "&#8221;"),
    ("&hellip;", "&#8230;"),
];

const XML_ENTITIES: &[&str] = &["amp", "lt", "gt", "quot", "apos"];

/// Normalize a response body according to the wire format of `source`.
pub fn normalize_source(
    body: &str,
    source: &FeedSource,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Article>, FetchError> {
    match source.kind {
        FeedKind::Rss => normalize(body, &source.name, fetched_at),
        FeedKind::NewsApi => normalize_newsapi(body, &source.name, fetched_at),
        FeedKind::Rss2Json => normalize_rss2json(body, &source.name, fetched_at),
    }
}

/// Normalize one RSS/Atom document. Items without an absolute web URL are
/// skipped; missing dates become `fetched_at`.
pub fn normalize(
    body: &str,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Article>, FetchError> {
    let feed = parse_lenient(body)?;

    let mut articles = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let Some(url) = entry_url(&entry) else {
            warn!(source, entry = %entry.id, "Skipping entry without a web link");
            continue;
        };

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.as_str())
            .unwrap_or_default();

        // feed-rs maps dc:date onto `published`
        let published_at = entry.published.or(entry.updated).unwrap_or(fetched_at);

        articles.push(Article::new(title, url, source, published_at));
    }

    debug!(source, count = articles.len(), "Normalized feed");
    Ok(articles)
}

/// Parse as-is first; on failure repair entities and stray ampersands and try once more.
fn parse_lenient(body: &str) -> Result<Feed, FetchError> {
    match parser::parse(body.as_bytes()) {
        Ok(feed) => Ok(feed),
        Err(first) => {
            debug!(error = %first, "Feed failed to parse, retrying with escaped entities");
            let repaired = escape_stray_ampersands(&replace_html_entities(body));
            parser::parse(repaired.as_bytes()).map_err(|e| FetchError::Malformed(e.to_string()))
        }
    }
}

/// First web URL among the alternate links, then any link, then the entry id.
fn entry_url(entry: &Entry) -> Option<String> {
    let alternate = entry
        .links
        .iter()
        .filter(|l| matches!(l.rel.as_deref(), None | Some("alternate")));

    alternate
        .chain(entry.links.iter())
        .map(|l| l.href.trim())
        .chain(std::iter::once(entry.id.trim()))
        .find(|candidate| is_web_url(candidate))
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    status: Option<String>,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    title: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
    source: Option<NewsApiSource>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    name: Option<String>,
}

/// Normalize a NewsAPI `/v2/everything` response. Each article keeps the
/// outlet NewsAPI names, falling back to the configured source name.
pub fn normalize_newsapi(
    body: &str,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Article>, FetchError> {
    let response: NewsApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    check_api_status(response.status.as_deref(), response.message)?;

    let articles: Vec<Article> = response
        .articles
        .into_iter()
        .filter_map(|item| {
            let outlet = item
                .source
                .and_then(|s| s.name)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| source.to_string());
            json_article(item.title, item.url, item.published_at, &outlet, fetched_at)
        })
        .collect();

    debug!(source, count = articles.len(), "Normalized NewsAPI response");
    Ok(articles)
}

#[derive(Debug, Deserialize)]
struct Rss2JsonResponse {
    status: Option<String>,
    message: Option<String>,
    #[serde(default)]
    items: Vec<Rss2JsonItem>,
}

#[derive(Debug, Deserialize)]
struct Rss2JsonItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Normalize an rss2json.com proxy response.
pub fn normalize_rss2json(
    body: &str,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Article>, FetchError> {
    let response: Rss2JsonResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    check_api_status(response.status.as_deref(), response.message)?;

    let articles: Vec<Article> = response
        .items
        .into_iter()
        .filter_map(|item| json_article(item.title, item.link, item.pub_date, source, fetched_at))
        .collect();

    debug!(source, count = articles.len(), "Normalized rss2json response");
    Ok(articles)
}

fn check_api_status(status: Option<&str>, message: Option<String>) -> Result<(), FetchError> {
    match status {
        Some("error") => Err(FetchError::Api(
            message.unwrap_or_else(|| "unknown error".to_string()),
        )),
        _ => Ok(()),
    }
}

fn json_article(
    title: Option<String>,
    link: Option<String>,
    published: Option<String>,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Option<Article> {
    let Some(url) = link.map(|l| l.trim().to_string()).filter(|l| is_web_url(l)) else {
        warn!(source, title = title.as_deref().unwrap_or_default(), "Skipping item without a web link");
        return None;
    };

    let published_at = published
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(fetched_at);

    Some(Article::new(title.unwrap_or_default(), url, source, published_at))
}

pub fn replace_html_entities(xml: &str) -> String {
    HTML_ENTITIES
        .iter()
        .fold(xml.to_string(), |acc, (named, numeric)| acc.replace(named, numeric))
}

/// Escape every `&` that does not start an XML entity or character reference.
pub fn escape_stray_ampersands(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if starts_with_reference(tail) {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

fn starts_with_reference(tail: &str) -> bool {
    let Some(end) = tail.find(';') else {
        return false;
    };
    let name = &tail[..end];

    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    if let Some(dec) = name.strip_prefix('#') {
        return !dec.is_empty() && dec.chars().all(|c| c.is_ascii_digit());
    }
    XML_ENTITIES.contains(&name)
}
