//! RSS 2.0 re-export of an aggregated collection.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use tracing::{info, warn};

use crate::article::Article;
use crate::config::ChannelConfig;

/// Render the channel. `lastBuildDate` is the newest article's date, or
/// `fallback_build_date` when there are no articles.
pub fn render_rss(
    articles: &[Article],
    channel: &ChannelConfig,
    fallback_build_date: DateTime<Utc>,
) -> String {
    let build_date = articles
        .iter()
        .map(|a| a.published_at)
        .max()
        .unwrap_or(fallback_build_date);

    let items: String = articles.iter().map(render_item).collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>{}</title>
        <link>{}</link>
        <description>{}</description>
        <language>en-us</language>
        <lastBuildDate>{}</lastBuildDate>{}
    </channel>
</rss>
"#,
        escape(channel.title.as_str()),
        escape(channel.link.as_str()),
        escape(channel.description.as_str()),
        build_date.to_rfc2822(),
        items,
    )
}

fn render_item(article: &Article) -> String {
    let url = escape(article.url.as_str());
    format!(
        r#"
        <item>
            <title>{}</title>
            <link>{}</link>
            <description>{}</description>
            <pubDate>{}</pubDate>
            <guid isPermaLink="true">{}</guid>
        </item>"#,
        escape(article.title.as_str()),
        url,
        escape(&format!("Source: {}", article.source)),
        article.published_at.to_rfc2822(),
        url,
    )
}

/// Write the feed to `path`. An empty collection leaves any existing file
/// untouched and returns `false`.
pub async fn write_rss<P: AsRef<Path>>(
    path: P,
    articles: &[Article],
    channel: &ChannelConfig,
) -> anyhow::Result<bool> {
    let path = path.as_ref();
    if articles.is_empty() {
        warn!("No articles available, skipping RSS generation");
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(path, render_rss(articles, channel, Utc::now()))
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    info!("Created RSS feed: {}", path.display());
    Ok(true)
}
