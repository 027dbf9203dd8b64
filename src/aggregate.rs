use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::article::Article;

/// Merge per-source lists into one collection, unique by URL and newest first.
pub fn aggregate(per_source: Vec<Vec<Article>>, max_age: Duration) -> Vec<Article> {
    aggregate_at(per_source, max_age, Utc::now())
}

/// Same as [`aggregate`] with an explicit reference time.
///
/// Dedup runs before the age filter, so the first occurrence of a URL
/// decides whether it survives even if a later duplicate is newer.
pub fn aggregate_at(
    per_source: Vec<Vec<Article>>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<Article> {
    let mut seen = HashSet::new();

    let mut articles: Vec<Article> = per_source
        .into_iter()
        .flatten()
        .filter(|a| seen.insert(a.url.clone()))
        .filter(|a| now.signed_duration_since(a.published_at) <= max_age)
        .collect();

    // sort_by is stable: ties keep source order
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles
}
