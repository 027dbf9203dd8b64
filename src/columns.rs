use std::collections::HashMap;

use serde::Deserialize;

use crate::article::Article;

/// How a page of articles is spread over the display columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPolicy {
    /// Article `i` goes to column `i % k`.
    #[default]
    RoundRobin,
    /// Each article goes to the column holding the fewest articles from the
    /// same source, so one outlet does not stack up in a single column.
    SourceFairness,
}

/// Split `articles` into `k` columns (at least one). Every input article
/// lands in exactly one column and keeps its relative order there.
pub fn distribute(articles: &[Article], k: usize, policy: ColumnPolicy) -> Vec<Vec<Article>> {
    let k = k.max(1);
    match policy {
        ColumnPolicy::RoundRobin => round_robin(articles, k),
        ColumnPolicy::SourceFairness => source_fairness(articles, k),
    }
}

fn round_robin(articles: &[Article], k: usize) -> Vec<Vec<Article>> {
    let mut columns = vec![Vec::new(); k];
    for (i, article) in articles.iter().enumerate() {
        columns[i % k].push(article.clone());
    }
    columns
}

fn source_fairness(articles: &[Article], k: usize) -> Vec<Vec<Article>> {
    let mut columns: Vec<Vec<Article>> = vec![Vec::new(); k];
    let mut per_source: HashMap<&str, Vec<usize>> = HashMap::new();

    for article in articles {
        let counts = per_source
            .entry(article.source.as_str())
            .or_insert_with(|| vec![0; k]);

        // min_by_key keeps the first minimum, so ties go to the lowest index
        let target = (0..k)
            .min_by_key(|&c| (counts[c], columns[c].len()))
            .unwrap_or(0);

        counts[target] += 1;
        columns[target].push(article.clone());
    }

    columns
}
