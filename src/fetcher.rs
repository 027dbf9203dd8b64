use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use url::Url;

use crate::aggregate::aggregate_at;
use crate::article::Article;
use crate::columns::distribute;
use crate::config::{Config, FeedKind, FeedSource, FetchSettings};
use crate::error::FetchError;
use crate::normalize::normalize_source;
use crate::rss::write_rss;
use crate::snapshot::Snapshot;

pub struct Fetcher {
    client: Client,
    config: Arc<Config>,
    refreshing: Arc<RwLock<bool>>,
}

impl Fetcher {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch.timeout())
            .user_agent(config.fetch.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            config,
            refreshing: Arc::new(RwLock::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Run one fetch cycle and persist the result. Returns `None` when
    /// another cycle is already running.
    pub async fn refresh_all_feeds(&self) -> anyhow::Result<Option<Snapshot>> {
        // Check if already refreshing
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(None);
            }
            *refreshing = true;
        }

        let result = self.do_refresh_all().await;

        // Clear refreshing flag
        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result.map(Some)
    }

    async fn do_refresh_all(&self) -> anyhow::Result<Snapshot> {
        let snapshot = self.build_snapshot().await;
        snapshot.save(&self.config.snapshot_path).await?;

        if let Some(rss_path) = &self.config.rss_path {
            write_rss(rss_path, snapshot.articles(), &self.config.channel).await?;
        }

        info!("Feed refresh complete");
        Ok(snapshot)
    }

    /// Fetch every configured feed and aggregate the results in memory.
    pub async fn build_snapshot(&self) -> Snapshot {
        info!("Refreshing {} feeds", self.config.feeds.len());

        let per_source = self.fetch_all(&self.config.feeds).await;
        let now = Utc::now();
        let articles = aggregate_at(per_source, self.config.max_age(), now);

        let display = &self.config.display;
        let snapshot = Snapshot::new(now, articles);
        if display.precompute_columns {
            let columns = distribute(snapshot.articles(), display.sections, display.column_policy);
            snapshot.with_columns(columns)
        } else {
            snapshot
        }
    }

    /// Fetch all sources concurrently. The result is in `sources` order;
    /// a failed source contributes an empty list.
    pub async fn fetch_all(&self, sources: &[FeedSource]) -> Vec<Vec<Article>> {
        join_all(sources.iter().map(|source| self.fetch_source(source))).await
    }

    pub async fn fetch_source(&self, source: &FeedSource) -> Vec<Article> {
        info!("Fetching feed: {} ({})", source.name, source.url);

        let body = match self.fetch_body(source).await {
            Ok(body) => body,
            Err(e @ FetchError::MissingApiKey(_)) => {
                warn!("Skipping '{}': {}", source.name, e);
                return Vec::new();
            }
            Err(e) => {
                error!("Failed to fetch '{}': {}", source.name, e);
                return Vec::new();
            }
        };

        match normalize_source(&body, source, Utc::now()) {
            Ok(articles) => {
                info!("{}: {} articles fetched", source.name, articles.len());
                articles
            }
            Err(e) => {
                error!("Failed to parse '{}': {}", source.name, e);
                Vec::new()
            }
        }
    }

    /// GET the feed body, retrying transient failures with exponential backoff.
    pub async fn fetch_body(&self, source: &FeedSource) -> Result<String, FetchError> {
        let settings = &self.config.fetch;
        let attempts = settings.retries.max(1);
        let url = request_url(source)?;
        let mut attempt = 1;

        loop {
            match self.try_fetch(&url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = backoff_delay(settings, attempt);
                    warn!(
                        "Fetching '{}' failed (attempt {}/{}): {}, retrying in {:?}",
                        source.name, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<String, FetchError> {
        // Request URLs may carry an API key; keep them out of error messages
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Http(e.without_url()))
    }
}

/// URL to request for `source`. NewsAPI sources get the key from their
/// environment variable appended as `apiKey`.
pub fn request_url(source: &FeedSource) -> Result<String, FetchError> {
    match source.kind {
        FeedKind::NewsApi => {
            let key = std::env::var(&source.api_key_env)
                .map_err(|_| FetchError::MissingApiKey(source.api_key_env.clone()))?;
            let mut url = Url::parse(&source.url)?;
            url.query_pairs_mut().append_pair("apiKey", &key);
            Ok(url.into())
        }
        FeedKind::Rss | FeedKind::Rss2Json => Ok(source.url.clone()),
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(settings: &FetchSettings, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    settings.retry_base_delay().saturating_mul(factor)
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes.max(1) * 60);

    // Do initial fetch
    info!("Starting initial feed fetch");
    if let Err(e) = fetcher.refresh_all_feeds().await {
        error!("Initial feed fetch failed: {}", e);
    }

    // Then schedule periodic refreshes
    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed refresh");
        if let Err(e) = fetcher.refresh_all_feeds().await {
            error!("Scheduled feed refresh failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0">
            <channel>
                <title>Test</title>
                <item>
                    <title>Only story</title>
                    <link>https://story.example.com/1</link>
                </item>
            </channel>
        </rss>
    "#;

    fn test_config(feeds: Vec<FeedSource>, retries: u32, timeout_secs: u64) -> Arc<Config> {
        let mut config = Config::from_str("feeds = []").unwrap();
        config.feeds = feeds;
        config.fetch.retries = retries;
        config.fetch.timeout_secs = timeout_secs;
        config.fetch.retry_base_delay_ms = 10;
        Arc::new(config)
    }

    fn source(server: &MockServer, name: &str, route: &str) -> FeedSource {
        FeedSource::new(name, format!("{}{}", server.uri(), route), FeedKind::Rss)
    }

    mod backoff_tests {
        use super::*;

        #[test]
        fn test_delay_doubles() {
            let settings = FetchSettings::default();
            assert_eq!(backoff_delay(&settings, 1), Duration::from_secs(2));
            assert_eq!(backoff_delay(&settings, 2), Duration::from_secs(4));
            assert_eq!(backoff_delay(&settings, 3), Duration::from_secs(8));
        }

        #[test]
        fn test_delay_saturates() {
            let settings = FetchSettings::default();
            assert!(backoff_delay(&settings, 200) >= Duration::from_secs(2));
        }
    }

    mod fetch_body_tests {
        use super::*;

        #[tokio::test]
        async fn test_success() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .expect(1)
                .mount(&server)
                .await;

            let fetcher = Fetcher::new(test_config(vec![], 3, 5)).unwrap();
            let body = fetcher.fetch_body(&source(&server, "T", "/feed")).await.unwrap();

            assert!(body.contains("Only story"));
        }

        #[tokio::test]
        async fn test_retries_server_error_then_succeeds() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(2)
                .expect(2)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .expect(1)
                .mount(&server)
                .await;

            let fetcher = Fetcher::new(test_config(vec![], 3, 5)).unwrap();
            let body = fetcher.fetch_body(&source(&server, "T", "/feed")).await;

            assert!(body.is_ok());
        }

        #[tokio::test]
        async fn test_gives_up_after_retries() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(500))
                .expect(3)
                .mount(&server)
                .await;

            let fetcher = Fetcher::new(test_config(vec![], 3, 5)).unwrap();
            let result = fetcher.fetch_body(&source(&server, "T", "/feed")).await;

            assert!(matches!(result, Err(FetchError::Status(s)) if s.as_u16() == 500));
        }

        #[tokio::test]
        async fn test_not_found_is_not_retried() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;

            let fetcher = Fetcher::new(test_config(vec![], 3, 5)).unwrap();
            let result = fetcher.fetch_body(&source(&server, "T", "/feed")).await;

            assert!(matches!(result, Err(FetchError::Status(s)) if s.as_u16() == 404));
        }

        #[tokio::test]
        async fn test_timeout() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/slow"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(RSS)
                        .set_delay(Duration::from_secs(3)),
                )
                .mount(&server)
                .await;

            let fetcher = Fetcher::new(test_config(vec![], 1, 1)).unwrap();
            let result = fetcher.fetch_body(&source(&server, "Slow", "/slow")).await;

            assert!(matches!(result, Err(FetchError::Http(ref e)) if e.is_timeout()));
        }
    }

    mod request_url_tests {
        use super::*;

        #[test]
        fn test_plain_sources_untouched() {
            let feed = FeedSource::new("Plain", "https://x.example.com/rss?a=1", FeedKind::Rss);
            assert_eq!(request_url(&feed).unwrap(), "https://x.example.com/rss?a=1");
        }

        #[test]
        fn test_newsapi_key_appended() {
            let mut feed = FeedSource::new(
                "NewsAPI",
                "https://newsapi.org/v2/everything?q=bitcoin",
                FeedKind::NewsApi,
            );
            feed.api_key_env = "NEWSGRID_TEST_KEY_APPENDED".to_string();
            std::env::set_var("NEWSGRID_TEST_KEY_APPENDED", "s3cr3t");

            assert_eq!(
                request_url(&feed).unwrap(),
                "https://newsapi.org/v2/everything?q=bitcoin&apiKey=s3cr3t"
            );
        }

        #[test]
        fn test_newsapi_without_key() {
            let mut feed = FeedSource::new("NewsAPI", "https://newsapi.org/v2/everything", FeedKind::NewsApi);
            feed.api_key_env = "NEWSGRID_TEST_KEY_NEVER_SET".to_string();

            let result = request_url(&feed);

            assert!(matches!(result, Err(FetchError::MissingApiKey(ref v)) if v == "NEWSGRID_TEST_KEY_NEVER_SET"));
        }
    }

    mod fetch_all_tests {
        use super::*;

        #[tokio::test]
        async fn test_failing_source_is_isolated() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/good"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/broken"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/gone"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;

            let sources = vec![
                source(&server, "Broken", "/broken"),
                source(&server, "Good", "/good"),
                source(&server, "Gone", "/gone"),
            ];
            let fetcher = Fetcher::new(test_config(sources.clone(), 1, 5)).unwrap();

            let results = fetcher.fetch_all(&sources).await;

            assert_eq!(results.len(), 3);
            assert!(results[0].is_empty());
            assert_eq!(results[1].len(), 1);
            assert_eq!(results[1][0].source, "Good");
            assert!(results[2].is_empty());
        }

        #[tokio::test]
        async fn test_newsapi_source() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/everything"))
                .and(query_param("apiKey", "k3y"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    r#"{"status": "ok", "articles": [{
                        "source": {"name": "CoinDesk"},
                        "title": "From the API",
                        "url": "https://www.coindesk.com/a",
                        "publishedAt": "2024-12-09T14:05:00Z"
                    }]}"#,
                ))
                .expect(1)
                .mount(&server)
                .await;

            let mut feed = FeedSource::new(
                "NewsAPI",
                format!("{}/v2/everything?q=bitcoin", server.uri()),
                FeedKind::NewsApi,
            );
            feed.api_key_env = "NEWSGRID_TEST_KEY_FETCH".to_string();
            std::env::set_var("NEWSGRID_TEST_KEY_FETCH", "k3y");
            let fetcher = Fetcher::new(test_config(vec![], 1, 5)).unwrap();

            let articles = fetcher.fetch_source(&feed).await;

            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].source, "CoinDesk");
        }

        #[tokio::test]
        async fn test_newsapi_without_key_is_skipped() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&server)
                .await;

            let mut feed = FeedSource::new(
                "NewsAPI",
                format!("{}/v2/everything", server.uri()),
                FeedKind::NewsApi,
            );
            feed.api_key_env = "NEWSGRID_TEST_KEY_ABSENT".to_string();
            let fetcher = Fetcher::new(test_config(vec![], 1, 5)).unwrap();

            assert!(fetcher.fetch_source(&feed).await.is_empty());
        }

        #[tokio::test]
        async fn test_results_follow_configuration_order() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/slow"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(RSS)
                        .set_delay(Duration::from_millis(300)),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/fast"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .mount(&server)
                .await;

            let sources = vec![source(&server, "Slow", "/slow"), source(&server, "Fast", "/fast")];
            let fetcher = Fetcher::new(test_config(sources.clone(), 1, 5)).unwrap();

            let results = fetcher.fetch_all(&sources).await;

            assert_eq!(results[0][0].source, "Slow");
            assert_eq!(results[1][0].source, "Fast");
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_refresh_writes_snapshot_and_rss() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::from_str("feeds = []").unwrap();
            config.feeds = vec![source(&server, "Test", "/feed")];
            config.snapshot_path = dir.path().join("news.json");
            config.rss_path = Some(dir.path().join("rss.xml"));
            let fetcher = Fetcher::new(Arc::new(config)).unwrap();

            let snapshot = fetcher.refresh_all_feeds().await.unwrap().unwrap();

            assert_eq!(snapshot.articles().len(), 1);
            assert!(!fetcher.is_refreshing().await);

            let loaded = Snapshot::load(dir.path().join("news.json")).await.unwrap();
            assert_eq!(loaded, snapshot);
            assert!(dir.path().join("rss.xml").exists());
        }

        #[tokio::test]
        async fn test_precomputed_columns() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .mount(&server)
                .await;

            let mut config = Config::from_str("feeds = []").unwrap();
            config.feeds = vec![source(&server, "Test", "/feed")];
            config.display.precompute_columns = true;
            config.display.sections = 2;
            let fetcher = Fetcher::new(Arc::new(config)).unwrap();

            let snapshot = fetcher.build_snapshot().await;

            match snapshot.layout {
                crate::snapshot::Layout::PrebuiltColumns { columns, .. } => {
                    assert_eq!(columns.len(), 2);
                    assert_eq!(columns[0].len(), 1);
                    assert!(columns[1].is_empty());
                }
                other => panic!("expected prebuilt columns, got {:?}", other),
            }
        }
    }
}
