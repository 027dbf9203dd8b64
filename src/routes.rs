use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::aggregate::aggregate_at;
use crate::article::Article;
use crate::columns::distribute;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::paginate::{PaginationState, Paginator};
use crate::rss::render_rss;
use crate::snapshot::{Layout, Snapshot};

/// Titles longer than this get the `big` style.
const BIG_TITLE_CHARS: usize = 60;

pub struct AppState {
    pub fetcher: Arc<Fetcher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/rss.xml", get(rss_feed))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub title: String,
    pub updated: Option<String>,
    pub columns: Vec<Vec<ArticleView>>,
    pub page: usize,
    pub total_pages: usize,
    pub prev_page: Option<usize>,
    pub next_page: Option<usize>,
    pub refreshing: bool,
    pub load_error: Option<String>,
}

pub struct ArticleView {
    pub title: String,
    pub url: String,
    pub source: String,
    pub host: String,
    pub ago: String,
    pub big: bool,
}

impl ArticleView {
    fn new(article: &Article, now: DateTime<Utc>) -> Self {
        Self {
            title: article.title.clone(),
            url: article.url.clone(),
            source: article.source.clone(),
            host: article.host().unwrap_or_default(),
            ago: article.time_ago(now),
            big: article.title.chars().count() > BIG_TITLE_CHARS,
        }
    }
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page() -> usize {
    1
}

/// One rendered page: the clamped position plus its columns.
pub struct PageView {
    pub state: PaginationState,
    pub columns: Vec<Vec<Article>>,
}

/// Resolve `requested` against a loaded snapshot. Flat snapshots are
/// re-aggregated against `now` so stale entries age out between refreshes.
pub fn build_page(
    snapshot: &Snapshot,
    config: &Config,
    requested: usize,
    now: DateTime<Utc>,
) -> PageView {
    let display = &config.display;
    let paginator = Paginator::new(display.articles_per_section, display.sections, display.empty_pages);

    match &snapshot.layout {
        Layout::PrebuiltColumns { columns, .. } => {
            let state = PaginationState::new(requested, paginator.total_column_pages(columns));
            let columns = paginator
                .column_page(columns, state.current())
                .into_iter()
                .map(<[Article]>::to_vec)
                .collect();
            PageView { state, columns }
        }
        Layout::FlatArticleList(articles) => {
            let articles = aggregate_at(vec![articles.clone()], config.max_age(), now);
            let state = PaginationState::new(requested, paginator.total_pages(articles.len()));
            let page = paginator.page(&articles, state.current());
            let columns = distribute(page, paginator.sections(), display.column_policy);
            PageView { state, columns }
        }
    }
}

fn format_updated(updated_at: DateTime<Utc>) -> String {
    updated_at
        .with_timezone(&New_York)
        .format("%-m/%-d/%Y, %-I:%M %p %Z")
        .to_string()
}

// Route handlers
pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Response {
    let config = state.fetcher.config();
    let refreshing = state.fetcher.is_refreshing().await;
    let title = config.channel.title.clone();

    let snapshot = match Snapshot::load(&config.snapshot_path).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Failed to load snapshot: {}", e);
            let page = IndexTemplate {
                title,
                updated: None,
                columns: Vec::new(),
                page: 1,
                total_pages: 1,
                prev_page: None,
                next_page: None,
                refreshing,
                load_error: Some("Failed to load news. Try again after the next refresh.".to_string()),
            };
            return (StatusCode::SERVICE_UNAVAILABLE, HtmlTemplate(page)).into_response();
        }
    };

    let now = Utc::now();
    let view = build_page(&snapshot, config, query.page, now);
    let columns = view
        .columns
        .iter()
        .map(|column| column.iter().map(|a| ArticleView::new(a, now)).collect())
        .collect();

    HtmlTemplate(IndexTemplate {
        title,
        updated: snapshot.updated_at.map(format_updated),
        columns,
        page: view.state.current(),
        total_pages: view.state.total(),
        prev_page: view.state.has_prev().then(|| view.state.prev().current()),
        next_page: view.state.has_next().then(|| view.state.next().current()),
        refreshing,
        load_error: None,
    })
    .into_response()
}

pub async fn rss_feed(State(state): State<Arc<AppState>>) -> Response {
    let config = state.fetcher.config();
    match Snapshot::load(&config.snapshot_path).await {
        Ok(snapshot) => (
            [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
            render_rss(snapshot.articles(), &config.channel, Utc::now()),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to load snapshot: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Failed to load news").into_response()
        }
    }
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Spawn the refresh task
    let fetcher = state.fetcher.clone();
    tokio::spawn(async move {
        if let Err(e) = fetcher.refresh_all_feeds().await {
            error!("Manual refresh failed: {}", e);
        }
    });

    // Return refreshing state immediately
    HtmlTemplate(RefreshButtonTemplate { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.fetcher.is_refreshing().await;
    HtmlTemplate(RefreshButtonTemplate { refreshing })
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
