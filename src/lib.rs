//! newsgrid - an RSS/Atom news aggregator
//!
//! Fetches many feeds concurrently, normalizes and deduplicates their items
//! into a JSON snapshot, and serves that snapshot as a paginated,
//! multi-column page.

pub mod aggregate;
pub mod article;
pub mod columns;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod paginate;
pub mod routes;
pub mod rss;
pub mod snapshot;
