//! Source scrapers that turn fetched documents into intermediate records.
//!
//! Each scraper works in two phases:
//!
//! 1. **Fetching**: request one or more documents through a
//!    [`SourceFetcher`](crate::fetcher::SourceFetcher)
//! 2. **Parsing**: pull structured fields out of the bodies
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Output |
//! |--------|--------|--------|--------|
//! | CSDN blog | [`csdn`] | HTML scraping with selector fallbacks | `ExtractedArticle` |
//! | GitHub | [`github`] | REST API, five concurrent sub-fetches | `RepositorySnapshot` |
//!
//! # Common Patterns
//!
//! - HTML fields are located through ordered [`strategy::FieldChain`]s, so a
//!   layout change only needs a new fallback selector
//! - Missing optional fields fall back to defaults instead of failing the item
//! - GitHub sub-fetch failures are collected as warnings, never raised

pub mod csdn;
pub mod github;
pub mod strategy;
