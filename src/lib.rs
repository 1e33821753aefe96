//! Feed discovery crawler and RSS/Atom/RDF ingestion pipeline.
//!
//! Given an arbitrary URL — a blog homepage, a feed URL, or something in
//! between — feedhound locates the actual feed, fetches it with proper HTTP
//! caching semantics, parses the heterogeneous feed dialects into one
//! normalized schema, sanitizes entry content, deduplicates entries against
//! the store, and hunts down a representative site icon along the way.
//!
//! The crate is organized around the flow of a crawl:
//!
//! - [`feed::vendor`] / [`util`] — URL heuristics and comparison keys
//! - [`feed::fetcher`] — conditional GETs and the bounded fetch pool
//! - [`feed::parser`] — RSS 2.0 / RDF / Atom dialect parsing
//! - [`feed::scrape`] — feed-link and favicon extraction from HTML
//! - [`feed::discovery`] — the frontier-driven discovery engine
//! - [`feed::normalize`] — entry normalization and HTML sanitization
//! - [`ingest`] — the produced interface: discover, subscribe, refresh
//! - [`storage`] — the persistence contract plus an in-memory store

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
