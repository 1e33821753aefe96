//! The persistence contract the ingestion core consumes.
//!
//! The relational store itself is an external collaborator — this module
//! defines only what the core requires of it: create/get/update for feeds,
//! identity-deduplicated entry insertion, and the per-feed identity set the
//! refresher dedups against. Implementations must provide per-feed mutual
//! exclusion for `insert_entries` (the bulk refresher additionally serializes
//! all writes through a single writer).
//!
//! [`MemoryStore`] is the reference implementation backing the tests and the
//! demo binary.

mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::normalize::{EntryIdentity, NormalizedEntry};

pub use memory::MemoryStore;

/// Everything the crawler learned about a feed, ready to persist.
///
/// `url` is the canonical fetch address after redirects; `link` is the
/// human-facing site URL and never equals `url` (a feed pointing at itself
/// is corrected to its parent path before this struct is built). `etag` and
/// `last_modified` hold the response headers verbatim for the next
/// conditional request.
#[derive(Debug, Clone, Default)]
pub struct FeedDescriptor {
    pub url: String,
    pub link: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    /// RSS `<ttl>` in minutes, when the feed declared one.
    pub ttl: Option<u32>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub favicon_url: Option<String>,
}

/// A feed as the store returns it.
#[derive(Debug, Clone)]
pub struct StoredFeed {
    pub id: i64,
    pub url: String,
    pub link: String,
    pub title: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Mutable feed fields merged in-place on refresh. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub url: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation on the feed URL — "already exists", not
    /// fatal.
    #[error("feed already exists: {0}")]
    Duplicate(String),

    #[error("feed not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

/// The opaque store the ingestion core writes through.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Creates a feed, failing with [`StoreError::Duplicate`] when one with
    /// the same URL exists.
    async fn create_feed(&self, descriptor: &FeedDescriptor) -> Result<StoredFeed, StoreError>;

    async fn get_feed(&self, url: &str) -> Result<StoredFeed, StoreError>;

    async fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<(), StoreError>;

    /// Inserts entries, skipping any whose identity already exists for this
    /// feed and resolving slug collisions by suffixing. Returns the number
    /// actually inserted. Entries are append-only: nothing is mutated.
    async fn insert_entries(
        &self,
        feed_id: i64,
        entries: Vec<NormalizedEntry>,
    ) -> Result<usize, StoreError>;

    /// The identity set of every entry already stored for this feed.
    async fn existing_identities(&self, feed_id: i64)
        -> Result<HashSet<EntryIdentity>, StoreError>;
}
