//! In-memory [`FeedStore`] implementation.
//!
//! Backs the test suite and the demo binary. Honors the full contract:
//! duplicate-URL rejection, identity-based entry dedup, and slug-collision
//! resolution by numeric suffixing (`slug`, `slug1`, `slug2`, …).

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::feed::normalize::{EntryIdentity, NormalizedEntry};

use super::{FeedDescriptor, FeedStore, FeedUpdate, StoreError, StoredFeed};

#[derive(Debug)]
struct FeedRecord {
    feed: StoredFeed,
    entries: Vec<NormalizedEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    feeds: Vec<FeedRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo helper: every stored entry for a feed, insertion order.
    pub fn entries(&self, feed_id: i64) -> Vec<NormalizedEntry> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .feeds
            .iter()
            .find(|r| r.feed.id == feed_id)
            .map(|r| r.entries.clone())
            .unwrap_or_default()
    }

    /// Test/demo helper: every stored feed.
    pub fn feeds(&self) -> Vec<StoredFeed> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.feeds.iter().map(|r| r.feed.clone()).collect()
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn create_feed(&self, descriptor: &FeedDescriptor) -> Result<StoredFeed, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner.feeds.iter().any(|r| r.feed.url == descriptor.url) {
            return Err(StoreError::Duplicate(descriptor.url.clone()));
        }
        inner.next_id += 1;
        let feed = StoredFeed {
            id: inner.next_id,
            url: descriptor.url.clone(),
            link: descriptor.link.clone(),
            title: descriptor.title.clone(),
            etag: descriptor.etag.clone(),
            last_modified: descriptor.last_modified.clone(),
            last_checked: Some(Utc::now()),
        };
        inner.feeds.push(FeedRecord {
            feed: feed.clone(),
            entries: Vec::new(),
        });
        Ok(feed)
    }

    async fn get_feed(&self, url: &str) -> Result<StoredFeed, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner
            .feeds
            .iter()
            .find(|r| r.feed.url == url)
            .map(|r| r.feed.clone())
            .ok_or_else(|| StoreError::NotFound(url.to_owned()))
    }

    async fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let record = inner
            .feeds
            .iter_mut()
            .find(|r| r.feed.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("feed #{id}")))?;

        let feed = &mut record.feed;
        if let Some(url) = &update.url {
            feed.url = url.clone();
        }
        if let Some(link) = &update.link {
            feed.link = link.clone();
        }
        if let Some(title) = &update.title {
            feed.title = title.clone();
        }
        if let Some(etag) = &update.etag {
            feed.etag = Some(etag.clone());
        }
        if let Some(last_modified) = &update.last_modified {
            feed.last_modified = Some(last_modified.clone());
        }
        if let Some(last_checked) = update.last_checked {
            feed.last_checked = Some(last_checked);
        }
        Ok(())
    }

    async fn insert_entries(
        &self,
        feed_id: i64,
        entries: Vec<NormalizedEntry>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let record = inner
            .feeds
            .iter_mut()
            .find(|r| r.feed.id == feed_id)
            .ok_or_else(|| StoreError::NotFound(format!("feed #{feed_id}")))?;

        let mut identities: HashSet<EntryIdentity> =
            record.entries.iter().map(|e| e.identity()).collect();
        let mut slugs: HashSet<String> =
            record.entries.iter().map(|e| e.slug.clone()).collect();

        let mut inserted = 0;
        for mut entry in entries {
            if !identities.insert(entry.identity()) {
                continue;
            }
            if slugs.contains(&entry.slug) {
                let base = entry.slug.clone();
                let mut attempt = 1;
                while slugs.contains(&entry.slug) {
                    entry.slug = format!("{base}{attempt}");
                    attempt += 1;
                }
            }
            slugs.insert(entry.slug.clone());
            record.entries.push(entry);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn existing_identities(
        &self,
        feed_id: i64,
    ) -> Result<HashSet<EntryIdentity>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let record = inner
            .feeds
            .iter()
            .find(|r| r.feed.id == feed_id)
            .ok_or_else(|| StoreError::NotFound(format!("feed #{feed_id}")))?;
        Ok(record.entries.iter().map(|e| e.identity()).collect())
    }
}
