//! The produced interface: discover a feed from a seed URL, subscribe it
//! into a store, refresh one feed conditionally, refresh many with a bounded
//! pool.
//!
//! Concurrency lives here, not in the discovery engine: a single crawl or
//! refresh is sequential, and the bulk path runs bounded fetch workers whose
//! results drain through one sequential writer — so no two writers ever
//! touch the same feed's entry set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::feed::discovery::{self, DiscoveryError, Favicon};
use crate::feed::fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::feed::normalize::{normalize_entry, NormalizedEntry};
use crate::feed::parser::{self, ParseError, ParsedFeed, RawEntry};
use crate::storage::{FeedDescriptor, FeedStore, FeedUpdate, StoreError, StoredFeed};
use crate::util::{normalize, parent_path, resolve};

const MAX_RETRIES: u32 = 3;

/// Any failure the ingestion surface can report.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a discovery crawl produced, normalized and ready to persist.
#[derive(Debug)]
pub struct Discovered {
    pub descriptor: FeedDescriptor,
    pub entries: Vec<NormalizedEntry>,
    pub favicon: Option<Favicon>,
}

/// Outcome of one feed refresh.
#[derive(Debug, Clone)]
pub struct RefreshStats {
    /// Entries actually inserted (after identity dedup).
    pub inserted: usize,
    /// The server answered 304: nothing changed but `last_checked`.
    pub not_modified: bool,
}

/// Per-feed record in a bulk refresh report.
#[derive(Debug)]
pub struct RefreshReport {
    pub feed_id: i64,
    pub url: String,
    pub result: Result<RefreshStats, IngestError>,
}

/// Retries transient fetch failures with exponential backoff (2s, 4s, 8s).
///
/// This is the retry contract of the task-executor collaborator: only
/// failures [`FetchError::is_transient`] marks retryable are retried, and
/// the fetcher itself stays single-shot.
pub async fn fetch_with_retry(
    fetcher: &Fetcher,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(request).await {
            Ok(response) => return Ok(response),
            Err(error) if error.is_transient() && attempt < MAX_RETRIES => {
                let delay_secs = 2u64.pow(attempt);
                tracing::warn!(
                    url = %request.url,
                    %error,
                    attempt,
                    delay_secs,
                    "transient fetch error, backing off"
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Discovers the feed behind a seed URL and normalizes everything found.
///
/// Pure with respect to the store: nothing is persisted. Errors are the
/// crawl's own — most prominently [`DiscoveryError::NoFeedFound`], which is
/// a recoverable "nothing there", not a fault.
pub async fn discover(fetcher: &Fetcher, seed: &str) -> Result<Discovered, IngestError> {
    let crawl = discovery::crawl(fetcher, seed).await?;
    let mut descriptor = build_descriptor(&crawl.feed, &crawl.parsed);
    descriptor.favicon_url = crawl.favicon.as_ref().map(|f| f.url.clone());
    let entries = normalize_all(&crawl.entries, &descriptor.link);
    Ok(Discovered {
        descriptor,
        entries,
        favicon: crawl.favicon,
    })
}

/// Discovers a feed and persists it with its entries.
///
/// A [`StoreError::Duplicate`] is recovered when the crawl ended somewhere
/// other than the seed (a redirect onto a feed we already track): the
/// existing feed is returned instead. Returns the stored feed and the number
/// of entries inserted.
pub async fn subscribe<S: FeedStore>(
    fetcher: &Fetcher,
    store: &S,
    seed: &str,
) -> Result<(StoredFeed, usize), IngestError> {
    let discovered = discover(fetcher, seed).await?;
    let feed = match store.create_feed(&discovered.descriptor).await {
        Ok(feed) => feed,
        Err(StoreError::Duplicate(_)) if discovered.descriptor.url != seed => {
            tracing::info!(
                seed,
                url = %discovered.descriptor.url,
                "crawl landed on an already-tracked feed"
            );
            store.get_feed(&discovered.descriptor.url).await?
        }
        Err(error) => return Err(error.into()),
    };
    let inserted = insert_new(store, &feed, discovered.entries).await?;
    Ok((feed, inserted))
}

/// Conditionally refreshes one feed.
///
/// Sends the stored validators; a 304 leaves everything but `last_checked`
/// untouched. A 200 re-parses the document, merges the mutable feed fields
/// (including the canonical URL when the server redirected), dedups entries
/// against the store, and inserts the remainder.
pub async fn refresh<S: FeedStore>(
    fetcher: &Fetcher,
    store: &S,
    feed: &StoredFeed,
) -> Result<RefreshStats, IngestError> {
    let request = FetchRequest {
        url: feed.url.clone(),
        etag: feed.etag.clone(),
        last_modified: feed.last_modified.clone(),
    };
    let response = fetch_with_retry(fetcher, &request).await?;
    apply_refresh(store, feed, response).await
}

/// The write half of a refresh, shared by the single and bulk paths.
async fn apply_refresh<S: FeedStore>(
    store: &S,
    feed: &StoredFeed,
    response: FetchResponse,
) -> Result<RefreshStats, IngestError> {
    let mut update = FeedUpdate {
        last_checked: Some(Utc::now()),
        ..FeedUpdate::default()
    };

    if response.not_modified() {
        store.update_feed(feed.id, &update).await?;
        return Ok(RefreshStats {
            inserted: 0,
            not_modified: true,
        });
    }

    let (parsed, raw_entries) = parser::parse(&response.body)?;
    let descriptor = build_descriptor(&response, &parsed);

    if response.redirected() {
        tracing::info!(old = %feed.url, new = %response.url, "feed moved, updating canonical URL");
        update.url = Some(response.url.clone());
    }
    update.link = Some(descriptor.link.clone());
    update.title = Some(descriptor.title.clone());
    update.etag = response.etag.clone();
    update.last_modified = response.last_modified.clone();

    let entries = normalize_all(&raw_entries, &descriptor.link);
    let inserted = insert_new(store, feed, entries).await?;
    store.update_feed(feed.id, &update).await?;

    Ok(RefreshStats {
        inserted,
        not_modified: false,
    })
}

/// Refreshes many feeds through a bounded fetch pool.
///
/// At most `concurrency` fetches run at once; completed responses drain
/// through this function's single writer, which parses, normalizes, and
/// persists sequentially. Setting `shutdown` stops workers from starting new
/// fetches — in-flight ones finish or time out — and the reports collected
/// so far are returned. One feed's failure never halts the batch.
pub async fn refresh_all<S: FeedStore>(
    fetcher: &Fetcher,
    store: &S,
    feeds: Vec<StoredFeed>,
    concurrency: usize,
    shutdown: Arc<AtomicBool>,
) -> Vec<RefreshReport> {
    if feeds.is_empty() {
        return Vec::new();
    }
    let total = feeds.len();
    let (tx, mut rx) = mpsc::channel::<(StoredFeed, Result<FetchResponse, FetchError>)>(
        concurrency.max(1),
    );

    let fetch_pool = async move {
        stream::iter(feeds)
            .map(|feed| {
                let tx = tx.clone();
                let shutdown = shutdown.clone();
                async move {
                    if shutdown.load(Ordering::Relaxed) {
                        tracing::debug!(url = %feed.url, "shutdown requested, skipping fetch");
                        return;
                    }
                    let request = FetchRequest {
                        url: feed.url.clone(),
                        etag: feed.etag.clone(),
                        last_modified: feed.last_modified.clone(),
                    };
                    let result = fetch_with_retry(fetcher, &request).await;
                    if tx.send((feed, result)).await.is_err() {
                        tracing::debug!("refresh results receiver dropped");
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .for_each(|()| async {})
            .await;
    };

    let writer = async {
        let mut reports = Vec::with_capacity(total);
        while let Some((feed, fetched)) = rx.recv().await {
            let result = match fetched {
                Ok(response) => apply_refresh(store, &feed, response).await,
                Err(error) => Err(error.into()),
            };
            if let Err(error) = &result {
                tracing::warn!(url = %feed.url, %error, "feed refresh failed");
            }
            reports.push(RefreshReport {
                feed_id: feed.id,
                url: feed.url,
                result,
            });
        }
        reports
    };

    let ((), reports) = tokio::join!(fetch_pool, writer);
    reports
}

/// Builds the persistable descriptor from a feed response and its parse.
///
/// The site link is resolved against the final fetched URL and must end up
/// distinct from it: a feed naming itself as its own site link falls back to
/// the feed's parent path. A missing title falls back to the site host with
/// any leading `www.` stripped.
pub fn build_descriptor(response: &FetchResponse, parsed: &ParsedFeed) -> FeedDescriptor {
    let url = response.url.clone();
    let mut link = match parsed.link.as_deref() {
        Some(link) => resolve(&url, link),
        None => url.clone(),
    };
    if normalize(&link) == normalize(&url) {
        link = parent_path(&url);
        tracing::info!(feed = %url, fallback = %link, "no distinct site link in feed");
    }

    let title = parsed
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| host_title(&link));

    FeedDescriptor {
        url,
        link,
        title,
        subtitle: parsed.subtitle.clone(),
        author: parsed
            .author
            .as_ref()
            .and_then(|a| a.display())
            .map(str::to_owned),
        ttl: parsed.ttl,
        etag: response.etag.clone(),
        last_modified: response.last_modified.clone(),
        favicon_url: None,
    }
}

fn host_title(link: &str) -> String {
    Url::parse(link)
        .ok()
        .and_then(|u| {
            u.host_str()
                .map(|h| h.strip_prefix("www.").unwrap_or(h).to_owned())
        })
        .unwrap_or_else(|| link.to_owned())
}

fn normalize_all(raw: &[RawEntry], feed_link: &str) -> Vec<NormalizedEntry> {
    let mut entries = Vec::with_capacity(raw.len());
    let mut rejected = 0;
    for entry in raw {
        match normalize_entry(entry, feed_link) {
            Some(entry) => entries.push(entry),
            None => rejected += 1,
        }
    }
    if rejected > 0 {
        tracing::debug!(rejected, feed = feed_link, "rejected malformed entries");
    }
    entries
}

/// Dedups against the store's current identity set, then inserts.
async fn insert_new<S: FeedStore>(
    store: &S,
    feed: &StoredFeed,
    entries: Vec<NormalizedEntry>,
) -> Result<usize, IngestError> {
    let existing = store.existing_identities(feed.id).await?;
    let fresh: Vec<NormalizedEntry> = entries
        .into_iter()
        .filter(|e| !existing.contains(&e.identity()))
        .collect();
    if fresh.is_empty() {
        return Ok(0);
    }
    Ok(store.insert_entries(feed.id, fresh).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str) -> FetchResponse {
        FetchResponse {
            status: 200,
            url: url.to_owned(),
            requested_url: url.to_owned(),
            body: Vec::new(),
            etag: Some("\"v1\"".to_owned()),
            last_modified: None,
            content_type: Some("application/rss+xml".to_owned()),
        }
    }

    #[test]
    fn test_descriptor_resolves_relative_site_link() {
        let parsed = ParsedFeed {
            title: Some("Blog".to_owned()),
            link: Some("/".to_owned()),
            ..ParsedFeed::default()
        };
        let descriptor = build_descriptor(&response("https://example.com/feed.xml"), &parsed);
        assert_eq!(descriptor.url, "https://example.com/feed.xml");
        assert_eq!(descriptor.link, "https://example.com/");
        assert_eq!(descriptor.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn test_descriptor_corrects_self_pointing_link() {
        let parsed = ParsedFeed {
            title: Some("Blog".to_owned()),
            link: Some("https://example.com/blog/index.xml".to_owned()),
            ..ParsedFeed::default()
        };
        let descriptor =
            build_descriptor(&response("https://example.com/blog/index.xml"), &parsed);
        assert_eq!(descriptor.link, "https://example.com/blog/");
    }

    #[test]
    fn test_descriptor_missing_link_uses_parent_path() {
        let parsed = ParsedFeed {
            title: Some("Blog".to_owned()),
            ..ParsedFeed::default()
        };
        let descriptor = build_descriptor(&response("https://example.com/feed"), &parsed);
        assert_eq!(descriptor.link, "https://example.com/");
    }

    #[test]
    fn test_descriptor_title_falls_back_to_host() {
        let parsed = ParsedFeed {
            link: Some("https://www.example.com/".to_owned()),
            ..ParsedFeed::default()
        };
        let descriptor = build_descriptor(&response("https://www.example.com/feed"), &parsed);
        assert_eq!(descriptor.title, "example.com");
    }
}
