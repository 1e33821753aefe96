//! The feed discovery engine.
//!
//! Given a seed URL — a blog homepage, a feed URL, or something in between —
//! the crawler explores a bounded frontier of candidates until it has found
//! both a parseable feed and a representative HTML page (for icon
//! discovery), or exhausted every heuristic. The loop is sequential from its
//! own perspective; concurrency belongs to the caller, which may run any
//! number of independent crawls in parallel.
//!
//! A single candidate's fetch failure is logged and abandoned, never
//! retried, never fatal. Only the total absence of a feed surfaces, as
//! [`DiscoveryError::NoFeedFound`] — a recoverable outcome, not a fault.

use std::collections::HashSet;

use thiserror::Error;

use crate::feed::fetcher::{FetchRequest, FetchResponse, Fetcher};
use crate::feed::parser::{self, ParsedFeed, RawEntry};
use crate::feed::scrape;
use crate::feed::vendor;
use crate::util::{normalize, parent_path, resolve, same_host};

/// Errors that can end a crawl.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The seed URL could not be parsed at all.
    #[error("invalid seed URL: {0}")]
    InvalidSeed(#[from] url::ParseError),
    /// Every candidate was exhausted without finding a feed.
    #[error("no feed found (last attempted: {attempted})")]
    NoFeedFound { attempted: String },
}

/// A probed site icon: the URL that answered and its payload.
#[derive(Debug, Clone)]
pub struct Favicon {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Everything a successful crawl produced. The page and favicon may be
/// absent; the feed never is.
#[derive(Debug)]
pub struct CrawlResult {
    /// The response the feed was parsed from (final URL, cache validators).
    pub feed: FetchResponse,
    pub parsed: ParsedFeed,
    pub entries: Vec<RawEntry>,
    /// The representative HTML page, when one was found.
    pub page: Option<FetchResponse>,
    pub favicon: Option<Favicon>,
}

/// The not-yet-tried candidate URLs of one crawl.
///
/// A URL is enqueued at most once: candidates are keyed by their normalized
/// form, so a page linking back to itself (or an http/https twin) never
/// re-enters the frontier. Pop order is LIFO — it decides which result wins
/// ties, not correctness.
struct Frontier {
    visited: HashSet<String>,
    pending: Vec<String>,
}

impl Frontier {
    fn new() -> Self {
        Self {
            visited: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Enqueues a candidate unless its normalized form was already seen.
    /// Returns whether the frontier grew.
    fn push(&mut self, url: &str) -> bool {
        if !self.visited.insert(normalize(url)) {
            return false;
        }
        self.pending.push(url.to_owned());
        true
    }

    fn pop(&mut self) -> Option<String> {
        self.pending.pop()
    }
}

/// Runs a full discovery crawl from a seed URL.
///
/// The seed goes through the vendor translator first (a pasted
/// `x.substack.com` homepage skips straight to its `/feed`). From there the
/// loop pops one candidate at a time and classifies the response: HTML pages
/// are captured once and scanned for a same-host feed link; anything else is
/// offered to the feed parser, and a parsed feed contributes its site link
/// as the next HTML candidate. When the frontier runs dry the engine
/// escalates — common-path guesses while the feed is missing, the parent
/// path while the page is — and stops only when escalation adds nothing new.
pub async fn crawl(fetcher: &Fetcher, seed: &str) -> Result<CrawlResult, DiscoveryError> {
    url::Url::parse(seed)?;

    let mut frontier = Frontier::new();
    frontier.push(&vendor::translate(seed));

    let mut feed_hit: Option<(FetchResponse, ParsedFeed, Vec<RawEntry>)> = None;
    let mut page: Option<FetchResponse> = None;
    let mut last_tried = seed.to_owned();
    let mut guessed = false;

    loop {
        while let Some(candidate) = frontier.pop() {
            if feed_hit.is_some() && page.is_some() {
                break;
            }
            tracing::debug!(url = %candidate, "trying candidate");
            last_tried = candidate.clone();

            let response = match fetcher.fetch(&FetchRequest::new(&candidate)).await {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!(url = %candidate, %error, "candidate fetch failed");
                    continue;
                }
            };

            if response.is_html() {
                if feed_hit.is_none() {
                    let body = String::from_utf8_lossy(&response.body);
                    match scrape::find_feed_link(&body, &response.url) {
                        Some(feed_url) if same_host(&feed_url, &response.url) => {
                            tracing::info!(page = %response.url, feed = %feed_url, "found feed link in page body");
                            frontier.push(&feed_url);
                        }
                        Some(feed_url) => {
                            tracing::info!(page = %response.url, feed = %feed_url, "ignoring off-host feed link");
                        }
                        None => {
                            tracing::info!(page = %response.url, "no feed link in page body");
                        }
                    }
                }
                if page.is_none() {
                    page = Some(response);
                }
            } else if feed_hit.is_none() {
                match parser::parse(&response.body) {
                    Ok((parsed, entries)) => {
                        tracing::info!(url = %response.url, "feed found");
                        if page.is_none() {
                            if let Some(link) = parsed.link.as_deref() {
                                let site = resolve(&response.url, link);
                                frontier.push(&site);
                            }
                        }
                        feed_hit = Some((response, parsed, entries));
                    }
                    Err(error) => {
                        tracing::debug!(url = %response.url, %error, "response is not a feed");
                    }
                }
            }
        }

        if feed_hit.is_some() && page.is_some() {
            break;
        }

        // Frontier exhausted: escalate before giving up. Guesses fire once
        // per crawl and parent-path climbing stops at the site root (its
        // parent is itself, already visited), so the loop terminates.
        let mut extended = false;
        if feed_hit.is_none() && !guessed {
            guessed = true;
            tracing::info!(url = %last_tried, "crawling common feed endpoints");
            for guess in scrape::common_feed_paths(&last_tried) {
                extended |= frontier.push(&guess);
            }
        }
        if page.is_none() {
            extended |= frontier.push(&parent_path(&last_tried));
        }
        if !extended {
            break;
        }
    }

    let Some((feed, parsed, entries)) = feed_hit else {
        return Err(DiscoveryError::NoFeedFound {
            attempted: last_tried,
        });
    };

    let favicon = match &page {
        Some(page) => {
            let body = String::from_utf8_lossy(&page.body);
            probe_favicons(fetcher, &body, &page.url).await
        }
        None => None,
    };

    Ok(CrawlResult {
        feed,
        parsed,
        entries,
        page,
        favicon,
    })
}

/// Probes favicon candidates in order, accepting the first that answers 200
/// with a non-HTML payload.
async fn probe_favicons(fetcher: &Fetcher, html: &str, base_url: &str) -> Option<Favicon> {
    for location in scrape::find_favicons(html, base_url) {
        let response = match fetcher.fetch(&FetchRequest::new(&location)).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(url = %location, %error, "favicon probe failed");
                continue;
            }
        };
        if response.status != 200 {
            continue;
        }
        if response
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("html"))
        {
            continue;
        }
        tracing::info!(url = %response.url, "favicon found");
        return Some(Favicon {
            url: response.url,
            content_type: response.content_type,
            bytes: response.body,
        });
    }
    None
}
