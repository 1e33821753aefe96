//! Feed-link, favicon, and common-path extraction from HTML pages.
//!
//! These functions are pure: they parse a document (or a URL) and return
//! candidate URLs for the discovery engine to try. Fetching and probing stay
//! in [`crate::feed::discovery`].

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::util::{normalize, resolve, site_root};

/// Conventional feed endpoints probed when a page advertises nothing.
const COMMON_ENDPOINTS: [&str; 8] = [
    "feed.xml",
    "index.xml",
    "rss.xml",
    "feed",
    "rss",
    "atom.xml",
    "atom",
    "feed.atom",
];

static FEED_LINK_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"application/(atom|rss)\+xml$").expect("valid regex"));
static FEED_HREF_XML: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(index|feed|rss|atom).*\.xml$").expect("valid regex"));
static FEED_HREF_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(rss|atom)$").expect("valid regex"));

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[href]").expect("valid selector"));
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Scans an HTML document for the most plausible feed URL.
///
/// Search order, first match wins:
/// 1. `<link type="application/rss+xml">` / `application/atom+xml`
/// 2. an anchor whose visible text contains "rss" (case-insensitive)
/// 3. an anchor whose href matches `(index|feed|rss|atom).*\.xml$`
/// 4. an anchor whose href ends in `rss` or `atom`
///
/// The returned URL is resolved against `base_url`.
pub fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    for link in doc.select(&LINK_SELECTOR) {
        let feed_typed = link
            .value()
            .attr("type")
            .is_some_and(|t| FEED_LINK_TYPE.is_match(t.trim()));
        if feed_typed {
            if let Some(href) = link.value().attr("href") {
                return Some(resolve(base_url, href));
            }
        }
    }

    let anchors: Vec<_> = doc.select(&ANCHOR_SELECTOR).collect();

    for anchor in &anchors {
        let text: String = anchor.text().collect::<String>().to_lowercase();
        if text.contains("rss") {
            if let Some(href) = anchor.value().attr("href") {
                return Some(resolve(base_url, href));
            }
        }
    }

    for anchor in &anchors {
        if let Some(href) = anchor.value().attr("href") {
            if FEED_HREF_XML.is_match(href) {
                return Some(resolve(base_url, href));
            }
        }
    }

    for anchor in &anchors {
        if let Some(href) = anchor.value().attr("href") {
            if FEED_HREF_SUFFIX.is_match(href) {
                return Some(resolve(base_url, href));
            }
        }
    }

    None
}

/// Collects favicon candidates from a page, in document order.
///
/// Every `<link rel~=icon>` href counts except `data:` URIs, resolved
/// against `base_url`; `/favicon.ico` and `/favicon.png` at the site root
/// are always appended as last-resort candidates (deduplicated against the
/// ones already found).
pub fn find_favicons(html: &str, base_url: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut favicons = Vec::new();

    for link in doc.select(&LINK_SELECTOR) {
        let rel = link.value().attr("rel").unwrap_or("");
        if !rel.to_ascii_lowercase().contains("icon") {
            continue;
        }
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if href.starts_with("data:") {
            continue;
        }
        tracing::debug!(href, base = base_url, "found favicon link in page body");
        favicons.push(resolve(base_url, href));
    }

    let root = site_root(base_url).unwrap_or_else(|| base_url.to_owned());
    for fallback in ["favicon.ico", "favicon.png"] {
        let location = resolve(&root, fallback);
        if !favicons.contains(&location) {
            favicons.push(location);
        }
    }

    favicons
}

/// Guesses conventional feed endpoints for a URL.
///
/// When the URL carries a path (`site.com/blog`), candidates are produced
/// both at the site root and under that path; a candidate identical to the
/// URL itself is excluded — it has already been tried.
pub fn common_feed_paths(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    let mut push = |candidate: String| {
        if normalize(&candidate) != normalize(url) && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    if parsed.path() != "/" && !parsed.path().is_empty() {
        if let Some(root) = site_root(url) {
            for endpoint in COMMON_ENDPOINTS {
                push(join_segment(&root, endpoint));
            }
        }
    }

    for endpoint in COMMON_ENDPOINTS {
        push(join_segment(url, endpoint));
    }

    candidates
}

fn join_segment(base: &str, segment: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_link_wins() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        </head><body><a href="/somewhere/atom">subscribe</a></body></html>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com").as_deref(),
            Some("https://example.com/feed.xml")
        );
    }

    #[test]
    fn test_atom_typed_link() {
        let html = r#"<link rel="alternate" type="application/atom+xml" href="https://example.com/atom.xml">"#;
        assert_eq!(
            find_feed_link(html, "https://example.com").as_deref(),
            Some("https://example.com/atom.xml")
        );
    }

    #[test]
    fn test_anchor_text_rss_hint() {
        let html = r#"<html><body>
            <a href="/subscribe">RSS feed</a>
        </body></html>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com").as_deref(),
            Some("https://example.com/subscribe")
        );
    }

    #[test]
    fn test_anchor_href_xml_pattern() {
        let html = r#"<html><body>
            <a href="/static/style.css">styles</a>
            <a href="/blog/index.xml">whatever</a>
        </body></html>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com").as_deref(),
            Some("https://example.com/blog/index.xml")
        );
    }

    #[test]
    fn test_anchor_href_suffix_pattern() {
        let html = r#"<a href="https://example.com/blog/atom">here</a>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com").as_deref(),
            Some("https://example.com/blog/atom")
        );
    }

    #[test]
    fn test_no_feed_link() {
        let html = r#"<html><head><link rel="stylesheet" href="/style.css"></head>
            <body><a href="/about">About</a></body></html>"#;
        assert_eq!(find_feed_link(html, "https://example.com"), None);
    }

    #[test]
    fn test_typed_link_beats_anchor_order() {
        // The anchor appears first in the document, but the typed <link>
        // is a stronger signal.
        let html = r#"<html><body><a href="/maybe-rss">rss</a></body>
            <head><link type="application/rss+xml" href="/real.xml"></head></html>"#;
        assert_eq!(
            find_feed_link(html, "https://example.com").as_deref(),
            Some("https://example.com/real.xml")
        );
    }

    #[test]
    fn test_favicons_in_document_order_with_fallbacks() {
        let html = r#"<html><head>
            <link rel="icon" href="/icons/a.png">
            <link rel="shortcut icon" href="https://cdn.example.com/b.ico">
        </head></html>"#;
        let favicons = find_favicons(html, "https://example.com/blog/post");
        assert_eq!(
            favicons,
            vec![
                "https://example.com/icons/a.png".to_owned(),
                "https://cdn.example.com/b.ico".to_owned(),
                "https://example.com/favicon.ico".to_owned(),
                "https://example.com/favicon.png".to_owned(),
            ]
        );
    }

    #[test]
    fn test_favicons_exclude_data_uris_and_dedup_fallbacks() {
        let html = r#"<html><head>
            <link rel="icon" href="data:image/png;base64,AAAA">
            <link rel="icon" href="/favicon.ico">
        </head></html>"#;
        let favicons = find_favicons(html, "https://example.com");
        assert_eq!(
            favicons,
            vec![
                "https://example.com/favicon.ico".to_owned(),
                "https://example.com/favicon.png".to_owned(),
            ]
        );
    }

    #[test]
    fn test_common_paths_for_pathless_url() {
        let candidates = common_feed_paths("https://example.com");
        assert_eq!(candidates.len(), COMMON_ENDPOINTS.len());
        assert!(candidates.contains(&"https://example.com/feed.xml".to_owned()));
        assert!(candidates.contains(&"https://example.com/feed.atom".to_owned()));
    }

    #[test]
    fn test_common_paths_for_url_with_path() {
        let candidates = common_feed_paths("https://example.com/blog");
        // Root candidates come first, then path-relative ones
        assert_eq!(candidates[0], "https://example.com/feed.xml");
        assert!(candidates.contains(&"https://example.com/blog/feed.xml".to_owned()));
        assert!(candidates.contains(&"https://example.com/blog/rss".to_owned()));
        assert_eq!(candidates.len(), COMMON_ENDPOINTS.len() * 2);
    }

    #[test]
    fn test_common_paths_exclude_the_url_itself() {
        let candidates = common_feed_paths("https://example.com/rss");
        assert!(!candidates.contains(&"https://example.com/rss".to_owned()));
        // Still present under the path: site.com/rss/rss
        assert!(candidates.contains(&"https://example.com/rss/rss".to_owned()));
    }

    #[test]
    fn test_common_paths_unparseable_url() {
        assert!(common_feed_paths("not a url").is_empty());
    }
}
