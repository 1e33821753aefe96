//! Raw entries into normalized, sanitized, deduplicatable records.
//!
//! [`normalize_entry`] is a pure function of the raw entry and the feed's
//! site link — no network access, no clock, no randomness — so a feed
//! refresh always normalizes the same input to the same record.

use chrono::{DateTime, NaiveDate, Utc};
use ego_tree::NodeRef;
use scraper::{Html, Node};
use url::Url;

use crate::feed::parser::RawEntry;
use crate::util::resolve;

/// Tags allowed through the content sanitizer. Everything else is unwrapped
/// (children kept), except the executable/embedding tags which are dropped
/// wholly.
const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "audio", "b", "blockquote", "br", "code", "dd", "del", "div", "dl", "dt", "em",
    "figcaption", "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "ins", "li",
    "ol", "p", "pre", "q", "small", "source", "span", "strong", "sub", "sup", "table", "tbody",
    "td", "tfoot", "th", "thead", "tr", "ul", "video",
];

const DROPPED_TAGS: &[&str] = &["embed", "iframe", "noscript", "object", "script", "style"];

/// Attributes that survive sanitization.
const KEPT_ATTRS: &[&str] = &["href", "src", "title"];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Presentation class applied to every image that survives sanitization.
const IMG_CLASS: &str = "rounded mx-auto d-block";

/// Image sources at or above this length never become thumbnails.
const THUMBNAIL_MAX_SRC_LEN: usize = 500;

/// Characters of tag-stripped content used when an entry has no title.
const DERIVED_TITLE_LEN: usize = 300;

/// The persisted form of one feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    /// Never empty: raw title, else a prefix of the stripped content, else
    /// the link's last path segment.
    pub title: String,
    pub slug: String,
    /// Absolute, resolved against the feed's site link.
    pub link: String,
    /// Present only when the feed supplied a guid that is not a link alias.
    pub guid: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Sanitized HTML.
    pub content: Option<String>,
    /// Sanitized HTML with images and "continue reading" links stripped.
    pub summary: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
}

/// The deduplication key: `(feed, guid)` when a non-alias guid exists,
/// `(feed, link)` otherwise. The feed half lives in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryIdentity {
    Guid(String),
    Link(String),
}

impl NormalizedEntry {
    pub fn identity(&self) -> EntryIdentity {
        match &self.guid {
            Some(guid) => EntryIdentity::Guid(guid.clone()),
            None => EntryIdentity::Link(self.link.clone()),
        }
    }
}

/// Converts a raw entry into its normalized record.
///
/// Returns `None` for entries that cannot be represented: no content and no
/// summary, no usable link or guid, or a present-but-unparseable timestamp.
/// Rejection is silent by design — one malformed entry never aborts a feed.
pub fn normalize_entry(raw: &RawEntry, feed_link: &str) -> Option<NormalizedEntry> {
    // Promote summary to content when content is missing; drop the summary
    // when it duplicates the content.
    let mut content = raw.content.clone();
    let mut summary = raw.summary.clone();
    if content.is_none() {
        content = summary.take();
    } else if summary == content {
        summary = None;
    }
    let content = content?;

    let summary = summary.map(|s| sanitize_summary(&s));

    let sanitized = sanitize_content(&content, feed_link);

    let published = match &raw.published {
        Some(text) => Some(parse_date(text)?),
        None => None,
    };
    let updated = match &raw.updated {
        Some(text) => Some(parse_date(text)?),
        None => None,
    };
    // An entry that only carries `updated` still needs a sort key
    let published = published.or(updated);

    let raw_link = raw
        .link
        .clone()
        .or_else(|| raw.guid_is_link.then(|| raw.guid.clone()).flatten())?;
    let link = resolve(feed_link, &raw_link);

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .or_else(|| derived_title(&sanitized.html))
        .or_else(|| last_path_segment(&link))?;

    let mut slug = slug::slugify(&title);
    if slug.is_empty() {
        slug = last_path_segment(&link)
            .map(|segment| slug::slugify(segment))
            .unwrap_or_default();
    }

    let guid = if raw.guid_is_link {
        None
    } else {
        raw.guid.clone().filter(|g| !g.is_empty())
    };

    Some(NormalizedEntry {
        title,
        slug,
        link,
        guid,
        published,
        updated,
        content: Some(sanitized.html),
        summary,
        author: raw.author.as_ref().and_then(|a| a.display()).map(str::to_owned),
        thumbnail: sanitized.thumbnail,
    })
}

fn derived_title(content_html: &str) -> Option<String> {
    let stripped = strip_tags(content_html);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(DERIVED_TITLE_LEN).collect())
}

fn last_path_segment(link: &str) -> Option<String> {
    let parsed = Url::parse(link).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_owned)
}

/// Parses an entry timestamp: RFC 2822, then RFC 3339, then the `%d %b %Y %Z`
/// fallback seen in older feeds. Named zones cannot be resolved to offsets,
/// so the fallback reads the date portion as UTC midnight.
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date_part = match text.rsplit_once(' ') {
        Some((date, zone)) if zone.chars().all(|c| c.is_ascii_alphabetic()) => date,
        _ => text,
    };
    let date = NaiveDate::parse_from_str(date_part.trim(), "%d %b %Y").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

// ============================================================================
// Sanitization
// ============================================================================

struct SanitizedContent {
    html: String,
    thumbnail: Option<String>,
}

/// Runs entry content through the tag allow-list.
///
/// Disallowed tags are unwrapped (their children survive); script-like tags
/// disappear with their contents. Only `href`/`src`/`title` attributes are
/// kept. Every `<img>` loses `width`/`height`/`class`, gains the fixed
/// presentation class, and has a host-less `src` rewritten onto the feed
/// link's scheme and host; the first image whose resulting `src` is under
/// 500 characters becomes the thumbnail.
fn sanitize_content(html: &str, feed_link: &str) -> SanitizedContent {
    let doc = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    let mut thumbnail = None;
    for child in doc.root_element().children() {
        write_sanitized(child, &mut out, feed_link, &mut thumbnail);
    }
    SanitizedContent {
        html: out,
        thumbnail,
    }
}

fn write_sanitized(
    node: NodeRef<'_, Node>,
    out: &mut String,
    feed_link: &str,
    thumbnail: &mut Option<String>,
) {
    match node.value() {
        Node::Text(text) => out.push_str(&html_escape::encode_text(&**text)),
        Node::Element(element) => {
            let name = element.name();
            if DROPPED_TAGS.contains(&name) {
                return;
            }
            if !ALLOWED_TAGS.contains(&name) {
                for child in node.children() {
                    write_sanitized(child, out, feed_link, thumbnail);
                }
                return;
            }

            out.push('<');
            out.push_str(name);
            if name == "img" {
                if let Some(src) = element.attr("src") {
                    let src = absolutize_src(src, feed_link);
                    push_attr(out, "src", &src);
                    if thumbnail.is_none() && src.len() < THUMBNAIL_MAX_SRC_LEN {
                        *thumbnail = Some(src);
                    }
                }
                if let Some(title) = element.attr("title") {
                    push_attr(out, "title", title);
                }
                push_attr(out, "class", IMG_CLASS);
            } else {
                for (key, value) in element.attrs() {
                    if KEPT_ATTRS.contains(&key) {
                        push_attr(out, key, value);
                    }
                }
            }
            out.push('>');
            if VOID_TAGS.contains(&name) {
                return;
            }
            for child in node.children() {
                write_sanitized(child, out, feed_link, thumbnail);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => {}
    }
}

/// Scrubs a summary: drops every `<img>` and any anchor whose text contains
/// "continue reading" (case-insensitive). Other markup passes through
/// unchanged, attributes included.
fn sanitize_summary(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    for child in doc.root_element().children() {
        write_summary(child, &mut out);
    }
    out
}

fn write_summary(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(&html_escape::encode_text(&**text)),
        Node::Element(element) => {
            let name = element.name();
            if name == "img" {
                return;
            }
            if name == "a" && anchor_text(node).to_lowercase().contains("continue reading") {
                return;
            }

            out.push('<');
            out.push_str(name);
            for (key, value) in element.attrs() {
                push_attr(out, key, value);
            }
            out.push('>');
            if VOID_TAGS.contains(&name) {
                return;
            }
            for child in node.children() {
                write_summary(child, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        _ => {}
    }
}

fn anchor_text(node: NodeRef<'_, Node>) -> String {
    scraper::ElementRef::wrap(node)
        .map(|element| element.text().collect())
        .unwrap_or_default()
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&html_escape::encode_double_quoted_attribute(value));
    out.push('"');
}

/// Rewrites a host-less image source onto the feed link's scheme and host.
fn absolutize_src(src: &str, feed_link: &str) -> String {
    if Url::parse(src).map(|u| u.has_host()).unwrap_or(false) {
        return src.to_owned();
    }
    resolve(feed_link, src)
}

fn strip_tags(html: &str) -> String {
    Html::parse_fragment(html).root_element().text().collect()
}
