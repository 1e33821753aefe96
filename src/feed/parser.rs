//! Multi-dialect feed parsing: RSS 2.0, RDF/RSS 1.0, and Atom.
//!
//! The three dialects disagree on element names, where entries live, and how
//! links are represented, so each gets its own accessor implementation behind
//! the shared [`FeedDialect`] trait; [`parse`] dispatches on the
//! namespace-stripped root tag. RDF is RSS with the items hoisted to the root
//! and the author sourced from Dublin Core, so it delegates item extraction
//! to the RSS routines and overrides only what differs.
//!
//! The XML layer is deliberately forgiving: feeds in the wild are truncated,
//! carry mismatched end tags, and lean on undeclared entities. Tree
//! construction salvages whatever prefix of the document it can instead of
//! failing hard; only a missing or unrecognized root element is an error.

use thiserror::Error;
use url::Url;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

/// Errors from feed parsing. Neither is retryable: the document is simply
/// not a feed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document contains no root element at all.
    #[error("document has no root element")]
    NoRoot,
    /// The root element is not one of `rss`, `RDF`, or `feed`.
    #[error("unrecognized root element <{0}>")]
    UnknownRoot(String),
}

/// Feed-level fields extracted by a dialect. Everything is optional; the
/// descriptor builder fills the gaps from the HTTP response.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    /// The human-facing site URL, as written in the document (possibly
    /// relative — resolution happens against the fetched URL).
    pub link: Option<String>,
    pub author: Option<Author>,
    /// RSS `<ttl>` in minutes.
    pub ttl: Option<u32>,
}

/// One entry as a dialect produced it: a bag of raw strings, nothing
/// resolved, nothing sanitized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    /// True when the dialect marked the guid as a mere alias for the link
    /// (RSS `isPermaLink`, which defaults to true; an Atom `<id>` equal to
    /// the entry link). An alias guid never participates in identity.
    pub guid_is_link: bool,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub author: Option<Author>,
}

/// An author split from the single-string form `"email name"` on the first
/// space; a spaceless string is treated as an email address. Atom's
/// structured `<author>` element maps onto the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub email: Option<String>,
    pub name: Option<String>,
}

impl Author {
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match text.split_once(' ') {
            Some((email, name)) => Some(Self {
                email: Some(email.to_owned()),
                name: Some(name.trim().to_owned()),
            }),
            None => Some(Self {
                email: Some(text.to_owned()),
                name: None,
            }),
        }
    }

    /// Human-facing form: the name when known, the email otherwise.
    pub fn display(&self) -> Option<&str> {
        self.name.as_deref().or(self.email.as_deref())
    }
}

/// Parses a feed document into feed-level fields plus raw entries.
///
/// # Errors
///
/// [`ParseError::NoRoot`] when nothing resembling an element could be
/// salvaged, [`ParseError::UnknownRoot`] when the root tag is not a feed
/// dialect we know.
pub fn parse(bytes: &[u8]) -> Result<(ParsedFeed, Vec<RawEntry>), ParseError> {
    let root = parse_tree(bytes).ok_or(ParseError::NoRoot)?;
    let dialect: Box<dyn FeedDialect + '_> = match root.name.as_str() {
        "rss" => Box::new(Rss::from_root(&root)),
        "RDF" => Box::new(Rdf::from_root(&root)),
        "feed" => Box::new(Atom { root: &root }),
        other => return Err(ParseError::UnknownRoot(other.to_owned())),
    };
    Ok((dialect.feed(), dialect.entries()))
}

// ============================================================================
// Lenient XML tree
// ============================================================================

#[derive(Debug, Default)]
struct Element {
    /// Local name with any namespace prefix stripped.
    name: String,
    /// Attributes under their full written names (prefix included).
    attrs: Vec<(String, String)>,
    /// Direct text and CDATA content, entity-unescaped where possible.
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == local)
    }

    fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == local)
    }

    /// Trimmed direct text, `None` when missing or blank.
    fn child_text(&self, local: &str) -> Option<String> {
        self.child(local)
            .map(|c| c.text.trim().to_owned())
            .filter(|t| !t.is_empty())
    }

    /// Direct text plus all descendant text, for content embedded as XHTML.
    fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }
}

/// Builds an element tree, tolerating malformed input.
///
/// Mismatched end-tag names are accepted, truncated documents fold their
/// still-open elements into their parents, and a mid-document syntax error
/// salvages everything parsed up to that point. Comments, processing
/// instructions, and doctypes are discarded. Returns `None` only when no
/// root element could be recovered at all.
fn parse_tree(bytes: &[u8]) -> Option<Element> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => stack.push(element_from(&start)),
            Ok(Event::Empty(start)) => {
                let element = element_from(&start);
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    match text.unescape() {
                        Ok(unescaped) => top.text.push_str(&unescaped),
                        // Undeclared entity or similar: keep the raw text
                        Err(_) => top.text.push_str(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Ok(Event::CData(cdata)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(%error, "malformed XML, salvaging partial tree");
                break;
            }
        }
        buf.clear();
    }

    while let Some(element) = stack.pop() {
        attach(&mut stack, &mut root, element);
    }

    root
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    }
}

fn element_from(start: &BytesStart<'_>) -> Element {
    let raw_name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let name = raw_name
        .rsplit_once(':')
        .map(|(_, local)| local.to_owned())
        .unwrap_or(raw_name);

    let attrs = start
        .attributes()
        .with_checks(false)
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect();

    Element {
        name,
        attrs,
        text: String::new(),
        children: Vec::new(),
    }
}

// ============================================================================
// Dialects
// ============================================================================

/// The common accessor surface every dialect implements.
trait FeedDialect {
    fn feed(&self) -> ParsedFeed;
    fn entries(&self) -> Vec<RawEntry>;
}

struct Rss<'a> {
    channel: Option<&'a Element>,
}

impl<'a> Rss<'a> {
    fn from_root(root: &'a Element) -> Self {
        Self {
            channel: root.child("channel"),
        }
    }
}

impl FeedDialect for Rss<'_> {
    fn feed(&self) -> ParsedFeed {
        let Some(channel) = self.channel else {
            return ParsedFeed::default();
        };
        ParsedFeed {
            title: channel.child_text("title"),
            subtitle: channel.child_text("description"),
            link: rss_link(channel),
            author: channel
                .child_text("managingEditor")
                .as_deref()
                .and_then(Author::from_text),
            ttl: channel.child_text("ttl").and_then(|t| t.parse().ok()),
        }
    }

    fn entries(&self) -> Vec<RawEntry> {
        self.channel
            .map(|channel| channel.children_named("item").map(rss_item).collect())
            .unwrap_or_default()
    }
}

/// Text of the first `<link>` carrying text content. Atom `<link>` elements
/// mirrored into RSS documents hold their target in `href` and have no text,
/// so they are skipped rather than shadowing the real site link.
fn rss_link(parent: &Element) -> Option<String> {
    parent
        .children_named("link")
        .map(|l| l.text.trim())
        .find(|t| !t.is_empty())
        .map(str::to_owned)
}

fn rss_item(item: &Element) -> RawEntry {
    let guid_element = item.child("guid");
    let guid = guid_element
        .map(|g| g.text.trim().to_owned())
        .filter(|g| !g.is_empty());
    // isPermaLink defaults to true: an unmarked guid IS the entry's link
    let guid_is_link = guid_element
        .map(|g| {
            g.attr("isPermaLink")
                .map_or(true, |v| !v.eq_ignore_ascii_case("false"))
        })
        .unwrap_or(false);

    RawEntry {
        title: item.child_text("title"),
        link: rss_link(item),
        guid,
        guid_is_link,
        published: item
            .child_text("pubDate")
            .or_else(|| item.child_text("date")),
        updated: None,
        content: item.child_text("encoded"),
        summary: item.child_text("description"),
        author: item
            .child_text("author")
            .as_deref()
            .and_then(Author::from_text),
    }
}

/// RDF/RSS 1.0: the channel looks like RSS, but items are siblings of the
/// channel under the root, and the author comes from Dublin Core when that
/// namespace is declared. Everything else delegates to the RSS routines.
struct Rdf<'a> {
    root: &'a Element,
    rss: Rss<'a>,
    dc_declared: bool,
}

impl<'a> Rdf<'a> {
    fn from_root(root: &'a Element) -> Self {
        let dc_declared = root
            .attrs
            .iter()
            .any(|(k, v)| k.starts_with("xmlns") && v == DC_NAMESPACE);
        Self {
            root,
            rss: Rss::from_root(root),
            dc_declared,
        }
    }

    fn creator(&self, element: &Element) -> Option<Author> {
        if !self.dc_declared {
            return None;
        }
        element
            .child_text("creator")
            .as_deref()
            .and_then(Author::from_text)
    }
}

impl FeedDialect for Rdf<'_> {
    fn feed(&self) -> ParsedFeed {
        let mut feed = self.rss.feed();
        if feed.author.is_none() {
            feed.author = self.rss.channel.and_then(|c| self.creator(c));
        }
        feed
    }

    fn entries(&self) -> Vec<RawEntry> {
        self.root
            .children_named("item")
            .map(|item| {
                let mut entry = rss_item(item);
                if entry.author.is_none() {
                    entry.author = self.creator(item);
                }
                entry
            })
            .collect()
    }
}

struct Atom<'a> {
    root: &'a Element,
}

impl FeedDialect for Atom<'_> {
    fn feed(&self) -> ParsedFeed {
        ParsedFeed {
            title: self.root.child_text("title"),
            subtitle: self.root.child_text("subtitle"),
            link: atom_link(self.root),
            author: atom_author(self.root),
            ttl: None,
        }
    }

    fn entries(&self) -> Vec<RawEntry> {
        self.root
            .children_named("entry")
            .map(|entry| {
                let link = atom_link(entry);
                let guid = entry.child_text("id");
                let guid_is_link = matches!(
                    (&guid, &link),
                    (Some(guid), Some(link)) if guid == link
                );
                RawEntry {
                    title: entry.child_text("title"),
                    link,
                    guid,
                    guid_is_link,
                    published: entry
                        .child_text("published")
                        .or_else(|| entry.child_text("issued")),
                    updated: entry
                        .child_text("updated")
                        .or_else(|| entry.child_text("modified")),
                    content: entry
                        .child("content")
                        .map(|c| c.text_content().trim().to_owned())
                        .filter(|c| !c.is_empty()),
                    summary: entry.child_text("summary"),
                    author: atom_author(entry),
                }
            })
            .collect()
    }
}

/// Atom link selection: prefer `rel="alternate" type="text/html"`, then any
/// `rel="alternate"`, then the first link that is neither `self` nor `hub`,
/// and finally fall back to `<id>` when it is itself a valid URL.
fn atom_link(element: &Element) -> Option<String> {
    let links: Vec<&Element> = element.children_named("link").collect();
    let href = |l: &&Element| l.attr("href").map(str::to_owned);

    links
        .iter()
        .find(|l| l.attr("rel") == Some("alternate") && l.attr("type") == Some("text/html"))
        .and_then(href)
        .or_else(|| {
            links
                .iter()
                .find(|l| l.attr("rel") == Some("alternate"))
                .and_then(href)
        })
        .or_else(|| {
            links
                .iter()
                .find(|l| !matches!(l.attr("rel"), Some("self") | Some("hub")))
                .and_then(href)
        })
        .or_else(|| {
            element
                .child_text("id")
                .filter(|id| Url::parse(id).is_ok())
        })
}

fn atom_author(element: &Element) -> Option<Author> {
    let author = element.child("author")?;
    let name = author.child_text("name");
    let email = author.child_text("email");
    if name.is_some() || email.is_some() {
        return Some(Author { email, name });
    }
    Author::from_text(author.text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <description>An example blog</description>
    <ttl>60</ttl>
    <item>
      <title>First Post</title>
      <link>https://example.com/post/1</link>
      <pubDate>Tue, 01 Mar 2022 12:00:00 GMT</pubDate>
      <description>Hello world</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_rss_roundtrip() {
        let (feed, entries) = parse(MINIMAL_RSS.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example Blog"));
        assert_eq!(feed.link.as_deref(), Some("https://example.com/"));
        assert_eq!(feed.subtitle.as_deref(), Some("An example blog"));
        assert_eq!(feed.ttl, Some(60));

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.title.as_deref(), Some("First Post"));
        assert_eq!(entry.link.as_deref(), Some("https://example.com/post/1"));
        assert_eq!(
            entry.published.as_deref(),
            Some("Tue, 01 Mar 2022 12:00:00 GMT")
        );
        assert_eq!(entry.summary.as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_rss_content_encoded_and_permalink_guid() {
        let rss = r#"<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel><title>T</title>
  <item>
    <guid isPermaLink="false">tag:example.com,2022:1</guid>
    <link>https://example.com/1</link>
    <content:encoded><![CDATA[<p>Full &amp; rich</p>]]></content:encoded>
  </item>
  <item>
    <guid>https://example.com/2</guid>
    <link>https://example.com/2</link>
    <description>two</description>
  </item>
</channel></rss>"#;
        let (_, entries) = parse(rss.as_bytes()).unwrap();

        assert_eq!(entries[0].guid.as_deref(), Some("tag:example.com,2022:1"));
        assert!(!entries[0].guid_is_link);
        assert_eq!(entries[0].content.as_deref(), Some("<p>Full &amp; rich</p>"));

        // isPermaLink defaults to true
        assert!(entries[1].guid_is_link);
    }

    #[test]
    fn test_rss_link_skips_atom_shadow() {
        let rss = r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
  <title>T</title>
  <atom:link href="https://example.com/feed" rel="self" type="application/rss+xml"/>
  <link>https://example.com/</link>
</channel></rss>"#;
        let (feed, _) = parse(rss.as_bytes()).unwrap();
        assert_eq!(feed.link.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_atom_link_selection_prefers_html_alternate() {
        let before = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>T</title>
  <link rel="alternate" type="text/html" href="https://example.com/"/>
  <link rel="self" href="https://example.com/atom.xml"/>
</feed>"#;
        let after = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>T</title>
  <link rel="self" href="https://example.com/atom.xml"/>
  <link rel="alternate" type="text/html" href="https://example.com/"/>
</feed>"#;

        for doc in [before, after] {
            let (feed, _) = parse(doc.as_bytes()).unwrap();
            assert_eq!(feed.link.as_deref(), Some("https://example.com/"));
        }
    }

    #[test]
    fn test_atom_link_falls_back_to_id_url() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>T</title>
  <id>https://example.com/</id>
  <link rel="self" href="https://example.com/atom.xml"/>
</feed>"#;
        let (feed, _) = parse(atom.as_bytes()).unwrap();
        assert_eq!(feed.link.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_atom_entry_fields_and_guid_alias() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>T</title>
  <entry>
    <title>Post</title>
    <id>https://example.com/post/1</id>
    <link rel="alternate" href="https://example.com/post/1"/>
    <published>2022-03-01T12:00:00Z</published>
    <updated>2022-03-02T12:00:00Z</updated>
    <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
    <summary>Short</summary>
    <author><name>Jack</name><email>jack@example.com</email></author>
  </entry>
  <entry>
    <title>Opaque</title>
    <id>tag:example.com,2022:2</id>
    <link rel="alternate" href="https://example.com/post/2"/>
    <summary>two</summary>
  </entry>
</feed>"#;
        let (_, entries) = parse(atom.as_bytes()).unwrap();

        let entry = &entries[0];
        assert_eq!(entry.content.as_deref(), Some("<p>Body</p>"));
        assert_eq!(entry.summary.as_deref(), Some("Short"));
        assert_eq!(entry.updated.as_deref(), Some("2022-03-02T12:00:00Z"));
        // id equals the selected link, so the guid is just an alias
        assert!(entry.guid_is_link);
        let author = entry.author.as_ref().unwrap();
        assert_eq!(author.name.as_deref(), Some("Jack"));
        assert_eq!(author.email.as_deref(), Some("jack@example.com"));

        // Opaque tag id is a real guid
        assert!(!entries[1].guid_is_link);
    }

    #[test]
    fn test_rdf_items_at_root_with_dc_creator() {
        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.com/">
    <title>RDF Blog</title>
    <link>https://example.com/</link>
    <description>old school</description>
  </channel>
  <item rdf:about="https://example.com/1">
    <title>One</title>
    <link>https://example.com/1</link>
    <description>first</description>
    <dc:creator>jack@example.com Jack</dc:creator>
    <dc:date>2022-03-01T12:00:00Z</dc:date>
  </item>
</rdf:RDF>"#;
        let (feed, entries) = parse(rdf.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("RDF Blog"));
        assert_eq!(entries.len(), 1);
        let author = entries[0].author.as_ref().unwrap();
        assert_eq!(author.email.as_deref(), Some("jack@example.com"));
        assert_eq!(author.name.as_deref(), Some("Jack"));
        assert_eq!(
            entries[0].published.as_deref(),
            Some("2022-03-01T12:00:00Z")
        );
    }

    #[test]
    fn test_rdf_creator_ignored_without_namespace() {
        let rdf = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <channel><title>T</title></channel>
  <item><title>One</title><link>https://example.com/1</link><creator>Jack</creator></item>
</rdf:RDF>"#;
        let (_, entries) = parse(rdf.as_bytes()).unwrap();
        assert!(entries[0].author.is_none());
    }

    #[test]
    fn test_author_single_string_split() {
        let author = Author::from_text("jack@example.com Jack Evans").unwrap();
        assert_eq!(author.email.as_deref(), Some("jack@example.com"));
        assert_eq!(author.name.as_deref(), Some("Jack Evans"));

        let bare = Author::from_text("jack@example.com").unwrap();
        assert_eq!(bare.email.as_deref(), Some("jack@example.com"));
        assert_eq!(bare.name, None);

        assert!(Author::from_text("   ").is_none());
    }

    #[test]
    fn test_no_root_element() {
        assert!(matches!(parse(b"").unwrap_err(), ParseError::NoRoot));
        assert!(matches!(
            parse(b"just some text").unwrap_err(),
            ParseError::NoRoot
        ));
    }

    #[test]
    fn test_unknown_root_element() {
        let err = parse(b"<html><body>Hi</body></html>").unwrap_err();
        assert!(matches!(err, ParseError::UnknownRoot(tag) if tag == "html"));
    }

    #[test]
    fn test_truncated_document_salvages_parsed_prefix() {
        let truncated = r#"<rss version="2.0"><channel>
            <title>Partial</title>
            <item><title>One</title><link>https://example.com/1</link>
            <description>survives</description></item>
            <item><title>Two</title><link>https://exam"#;
        let (feed, entries) = parse(truncated.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Partial"));
        assert_eq!(entries[0].title.as_deref(), Some("One"));
    }

    #[test]
    fn test_mismatched_end_tags_tolerated() {
        let sloppy = r#"<rss><channel><title>Sloppy</experiment></channel></rss>"#;
        let (feed, _) = parse(sloppy.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Sloppy"));
    }

    #[test]
    fn test_comments_discarded() {
        let rss = r#"<rss><channel><!-- nothing to see --><title>T</title></channel></rss>"#;
        let (feed, _) = parse(rss.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("T"));
    }
}
