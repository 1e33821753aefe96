use url::Url;

/// Reduces a URL to a comparison key: the scheme and a single trailing slash
/// are stripped.
///
/// Two URLs name "the same candidate" during a crawl iff their normalized
/// forms are equal — `http://example.com/blog/` and `https://example.com/blog`
/// collapse to `example.com/blog`. The output is only ever compared, never
/// fetched.
pub fn normalize(url: &str) -> String {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    rest.strip_suffix('/').unwrap_or(rest).to_owned()
}

/// Returns the parent path of a URL, with a trailing slash.
///
/// `https://example.com/blog/index.xml` becomes `https://example.com/blog/`,
/// and `https://example.com/blog/` becomes `https://example.com/`. A URL
/// already at the site root is returned unchanged (there is nowhere further
/// up to go), as is anything unparseable.
pub fn parent_path(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_owned();
    };
    parsed.set_query(None);
    parsed.set_fragment(None);

    let segments: Vec<String> = match parsed.path_segments() {
        Some(segments) => segments
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        None => return url.to_owned(),
    };
    if segments.is_empty() {
        return parsed.to_string();
    }

    let parent = &segments[..segments.len() - 1];
    let mut path = String::from("/");
    for segment in parent {
        path.push_str(segment);
        path.push('/');
    }
    parsed.set_path(&path);
    parsed.to_string()
}

/// Returns the site root of a URL (scheme + host, path `/`), or `None` when
/// the URL has no host.
pub fn site_root(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed.host_str()?;
    parsed.set_path("/");
    parsed.set_query(None);
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Resolves a potentially relative href against a base URL.
///
/// Protocol-relative hrefs (`//cdn.example.com/feed`) go through the URL
/// parser so the result is always well-formed; an unresolvable href is
/// returned as-is.
pub fn resolve(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    if let Some(rest) = href.strip_prefix("//") {
        let scheme = Url::parse(base_url)
            .map(|u| u.scheme().to_owned())
            .unwrap_or_else(|_| "https".to_owned());
        if let Ok(parsed) = Url::parse(&format!("{scheme}://{rest}")) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}

/// True when both URLs parse and share a host.
pub fn same_host(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => match (a.host_str(), b.host_str()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        },
        _ => false,
    }
}
