//! Known-platform feed URL translation.
//!
//! Large blogging platforms put their feeds at predictable paths. Translating
//! a pasted homepage URL up front saves the crawler a full HTML round-trip on
//! the happy path, and costs nothing otherwise: unrecognized hosts pass
//! through untouched.

use url::Url;

/// Maps a known blogging platform homepage URL to its conventional feed path.
///
/// | host suffix                  | rule                                    |
/// |------------------------------|-----------------------------------------|
/// | wordpress.com, bearblog.dev  | path ends with `/feed/`                 |
/// | substack.com                 | path ends with `/feed`                  |
/// | tumblr.com                   | path is exactly `/rss`                  |
/// | medium.com                   | path starts with `/feed`                |
/// | blogspot.com                 | path is exactly `/feeds/posts/default`  |
///
/// Idempotent: a URL already in canonical feed form for its platform is
/// returned unchanged, trailing slashes included. Anything unparseable or
/// from an unknown host is returned unchanged.
pub fn translate(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_owned();
    };
    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return url.to_owned();
    };
    let path = parsed.path().to_owned();

    if host.ends_with("wordpress.com") || host.ends_with("bearblog.dev") {
        if !path.trim_end_matches('/').ends_with("/feed") {
            let stem = path.trim_matches('/');
            let feed_path = if stem.is_empty() {
                "/feed/".to_owned()
            } else {
                format!("/{stem}/feed/")
            };
            parsed.set_path(&feed_path);
            return parsed.to_string();
        }
    } else if host.ends_with("substack.com") {
        if !path.ends_with("/feed") {
            parsed.set_path(&format!("{}/feed", path.trim_end_matches('/')));
            return parsed.to_string();
        }
    } else if host.ends_with("tumblr.com") {
        if path != "/rss" {
            parsed.set_path("/rss");
            return parsed.to_string();
        }
    } else if host.ends_with("medium.com") {
        if !path.starts_with("/feed") {
            parsed.set_path(&format!("/feed{}", path.trim_end_matches('/')));
            return parsed.to_string();
        }
    } else if host.ends_with("blogspot.com") && path != "/feeds/posts/default" {
        parsed.set_path("/feeds/posts/default");
        return parsed.to_string();
    }

    url.to_owned()
}
