//! Utility functions for URL handling.
//!
//! Everything here operates on strings and parsed URLs only — no I/O. The
//! normalizer output is a comparison key for the crawl frontier, never a
//! fetchable address.

mod urls;

pub use urls::{normalize, parent_path, resolve, same_host, site_root};
