use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Config;

/// Errors that can occur during a single fetch.
///
/// The fetcher itself never retries; [`FetchError::is_transient`] tells the
/// caller which failures are worth retrying with backoff.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect loop).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// HTTP response with a non-success status code (304 excluded).
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit.
    #[error("response too large")]
    TooLarge,
}

impl FetchError {
    /// True for failures a retry-capable task executor should back off and
    /// retry: network faults, timeouts, rate limiting, and server errors.
    /// Client errors (4xx other than 429) are final.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::HttpStatus(status) => *status == 429 || *status >= 500,
            FetchError::TooLarge => false,
        }
    }
}

/// A single fetch to perform, with optional cache validators from a previous
/// response.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Sent verbatim as `If-None-Match` when present.
    pub etag: Option<String>,
    /// Sent verbatim as `If-Modified-Since` when present (HTTP-date format).
    pub last_modified: Option<String>,
}

impl FetchRequest {
    /// An unconditional request for `url`.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            etag: None,
            last_modified: None,
        }
    }
}

/// Normalized response envelope.
///
/// Redirects have already been followed: `url` is the final address and
/// `requested_url` the one asked for, so callers can update a stored
/// canonical URL when the two differ. `etag` and `last_modified` are the
/// response header values verbatim, ready to be persisted for the next
/// conditional request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub requested_url: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

impl FetchResponse {
    /// A `304 Not Modified` — a successful outcome meaning "unchanged".
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }

    /// True when the server redirected us somewhere else.
    pub fn redirected(&self) -> bool {
        self.url != self.requested_url
    }

    /// True when the response looks like an HTML document.
    ///
    /// The Content-Type header alone is not trustworthy — some servers label
    /// feeds `text/html` — so a body opening with an XML declaration is never
    /// classified as HTML.
    pub fn is_html(&self) -> bool {
        let labeled_html = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("html"));
        labeled_html && !body_starts_with_xml_decl(&self.body)
    }
}

fn body_starts_with_xml_decl(body: &[u8]) -> bool {
    let body = body.strip_prefix(b"\xef\xbb\xbf").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(0);
    body[start..].starts_with(b"<?xml")
}

/// HTTP fetcher over a shared connection pool.
///
/// One instance is created from [`Config`] at startup and passed by reference
/// into every operation — there is no process-wide client. The underlying
/// pool bounds keep-alive connections with an idle-expiry window so bulk runs
/// stay polite to downstream servers.
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body: usize,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_secs))
            .build()
            .map_err(FetchError::Network)?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_body: config.max_response_bytes,
        })
    }

    /// Performs one conditional GET.
    ///
    /// Redirects are followed transparently (the final URL lands in
    /// [`FetchResponse::url`]). A `304` is returned as a success with an
    /// empty body; any other non-2xx status is a [`FetchError::HttpStatus`].
    /// The body is stream-read under the configured size cap. No retries
    /// happen here — transient failures propagate for the caller's executor
    /// to back off on.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut headers = HeaderMap::new();
        if let Some(etag) = &request.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        if let Some(last_modified) = &request.last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        let response = tokio::time::timeout(
            self.timeout,
            self.client.get(&request.url).headers(headers).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

        let status = response.status();
        let final_url = response.url().to_string();
        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);
        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE)
            .map(|ct| ct.to_ascii_lowercase());

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse {
                status: status.as_u16(),
                url: final_url,
                requested_url: request.url.clone(),
                body: Vec::new(),
                etag,
                last_modified,
                content_type,
            });
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = read_limited_bytes(response, self.max_body).await?;

        Ok(FetchResponse {
            status: status.as_u16(),
            url: final_url,
            requested_url: request.url.clone(),
            body,
            etag,
            last_modified,
            content_type,
        })
    }

    /// Bounded-concurrency variant: runs every request with at most
    /// `max_concurrency` in flight and sends `(request, result)` pairs into
    /// `results` as they complete — completion order, not submission order.
    ///
    /// Returns once every request has been attempted. Dropping the receiver
    /// cancels the remaining work.
    pub async fn fetch_many(
        &self,
        requests: Vec<FetchRequest>,
        max_concurrency: usize,
        results: mpsc::Sender<(FetchRequest, Result<FetchResponse, FetchError>)>,
    ) {
        stream::iter(requests)
            .map(|request| {
                let results = results.clone();
                async move {
                    let outcome = self.fetch(&request).await;
                    if results.send((request, outcome)).await.is_err() {
                        tracing::debug!("fetch results receiver dropped");
                    }
                }
            })
            .buffer_unordered(max_concurrency.max(1))
            .for_each(|()| async {})
            .await;
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher() -> Fetcher {
        Fetcher::new(&Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_captures_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .insert_header("Content-Type", "application/rss+xml")
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Tue, 01 Mar 2022 00:00:00 GMT"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed.xml", mock_server.uri());
        let resp = test_fetcher().fetch(&FetchRequest::new(&url)).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"<rss/>");
        assert_eq!(resp.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            resp.last_modified.as_deref(),
            Some("Tue, 01 Mar 2022 00:00:00 GMT")
        );
        assert!(!resp.redirected());
    }

    #[tokio::test]
    async fn test_fetch_sends_conditional_headers_and_accepts_304() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .and(header("If-Modified-Since", "Tue, 01 Mar 2022 00:00:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&mock_server)
            .await;

        let request = FetchRequest {
            url: format!("{}/feed.xml", mock_server.uri()),
            etag: Some("\"v1\"".to_owned()),
            last_modified: Some("Tue, 01 Mar 2022 00:00:00 GMT".to_owned()),
        };
        let resp = test_fetcher().fetch(&request).await.unwrap();

        assert!(resp.not_modified());
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_reports_final_url_after_redirect() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "/new"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/old", mock_server.uri());
        let resp = test_fetcher().fetch(&FetchRequest::new(&url)).await.unwrap();

        assert!(resp.redirected());
        assert_eq!(resp.url, format!("{}/new", mock_server.uri()));
        assert_eq!(resp.requested_url, url);
    }

    #[tokio::test]
    async fn test_fetch_404_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let err = test_fetcher()
            .fetch(&FetchRequest::new(&url))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus(404)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_body_over_limit_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(128)))
            .mount(&mock_server)
            .await;

        let config = Config {
            max_response_bytes: 64,
            ..Config::default()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let url = format!("{}/big", mock_server.uri());
        let err = fetcher.fetch(&FetchRequest::new(&url)).await.unwrap_err();

        assert!(matches!(err, FetchError::TooLarge));
    }

    #[tokio::test]
    async fn test_transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::HttpStatus(503).is_transient());
        assert!(FetchError::HttpStatus(429).is_transient());
        assert!(!FetchError::HttpStatus(404).is_transient());
        assert!(!FetchError::TooLarge.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_many_bounded_pool_yields_all_results() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = test_fetcher();
        let requests = vec![
            FetchRequest::new(&format!("{}/ok", mock_server.uri())),
            FetchRequest::new(&format!("{}/gone", mock_server.uri())),
            FetchRequest::new(&format!("{}/ok", mock_server.uri())),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        fetcher.fetch_many(requests, 2, tx).await;

        let mut ok = 0;
        let mut failed = 0;
        while let Some((_, result)) = rx.recv().await {
            match result {
                Ok(_) => ok += 1,
                Err(_) => failed += 1,
            }
        }
        assert_eq!(ok, 2);
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_is_html_distrusts_headers_for_xml_bodies() {
        let resp = FetchResponse {
            status: 200,
            url: "https://example.com/feed".to_owned(),
            requested_url: "https://example.com/feed".to_owned(),
            body: b"\xef\xbb\xbf  <?xml version=\"1.0\"?><rss/>".to_vec(),
            etag: None,
            last_modified: None,
            content_type: Some("text/html".to_owned()),
        };
        assert!(!resp.is_html());

        let html = FetchResponse {
            body: b"<!doctype html><html></html>".to_vec(),
            ..resp
        };
        assert!(html.is_html());
    }
}
