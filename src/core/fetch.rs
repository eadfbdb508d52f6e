//! Retrieval of the two rule documents
//!
//! Sources are either HTTP(S) URLs or local files (`file:///path` or a plain
//! path). Bytes are returned exactly as received; nothing is parsed here.

use crate::core::error::{Error, Result};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// User-Agent for document requests
pub const USER_AGENT: &str = concat!("ufwsync/", env!("CARGO_PKG_VERSION"));

/// Both documents of one sync cycle, as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocuments {
    pub ports: Vec<u8>,
    pub blocklist: Vec<u8>,
}

/// Source of document bytes.
///
/// Implemented over HTTP for production and by in-memory fakes in tests.
pub trait Fetcher {
    /// Retrieves one source in full.
    ///
    /// # Errors
    ///
    /// Returns `Error::Fetch` on any transport failure, timeout or non-success status.
    fn fetch(&self, source: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Fetches both documents; fails as a whole if either one fails.
///
/// # Errors
///
/// Returns the first `Error::Fetch` encountered. No partial result is returned.
pub async fn fetch_documents<F: Fetcher>(
    fetcher: &F,
    ports_source: &str,
    blocklist_source: &str,
) -> Result<FetchedDocuments> {
    let (ports, blocklist) = tokio::try_join!(
        fetcher.fetch(ports_source),
        fetcher.fetch(blocklist_source)
    )
    .inspect_err(|e| warn!("Document fetch failed, leaving firewall untouched: {e}"))?;

    info!(
        ports_bytes = ports.len(),
        blocklist_bytes = blocklist.len(),
        "Fetched rule documents"
    );

    Ok(FetchedDocuments { ports, blocklist })
}

/// Fetcher backed by a `reqwest` client with a bounded timeout
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_error = |message: String| Error::Fetch {
            source_url: url.to_string(),
            message,
        };

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                fetch_error("request timed out".to_string())
            } else {
                fetch_error(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("server returned HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_error(format!("failed reading body: {e}")))?;

        Ok(body.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        debug!("Fetching {source}");
        match SourceKind::of(source) {
            SourceKind::Http => self.fetch_http(source).await,
            SourceKind::File(path) => read_local(source, path).await,
        }
    }
}

async fn read_local(source: &str, path: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| Error::Fetch {
        source_url: source.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum SourceKind<'a> {
    Http,
    File(&'a str),
}

impl<'a> SourceKind<'a> {
    fn of(source: &'a str) -> Self {
        let lower = source.get(..8).unwrap_or(source).to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::Http
        } else if let Some(path) = source.strip_prefix("file://") {
            SourceKind::File(path)
        } else {
            SourceKind::File(source)
        }
    }
}
