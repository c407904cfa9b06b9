//! Bounded retrieval of bulletin and signature files.
//!
//! Every retrieval is a metadata-only request followed by a full request,
//! each under its own time bound. The size ceiling is checked against the
//! advertised length before any body is requested, and again against the
//! bytes actually received.

use chrono::{DateTime, Utc};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest bulletin or signature we are willing to download.
pub const MAX_DOWNLOAD_BYTES: u64 = 4000;

/// Time bound applied to each network step.
pub const STEP_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{url} is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },
    #[error("Timed out fetching {0}")]
    Timeout(String),
    #[error("Transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("{0} has no usable Last-Modified header")]
    MissingLastModified(String),
}

/// Failure of a single request as reported by a [`Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    pub body: Vec<u8>,
}

/// Minimal HTTP surface needed by [`Fetcher`].
///
/// Implementations must give up on a request once their time bound has
/// elapsed and report [`TransportError::Timeout`]; a late response is never
/// returned to the caller.
pub trait Transport {
    /// Metadata-only request. The returned body is empty.
    fn head(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// Full request. At most `limit` bytes of the body are read.
    fn get(&self, url: &str, limit: u64) -> Result<HttpResponse, TransportError>;
}

/// Body and version stamp of one downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub body: Vec<u8>,
    pub last_modified: Option<DateTime<Utc>>,
}

pub struct Fetcher<T: Transport> {
    transport: T,
    max_bytes: u64,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T) -> Self {
        Fetcher {
            transport,
            max_bytes: MAX_DOWNLOAD_BYTES,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Download `url` unless it is advertised (or turns out) to be larger
    /// than the size ceiling.
    pub fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let head = self
            .transport
            .head(url)
            .map_err(|e| Self::map_transport_error(url, e))?;
        Self::require_success(url, head.status)?;

        if let Some(size) = head.content_length
            && size > self.max_bytes
        {
            warn!("{} advertises {} bytes, not downloading it", url, size);
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                size,
                limit: self.max_bytes,
            });
        }

        // One byte past the limit is enough to tell that the server lied.
        let response = self
            .transport
            .get(url, self.max_bytes + 1)
            .map_err(|e| Self::map_transport_error(url, e))?;
        Self::require_success(url, response.status)?;

        let size = response.body.len() as u64;
        if size > self.max_bytes {
            warn!("{} sent more than {} bytes, discarding it", url, self.max_bytes);
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                size,
                limit: self.max_bytes,
            });
        }

        let last_modified = response.last_modified.as_deref().and_then(parse_http_date);
        debug!(
            "Fetched {} ({} bytes, Last-Modified {:?})",
            url, size, last_modified
        );

        Ok(Fetched {
            body: response.body,
            last_modified,
        })
    }

    fn require_success(url: &str, status: u16) -> Result<(), FetchError> {
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(FetchError::Transport {
                url: url.to_string(),
                reason: format!("HTTP status {status}"),
            })
        }
    }

    fn map_transport_error(url: &str, error: TransportError) -> FetchError {
        match error {
            TransportError::Timeout => FetchError::Timeout(url.to_string()),
            other => FetchError::Transport {
                url: url.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Parse an HTTP date such as `Wed, 21 Oct 2015 07:28:00 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// [`Transport`] backed by a blocking `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("alertwatch/", env!("CARGO_PKG_VERSION")))
            .build();
        UreqTransport { agent }
    }

    fn convert(response: ureq::Response, limit: Option<u64>) -> Result<HttpResponse, TransportError> {
        let status = response.status();
        let content_length = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok());
        let last_modified = response.header("Last-Modified").map(str::to_string);

        let mut body = Vec::new();
        if let Some(limit) = limit {
            response
                .into_reader()
                .take(limit)
                .read_to_end(&mut body)
                .map_err(|e| {
                    if is_timeout_io(&e) {
                        TransportError::Timeout
                    } else {
                        TransportError::Other(e.to_string())
                    }
                })?;
        }

        Ok(HttpResponse {
            status,
            content_length,
            last_modified,
            body,
        })
    }

    fn map_error(error: ureq::Error) -> TransportError {
        match error {
            ureq::Error::Status(code, _) => TransportError::Status(code),
            ureq::Error::Transport(transport) => {
                if is_timeout_transport(&transport) {
                    TransportError::Timeout
                } else {
                    TransportError::Other(transport.to_string())
                }
            }
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        UreqTransport::new(STEP_TIMEOUT)
    }
}

impl Transport for UreqTransport {
    fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.agent.head(url).call().map_err(Self::map_error)?;
        Self::convert(response, None)
    }

    fn get(&self, url: &str, limit: u64) -> Result<HttpResponse, TransportError> {
        let response = self.agent.get(url).call().map_err(Self::map_error)?;
        Self::convert(response, Some(limit))
    }
}

fn is_timeout_io(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

fn is_timeout_transport(error: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && is_timeout_io(io)
        {
            return true;
        }
        source = err.source();
    }
    false
}
