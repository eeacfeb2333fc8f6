//! Fetching the raw statistics payload.
//!
//! The scrape URI selects the strategy:
//! - `http://` and `https://`: GET request, any non-2xx status is a failure
//! - `file://`: read a local file, mostly useful for testing
//! - `unix:`: send `show stat` on the HAProxy stats socket
//!
//! Every fetch is bounded by the target's timeout. Nothing is retried.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;

use crate::error::{ExporterError, Result, TransportError};

#[cfg(unix)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tokio::time::Instant;

/// Command written to the stats socket.
pub const SHOW_STAT_COMMAND: &[u8] = b"show stat\n";

#[cfg(unix)]
const READ_BUFFER_SIZE: usize = 8192;

/// Supported URI schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    File,
    Unix,
}

impl Scheme {
    pub fn parse(scheme: &str) -> Result<Self> {
        match scheme {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "file" => Ok(Self::File),
            "unix" => Ok(Self::Unix),
            other => Err(ExporterError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// A validated scrape URI with its fetch settings.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    uri: String,
    url: Url,
    scheme: Scheme,
    ssl_verify: bool,
    timeout: Duration,
}

impl ScrapeTarget {
    /// Parse and validate a scrape URI.
    ///
    /// Fails on malformed URIs and on schemes outside the supported set.
    pub fn new(uri: impl Into<String>, ssl_verify: bool, timeout: Duration) -> Result<Self> {
        let uri = uri.into();
        let url = Url::parse(&uri).map_err(|e| ExporterError::InvalidUri {
            uri: uri.clone(),
            message: e.to_string(),
        })?;
        let scheme = Scheme::parse(url.scheme())?;

        Ok(Self {
            uri,
            url,
            scheme,
            ssl_verify,
            timeout,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn ssl_verify(&self) -> bool {
        self.ssl_verify
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Local path named by a `file:` or `unix:` URI.
    fn local_path(&self) -> Result<PathBuf> {
        self.url
            .to_file_path()
            .map_err(|_| ExporterError::InvalidUri {
                uri: self.uri.clone(),
                message: "expected an absolute local path".to_string(),
            })
    }
}

/// Fetch strategy resolved from a [`ScrapeTarget`].
#[derive(Debug, Clone)]
pub enum Transport {
    Http {
        client: reqwest::Client,
        url: Url,
        timeout: Duration,
    },
    File {
        path: PathBuf,
        timeout: Duration,
    },
    #[cfg(unix)]
    Unix {
        path: PathBuf,
        timeout: Duration,
    },
}

impl Transport {
    pub fn new(target: &ScrapeTarget) -> Result<Self> {
        match target.scheme {
            Scheme::Http | Scheme::Https => {
                let client = reqwest::Client::builder()
                    .timeout(target.timeout)
                    .danger_accept_invalid_certs(!target.ssl_verify)
                    .build()
                    .map_err(ExporterError::HttpClient)?;
                Ok(Self::Http {
                    client,
                    url: target.url.clone(),
                    timeout: target.timeout,
                })
            }
            Scheme::File => Ok(Self::File {
                path: target.local_path()?,
                timeout: target.timeout,
            }),
            #[cfg(unix)]
            Scheme::Unix => Ok(Self::Unix {
                path: target.local_path()?,
                timeout: target.timeout,
            }),
            #[cfg(not(unix))]
            Scheme::Unix => Err(ExporterError::UnixUnsupported),
        }
    }

    /// Start one exchange and return the payload stream.
    ///
    /// Succeeds once the source has started answering: for HTTP when the
    /// response headers arrived with a 2xx status, for the socket when the
    /// first read completed.
    pub async fn fetch(&self) -> std::result::Result<StatsBody, TransportError> {
        match self {
            Self::Http {
                client,
                url,
                timeout,
            } => {
                let response = client.get(url.clone()).send().await.map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout(*timeout)
                    } else {
                        TransportError::Http(e)
                    }
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TransportError::Status(status.as_u16()));
                }
                Ok(StatsBody {
                    inner: BodyInner::Http(response),
                })
            }
            Self::File { path, timeout } => {
                let payload = tokio::time::timeout(*timeout, tokio::fs::read(path))
                    .await
                    .map_err(|_| TransportError::Timeout(*timeout))??;
                Ok(StatsBody::from_bytes(payload))
            }
            #[cfg(unix)]
            Self::Unix { path, timeout } => fetch_unix(path, *timeout).await,
        }
    }
}

#[cfg(unix)]
async fn fetch_unix(
    path: &std::path::Path,
    timeout: Duration,
) -> std::result::Result<StatsBody, TransportError> {
    let deadline = Instant::now() + timeout;
    let expired = move |_: tokio::time::error::Elapsed| TransportError::Timeout(timeout);

    let mut stream = tokio::time::timeout_at(deadline, UnixStream::connect(path))
        .await
        .map_err(expired)??;
    tokio::time::timeout_at(deadline, stream.write_all(SHOW_STAT_COMMAND))
        .await
        .map_err(expired)??;

    let mut buffer = vec![0; READ_BUFFER_SIZE];
    let n = tokio::time::timeout_at(deadline, stream.read(&mut buffer))
        .await
        .map_err(expired)??;
    buffer.truncate(n);

    Ok(StatsBody {
        inner: BodyInner::Unix {
            stream,
            deadline,
            timeout,
            first: (n > 0).then(|| Bytes::from(buffer)),
            done: n == 0,
        },
    })
}

/// The payload of a successful fetch, read chunk by chunk.
#[derive(Debug)]
pub struct StatsBody {
    inner: BodyInner,
}

#[derive(Debug)]
enum BodyInner {
    Http(reqwest::Response),
    Buffered(Option<Bytes>),
    #[cfg(unix)]
    Unix {
        stream: UnixStream,
        deadline: Instant,
        timeout: Duration,
        first: Option<Bytes>,
        done: bool,
    },
}

impl StatsBody {
    /// A body that yields an in-memory payload.
    pub fn from_bytes(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            inner: BodyInner::Buffered((!payload.is_empty()).then_some(payload)),
        }
    }

    /// Next chunk of the payload, `None` at the end.
    ///
    /// An error here means the stream broke after it had started.
    pub async fn chunk(&mut self) -> std::result::Result<Option<Bytes>, TransportError> {
        match &mut self.inner {
            BodyInner::Http(response) => Ok(response.chunk().await?),
            BodyInner::Buffered(payload) => Ok(payload.take()),
            #[cfg(unix)]
            BodyInner::Unix {
                stream,
                deadline,
                timeout,
                first,
                done,
            } => {
                if let Some(first) = first.take() {
                    return Ok(Some(first));
                }
                if *done {
                    return Ok(None);
                }

                let mut buffer = vec![0; READ_BUFFER_SIZE];
                let n = tokio::time::timeout_at(*deadline, stream.read(&mut buffer))
                    .await
                    .map_err(|_| TransportError::Timeout(*timeout))??;
                if n == 0 {
                    *done = true;
                    return Ok(None);
                }
                buffer.truncate(n);
                Ok(Some(Bytes::from(buffer)))
            }
        }
    }
}
