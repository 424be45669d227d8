//! Single-file resumable transfer.
//!
//! [`TusTransport`] speaks tus 1.0.0: POST creates an upload, PATCH appends
//! chunks from the server-acknowledged offset. Upload URLs are remembered per
//! (local, remote) pair so a retried transfer resumes instead of restarting.

use super::retry::{RetryPolicy, Sleeper};
use crate::config::{RemoteConfig, UploadConfig};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::Url;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const TUS_VERSION: &str = "1.0.0";

/// Text fragments that mark an error as a network blip worth retrying.
const TRANSIENT_MARKERS: [&str; 8] = [
    "ssl",
    "tls",
    "connection",
    "timeout",
    "timed out",
    "network",
    "refused",
    "reset",
];

/// How a failed upload is treated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network fault that outlived the local retries
    Transient,
    /// Remote path already holds content
    Conflict,
    /// Any other unrecoverable error
    Terminal,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Whether this looks like a network fault (reset, refused, timeout, TLS).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) if e.is_timeout() || e.is_connect() => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::BrokenPipe
            ),
            Self::Status { status, .. } if *status == 408 => true,
            _ => has_transient_marker(&self.to_string()),
        }
    }

    /// Classify a failure that was not (or no longer) retried.
    pub fn failure_kind(&self, forbidden_as_conflict: bool) -> FailureKind {
        if let Self::Status { status, .. } = self {
            match *status {
                409 => return FailureKind::Conflict,
                403 if forbidden_as_conflict => return FailureKind::Conflict,
                403 => return FailureKind::Terminal,
                _ => {}
            }
        }
        let text = self.to_string().to_lowercase();
        if text.contains("409") || text.contains("conflict") || text.contains("already exists") {
            FailureKind::Conflict
        } else if self.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Terminal
        }
    }
}

fn has_transient_marker(text: &str) -> bool {
    let text = text.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| text.contains(m))
}

/// Moves one local file to one remote object path.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), TransferError>;
}

/// Upload with transient-fault retry. Non-transient errors return at once.
pub async fn transfer_with_retry(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    local: &Path,
    remote: &str,
) -> Result<(), TransferError> {
    policy
        .run(sleeper, TransferError::is_transient, |_| transport.upload(local, remote))
        .await
}

/// tus client for a storage service's resumable upload endpoint.
pub struct TusTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    bucket: String,
    chunk_size: usize,
    /// Upload URLs of unfinished transfers, for resumption
    in_flight: Mutex<HashMap<(PathBuf, String), Url>>,
}

impl TusTransport {
    pub fn new(remote: &RemoteConfig, upload: &UploadConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(upload.request_timeout())
            .connect_timeout(std::time::Duration::from_secs(10))
            .pool_max_idle_per_host(upload.workers)
            .build()?;
        Self::with_client(client, remote, upload)
    }

    pub fn with_client(
        client: reqwest::Client,
        remote: &RemoteConfig,
        upload: &UploadConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            endpoint: Url::parse(&remote.resumable_endpoint())?,
            api_key: remote.api_key.clone(),
            bucket: remote.bucket.clone(),
            chunk_size: upload.chunk_size_bytes.max(1),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    fn base_headers(&self) -> Result<HeaderMap, TransferError> {
        let mut headers = HeaderMap::new();
        headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_VERSION));
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", self.api_key))?);
        headers.insert("apikey", header_value(&self.api_key)?);
        Ok(headers)
    }

    fn metadata(&self, remote: &str) -> String {
        let b64 = |v: &str| base64::engine::general_purpose::STANDARD.encode(v);
        [
            ("bucketName", self.bucket.as_str()),
            ("objectName", remote),
            ("contentType", "application/octet-stream"),
            ("cacheControl", "3600"),
        ]
        .iter()
        .map(|(k, v)| format!("{} {}", k, b64(v)))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn remembered(&self, key: &(PathBuf, String)) -> Option<Url> {
        self.in_flight.lock().ok()?.get(key).cloned()
    }

    fn remember(&self, key: (PathBuf, String), url: Url) {
        if let Ok(mut guard) = self.in_flight.lock() {
            guard.insert(key, url);
        }
    }

    fn forget(&self, key: &(PathBuf, String)) {
        if let Ok(mut guard) = self.in_flight.lock() {
            guard.remove(key);
        }
    }

    async fn create(&self, remote: &str, length: u64) -> Result<Url, TransferError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.base_headers()?)
            .header("Upload-Length", length.to_string())
            .header("Upload-Metadata", self.metadata(remote))
            .header("x-upsert", "false")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransferError::Protocol("upload creation returned no Location".into()))?;
        self.endpoint
            .join(location)
            .map_err(|e| TransferError::Protocol(format!("bad Location {location}: {e}")))
    }

    /// Ask the server how much of an upload it already holds.
    async fn offset(&self, url: &Url) -> Result<u64, TransferError> {
        let response = self
            .client
            .head(url.clone())
            .headers(self.base_headers()?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        upload_offset(response.headers())
    }

    async fn send_chunks(&self, local: &Path, url: &Url, mut offset: u64, length: u64) -> Result<(), TransferError> {
        let io_err = |source| TransferError::Io {
            path: local.display().to_string(),
            source,
        };
        let mut file = tokio::fs::File::open(local).await.map_err(io_err)?;

        while offset < length {
            let size = (length - offset).min(self.chunk_size as u64) as usize;
            let mut chunk = vec![0u8; size];
            file.seek(std::io::SeekFrom::Start(offset)).await.map_err(io_err)?;
            file.read_exact(&mut chunk).await.map_err(io_err)?;

            let response = self
                .client
                .patch(url.clone())
                .headers(self.base_headers()?)
                .header(CONTENT_TYPE, "application/offset+octet-stream")
                .header("Upload-Offset", offset.to_string())
                .body(chunk)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(status_error(response).await);
            }

            let acknowledged = upload_offset(response.headers())?;
            if acknowledged <= offset {
                return Err(TransferError::Protocol(format!(
                    "server did not advance past offset {offset}"
                )));
            }
            offset = acknowledged;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TusTransport {
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), TransferError> {
        let length = tokio::fs::metadata(local)
            .await
            .map_err(|source| TransferError::Io {
                path: local.display().to_string(),
                source,
            })?
            .len();
        tracing::debug!("Uploading {} ({:.2} MB) to {}", local.display(), length as f64 / (1024.0 * 1024.0), remote);

        let key = (local.to_path_buf(), remote.to_string());
        let (url, offset) = match self.remembered(&key) {
            Some(url) => match self.offset(&url).await {
                Ok(offset) => (url, offset),
                Err(TransferError::Status { status: 404 | 410, .. }) => {
                    (self.create(remote, length).await?, 0)
                }
                Err(e) => return Err(e),
            },
            None => (self.create(remote, length).await?, 0),
        };
        self.remember(key.clone(), url.clone());

        self.send_chunks(local, &url, offset, length).await?;
        self.forget(&key);
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransferError> {
    HeaderValue::from_str(value).map_err(|e| TransferError::Protocol(format!("invalid header value: {e}")))
}

fn upload_offset(headers: &HeaderMap) -> Result<u64, TransferError> {
    headers
        .get("Upload-Offset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| TransferError::Protocol("missing Upload-Offset header".into()))
}

async fn status_error(response: reqwest::Response) -> TransferError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransferError::Status { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, body: &str) -> TransferError {
        TransferError::Status {
            status: code,
            body: body.to_string(),
        }
    }

    #[test]
    fn conflict_detection() {
        assert_eq!(status(409, "").failure_kind(false), FailureKind::Conflict);
        assert_eq!(
            status(400, r#"{"error":"Duplicate","message":"The resource already exists"}"#).failure_kind(false),
            FailureKind::Conflict
        );
        assert_eq!(
            TransferError::Protocol("upload conflict".into()).failure_kind(false),
            FailureKind::Conflict
        );
    }

    #[test]
    fn forbidden_classification_follows_flag() {
        assert_eq!(status(403, "denied").failure_kind(false), FailureKind::Terminal);
        assert_eq!(status(403, "denied").failure_kind(true), FailureKind::Conflict);
    }

    #[test]
    fn transient_by_text_and_kind() {
        assert!(TransferError::Protocol("SSL handshake failed".into()).is_transient());
        assert!(status(502, "connection reset by peer").is_transient());
        assert!(status(408, "").is_transient());
        assert!(TransferError::Io {
            path: "f".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        }
        .is_transient());
        assert!(!status(500, "internal").is_transient());
        assert!(!TransferError::Io {
            path: "f".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .is_transient());
    }

    #[test]
    fn exhausted_transient_classifies_as_transient() {
        assert_eq!(
            TransferError::Protocol("network unreachable".into()).failure_kind(false),
            FailureKind::Transient
        );
        assert_eq!(status(500, "boom").failure_kind(false), FailureKind::Terminal);
    }
}
