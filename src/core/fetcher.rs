//! Remote fetch primitive and the download-to-disk step.
//!
//! `Fetch` is the transport seam: one URL in, body bytes out. `HttpFetcher`
//! implements it on blocking reqwest. `Fetcher` sits on top and owns the
//! durable part: payload size validation and atomic write into the cache dir.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use crate::error::FetchError;

/// Bodies shorter than this are treated as failed downloads (error pages,
/// empty placeholders published before the real image).
pub const MIN_PAYLOAD_BYTES: usize = 1000;

/// Retrieve one remote resource.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// `Fetch` over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        trace!("GET {}", url);
        let response = self.client.get(url).send()?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Downloads resources into durable storage.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Fetch>,
    min_bytes: usize,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Fetch>) -> Self {
        Self {
            transport,
            min_bytes: MIN_PAYLOAD_BYTES,
        }
    }

    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    /// Fetch `url` and store the body at `dest`.
    ///
    /// The file only appears under its final name once fully written.
    /// Returns the body so the caller can decode without re-reading.
    pub fn download(&self, url: &str, dest: &Path) -> Result<Vec<u8>, FetchError> {
        let body = self.transport.fetch(url)?;
        if body.len() < self.min_bytes {
            return Err(FetchError::TooSmall {
                size: body.len(),
                min: self.min_bytes,
            });
        }
        write_atomic(dest, &body)?;
        debug!("Downloaded {} ({} bytes) -> {}", url, body.len(), dest.display());
        Ok(body)
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("min_bytes", &self.min_bytes)
            .finish_non_exhaustive()
    }
}

/// Hidden sibling used while a download is being written.
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.part", name))
}

/// Write to a hidden temp file, then rename over `dest`.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = partial_path(dest);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MockFetch;

    #[test]
    fn test_download_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockFetch::default());
        mock.insert("mock://a", vec![7u8; 2048]);
        let fetcher = Fetcher::new(mock.clone());

        let dest = dir.path().join("a.png");
        let body = fetcher.download("mock://a", &dest).unwrap();
        assert_eq!(body.len(), 2048);
        assert_eq!(fs::read(&dest).unwrap().len(), 2048);
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_undersized_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockFetch::default());
        mock.insert("mock://small", vec![1u8; 999]);
        let fetcher = Fetcher::new(mock);

        let dest = dir.path().join("small.png");
        let err = fetcher.download("mock://small", &dest).unwrap_err();
        assert!(matches!(err, FetchError::TooSmall { size: 999, min: 1000 }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_lowered_minimum_accepts_small_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockFetch::default());
        mock.insert("mock://tiny", vec![1u8; 64]);
        let fetcher = Fetcher::new(mock).with_min_bytes(10);

        let dest = dir.path().join("tiny.png");
        assert_eq!(fetcher.download("mock://tiny", &dest).unwrap().len(), 64);
        assert!(dest.is_file());

        let strict = fetcher.clone().with_min_bytes(65);
        let err = strict.download("mock://tiny", &dest).unwrap_err();
        assert!(matches!(err, FetchError::TooSmall { size: 64, min: 65 }));
    }

    #[test]
    fn test_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(Arc::new(MockFetch::default()));
        let err = fetcher.download("mock://none", &dir.path().join("x")).unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let p = partial_path(Path::new("/cache/2024-01-01_10-05_nl.png"));
        assert_eq!(p, PathBuf::from("/cache/.2024-01-01_10-05_nl.png.part"));
    }
}
