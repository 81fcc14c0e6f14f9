//
// Blob store façade (§4.1)
//
// Everything above this module works with typed Rust values; this is the
// only place that touches actual bytes. Backend selection mirrors the
// teacher's `persistent_fs` module: the configured data folder's URL scheme
// picks `Local` or `S3`, both implementing the same `BlobBackend` trait.
//
mod local;
#[cfg(feature = "s3")]
mod s3;
#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod counting;

#[cfg(any(test, feature = "test-utils"))]
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CONFIG;
use crate::error::Error;
use crate::util::retry_async;

/// Result of a conditional write attempt (§4.1's "version tag threaded
/// through read/write").
pub(crate) enum WriteOutcome {
    Written { version: String },
    Conflict,
}

/// A backend that can read and conditionally write whole blobs, addressed by
/// an opaque path string (`"apps/cache.json"`, `"logs/{org}_unknown.json"`, …).
///
/// `expected_version` is `None` to mean "path must not already exist" and
/// `Some(tag)` to mean "path must currently be at this tag" — the same
/// optimistic-concurrency contract regardless of backend.
pub(crate) trait BlobBackend: Send + Sync {
    async fn read_raw(&self, path: &str) -> std::io::Result<Option<(Vec<u8>, String)>>;
    async fn write_raw(&self, path: &str, buf: &[u8], expected_version: Option<&str>) -> std::io::Result<WriteOutcome>;
}

enum Backend {
    Local(local::LocalBackend),
    #[cfg(feature = "s3")]
    S3(s3::S3Backend),
    // Test-only hook: lets cache tests inject a backend that counts reads,
    // without teaching `BlobStore` itself to be generic over `BlobBackend`
    // (§5 "setTTL / clear are test-only hooks", same spirit).
    #[cfg(any(test, feature = "test-utils"))]
    Counting(std::sync::Arc<counting::CountingBackend>),
}

impl Backend {
    fn new(location: &str) -> std::io::Result<Self> {
        #[cfg(feature = "s3")]
        if let Some(bucket_and_prefix) = location.strip_prefix("s3://") {
            return Ok(Backend::S3(s3::S3Backend::new(bucket_and_prefix)));
        }

        Ok(Backend::Local(local::LocalBackend::new(location)?))
    }

    async fn read_raw(&self, path: &str) -> std::io::Result<Option<(Vec<u8>, String)>> {
        match self {
            Backend::Local(b) => b.read_raw(path).await,
            #[cfg(feature = "s3")]
            Backend::S3(b) => b.read_raw(path).await,
            #[cfg(any(test, feature = "test-utils"))]
            Backend::Counting(b) => b.read_raw(path).await,
        }
    }

    async fn write_raw(&self, path: &str, buf: &[u8], expected_version: Option<&str>) -> std::io::Result<WriteOutcome> {
        match self {
            Backend::Local(b) => b.write_raw(path, buf, expected_version).await,
            #[cfg(feature = "s3")]
            Backend::S3(b) => b.write_raw(path, buf, expected_version).await,
            #[cfg(any(test, feature = "test-utils"))]
            Backend::Counting(b) => b.write_raw(path, buf, expected_version).await,
        }
    }
}

/// Typed façade over a `Backend`. The cache manager and loggers only ever
/// see this, never raw bytes or version tags.
pub struct BlobStore {
    backend: Backend,
}

impl BlobStore {
    pub fn new() -> std::io::Result<Self> {
        Self::at(&CONFIG.data_folder())
    }

    /// Builds a store rooted at an explicit location rather than `CONFIG`'s
    /// data folder — used by tests so they don't race the process-wide
    /// `CONFIG` static across the env var it's loaded from.
    pub fn at(location: &str) -> std::io::Result<Self> {
        Ok(Self {
            backend: Backend::new(location)?,
        })
    }

    /// Wraps a read-counting in-memory backend — used by `cache.rs`'s
    /// single-flight and miss-driven-refresh tests (§8.1).
    #[cfg(any(test, feature = "test-utils"))]
    pub(crate) fn counting(backend: std::sync::Arc<counting::CountingBackend>) -> Self {
        Self {
            backend: Backend::Counting(backend),
        }
    }

    /// Reads and deserializes the blob at `path`, or `None` if it doesn't exist.
    pub async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, Error> {
        let raw = self.read_with_version(path).await?;
        raw.map(|(value, _)| value).transpose()
    }

    async fn read_with_version<T: DeserializeOwned>(&self, path: &str) -> Result<Option<(Result<T, Error>, String)>, Error> {
        let timeout = CONFIG.storage_timeout();
        let read = tokio::time::timeout(timeout, self.backend.read_raw(path))
            .await
            .map_err(|_| Error::from(timeout_error()).with_msg(format!("timed out reading {path}")))?
            .map_err(|e| Error::from(e).with_msg(format!("failed to read {path}")))?;

        Ok(read.map(|(bytes, version)| {
            let parsed = serde_json::from_slice::<T>(&bytes).map_err(|e| Error::from(e).with_msg(format!("malformed blob at {path}")));
            (parsed, version)
        }))
    }

    /// Reads the blob at `path` (or starts from `default` if absent), applies
    /// `transform` to produce a mutated value plus an arbitrary result `R`,
    /// then writes it back conditioned on the version observed at read time.
    /// On a conflicting write, `transform` is re-run from scratch against a
    /// fresh read — it must be safe to call more than once.
    pub async fn optimistic_update<T, F, R>(&self, path: &str, default: T, transform: F) -> Result<(T, R), Error>
    where
        T: Serialize + DeserializeOwned + Clone + Send,
        F: Fn(&mut T) -> R,
        R: Send,
    {
        let max_tries = CONFIG.storage_max_retries();
        let mut tries = 0;

        loop {
            let existing = self.read_with_version::<T>(path).await?;
            let (mut value, expected_version) = match existing {
                Some((parsed, version)) => (parsed?, Some(version)),
                None => (default.clone(), None),
            };

            let result = transform(&mut value);
            let bytes = serde_json::to_vec(&value).map_err(|e| Error::from(e).with_msg(format!("failed to encode {path}")))?;

            let timeout = CONFIG.storage_timeout();
            let outcome = tokio::time::timeout(timeout, self.backend.write_raw(path, &bytes, expected_version.as_deref()))
                .await
                .map_err(|_| Error::from(timeout_error()).with_msg(format!("timed out writing {path}")))?
                .map_err(|e| Error::from(e).with_msg(format!("failed to write {path}")))?;

            match outcome {
                WriteOutcome::Written { .. } => return Ok((value, result)),
                WriteOutcome::Conflict => {
                    tries += 1;
                    if tries >= max_tries {
                        return Err(Error::StorageContention(path.to_string(), String::new()));
                    }
                }
            }
        }
    }

    /// Convenience wrapper used by callers that only care about retrying the
    /// whole read+transform+write attempt with a fixed backoff (e.g. startup
    /// reachability probes), rather than the version-conditioned loop above.
    pub async fn with_retries<F, Fut, T>(func: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        retry_async(func, CONFIG.storage_max_retries()).await
    }
}

fn timeout_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "blob store operation timed out")
}
