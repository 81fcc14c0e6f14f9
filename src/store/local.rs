use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use data_encoding::HEXLOWER;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{BlobBackend, WriteOutcome};

/// Local-filesystem blob backend. A plain filesystem has no atomic
/// compare-and-swap primitive, so optimistic concurrency is simulated with a
/// per-path in-process mutex (teacher's `dashmap` dependency, repurposed here
/// from a shared lookup table into a lock registry) plus a content hash as
/// the version tag. This only serializes writers within one process — the
/// same simplification the teacher's local filesystem backend makes relative
/// to its S3 counterpart.
pub(crate) struct LocalBackend {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalBackend {
    pub fn new(root: &str) -> std::io::Result<Self> {
        Ok(Self {
            root: PathBuf::from(root),
            locks: DashMap::new(),
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    async fn read_file(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::File::open(path).await {
            Ok(mut file) => {
                let mut buffer = Vec::new();
                file.read_to_end(&mut buffer).await?;
                Ok(Some(buffer))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn version_of(bytes: &[u8]) -> String {
        let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
        HEXLOWER.encode(digest.as_ref())
    }
}

impl BlobBackend for LocalBackend {
    async fn read_raw(&self, path: &str) -> std::io::Result<Option<(Vec<u8>, String)>> {
        let full = self.resolve(path);
        Ok(Self::read_file(&full).await?.map(|bytes| {
            let version = Self::version_of(&bytes);
            (bytes, version)
        }))
    }

    async fn write_raw(&self, path: &str, buf: &[u8], expected_version: Option<&str>) -> std::io::Result<WriteOutcome> {
        let full = self.resolve(path);
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let current = Self::read_file(&full).await?;
        let current_version = current.as_deref().map(Self::version_of);

        if current_version.as_deref() != expected_version {
            return Ok(WriteOutcome::Conflict);
        }

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = full.with_extension("tmp");
        let mut file = tokio::fs::OpenOptions::new().create(true).truncate(true).write(true).open(&tmp).await?;
        file.write_all(buf).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &full).await?;

        Ok(WriteOutcome::Written {
            version: Self::version_of(buf),
        })
    }
}
