//
// Test-only in-memory backend (§8.1's "single-flight", "miss-triggered
// refresh" invariants)
//
// A plain `HashMap` behind a `tokio::sync::Mutex`, with an atomic counter on
// `read_raw` so tests can assert exactly how many underlying reads a cache
// operation performed, and an optional artificial delay to widen the race
// window for concurrent single-flight callers.
//
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use data_encoding::HEXLOWER;
use tokio::sync::Mutex;

use super::{BlobBackend, WriteOutcome};

#[derive(Default)]
pub(crate) struct CountingBackend {
    reads: AtomicUsize,
    read_delay: Duration,
    data: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_read_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            read_delay: delay,
            ..Self::default()
        })
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn version_of(bytes: &[u8]) -> String {
        let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
        HEXLOWER.encode(digest.as_ref())
    }
}

impl BlobBackend for CountingBackend {
    async fn read_raw(&self, path: &str) -> std::io::Result<Option<(Vec<u8>, String)>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        Ok(self.data.lock().await.get(path).cloned())
    }

    async fn write_raw(&self, path: &str, buf: &[u8], expected_version: Option<&str>) -> std::io::Result<WriteOutcome> {
        let mut data = self.data.lock().await;
        let current_version = data.get(path).map(|(_, v)| v.as_str());

        if current_version != expected_version {
            return Ok(WriteOutcome::Conflict);
        }

        let version = Self::version_of(buf);
        data.insert(path.to_string(), (buf.to_vec(), version.clone()));
        Ok(WriteOutcome::Written { version })
    }
}
