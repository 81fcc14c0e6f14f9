//
// Unknown-user logger (§4.5)
//
use std::sync::Arc;

use crate::domain::UnknownUserAttempt;
use crate::error::Error;
use crate::store::BlobStore;
use crate::util::now_millis;

pub struct UnknownUserLogger {
    store: Arc<BlobStore>,
}

impl UnknownUserLogger {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store }
    }

    /// Appends an attempt and returns the earliest recorded timestamp for
    /// `email` within `orgId` (§4.5) — the source of truth for first-seen.
    /// Duplicates are permitted; there is no dedup.
    pub async fn log_attempt(&self, app_id: &str, email: &str, org_id: &str) -> Result<i64, Error> {
        let path = format!("logs://{org_id}_unknown.json");
        let email_lower = email.trim().to_lowercase();

        let entry = UnknownUserAttempt {
            timestamp: now_millis(),
            email: email_lower.clone(),
            app_id: app_id.to_string(),
        };

        let (list, _) = self
            .store
            .optimistic_update::<Vec<UnknownUserAttempt>, _, _>(&path, Vec::new(), move |list| {
                list.push(entry.clone());
            })
            .await?;

        list.iter()
            .filter(|a| a.email == email_lower)
            .map(|a| a.timestamp)
            .min()
            .ok_or_else(|| Error::new(format!("unknown-user log for {org_id} missing just-appended entry")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlobStore;

    #[tokio::test]
    async fn first_seen_is_the_minimum_timestamp_for_the_email() {
        let dir = tempfile_dir();
        let store = Arc::new(BlobStore::at(&dir).expect("store"));
        let logger = UnknownUserLogger::new(store);

        let first = logger.log_attempt("app-A", "User@X.io", "org_1").await.expect("first log");
        let second = logger.log_attempt("app-A", "user@x.io", "org_1").await.expect("second log");

        assert_eq!(first, second);

        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> String {
        format!("{}/ninjacore-test-{}", std::env::temp_dir().display(), std::process::id())
    }
}
