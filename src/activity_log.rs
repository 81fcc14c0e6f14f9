//
// Activity logger (§4.6)
//
// Fire-and-forget: failures are logged to the operator channel and never
// propagate to the caller, mirroring the teacher's fire-and-forget webhook
// dispatches.
//
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::decision;
use crate::domain::ActivityLogEntry;
use crate::error::Error;
use crate::store::BlobStore;
use crate::util::now_millis;

pub struct ActivityLogger {
    cache: Arc<CacheManager>,
    store: Arc<BlobStore>,
}

impl ActivityLogger {
    pub fn new(cache: Arc<CacheManager>, store: Arc<BlobStore>) -> Self {
        Self { cache, store }
    }

    /// `logActivity(appId, email, feature)` (§4.6). No-op unless `appId`
    /// classifies as organization-owned.
    pub async fn log_activity(&self, app_id: &str, email: &str, feature: &str) {
        let ids = [app_id.to_string()];
        let apps = match self.cache.get_apps(&ids).await {
            Ok(apps) => apps,
            Err(e) => {
                error!("activity log lookup failed for {app_id}: {e:?}");
                return;
            }
        };

        let Some(entry) = apps.apps.get(app_id) else {
            return;
        };
        if !decision::is_organization(entry) {
            return;
        }
        let Some(owner_id) = &entry.owner_id else {
            return;
        };

        let log_entry = ActivityLogEntry {
            app_id: app_id.to_string(),
            timestamp: now_millis(),
            email: email.trim().to_lowercase(),
            feature: feature.to_string(),
        };

        if let Err(e) = self.append_batch(owner_id, vec![log_entry]).await {
            error!("activity log append failed for org {owner_id}: {e:?}");
        }
    }

    /// `logTouchActivity(appIds, email, feature)` (§4.6). Groups organization
    /// apps by owner and writes each org's batch in parallel with one shared
    /// timestamp across the whole call. Empty `app_ids` is a no-op.
    pub async fn log_touch_activity(&self, app_ids: &[String], email: &str, feature: &str) {
        if app_ids.is_empty() {
            return;
        }

        let apps = match self.cache.get_apps(app_ids).await {
            Ok(apps) => apps,
            Err(e) => {
                error!("activity log lookup failed for {app_ids:?}: {e:?}");
                return;
            }
        };

        let timestamp = now_millis();
        let email_lower = email.trim().to_lowercase();

        let mut by_org: HashMap<String, Vec<ActivityLogEntry>> = HashMap::new();
        for app_id in app_ids {
            let Some(entry) = apps.apps.get(app_id) else { continue };
            if !decision::is_organization(entry) {
                continue;
            }
            let Some(owner_id) = &entry.owner_id else { continue };

            by_org.entry(owner_id.clone()).or_default().push(ActivityLogEntry {
                app_id: app_id.clone(),
                timestamp,
                email: email_lower.clone(),
                feature: feature.to_string(),
            });
        }

        let writes = by_org.into_iter().map(|(owner_id, batch)| async move {
            if let Err(e) = self.append_batch(&owner_id, batch).await {
                error!("activity log append failed for org {owner_id}: {e:?}");
            }
        });

        futures::future::join_all(writes).await;
    }

    async fn append_batch(&self, owner_id: &str, batch: Vec<ActivityLogEntry>) -> Result<(), Error> {
        let path = format!("logs://{owner_id}_featureLog.json");
        self.store
            .optimistic_update::<Vec<ActivityLogEntry>, _, _>(&path, Vec::new(), move |list| {
                list.extend(batch.iter().cloned());
            })
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AppEntry, AppsCacheBlob};

    fn tempdir(label: &str) -> String {
        let suffix = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("clock").as_nanos();
        let dir = std::env::temp_dir().join(format!("ninjacore-activity-log-{label}-{suffix}"));
        std::fs::create_dir_all(&dir).expect("create tempdir");
        dir.to_string_lossy().into_owned()
    }

    fn harness(dir: &str) -> (Arc<BlobStore>, ActivityLogger) {
        let store = Arc::new(BlobStore::at(dir).expect("store"));
        let cache = Arc::new(CacheManager::new(Arc::clone(&store)));
        let logger = ActivityLogger::new(cache, Arc::clone(&store));
        (store, logger)
    }

    #[tokio::test]
    async fn log_activity_is_a_noop_for_non_organization_apps() {
        let dir = tempdir("noop");
        let (store, logger) = harness(&dir);

        // app-a is sponsored, not organization-owned.
        store
            .optimistic_update("system://cache/apps.json", AppsCacheBlob::default(), |blob| {
                blob.apps.insert(
                    "app-a".to_string(),
                    AppEntry {
                        sponsored: true,
                        ..Default::default()
                    },
                );
            })
            .await
            .expect("seed apps cache");

        logger.log_activity("app-a", "dev@x.io", "export").await;

        let log: Option<Vec<ActivityLogEntry>> = store.read("logs://org1_featureLog.json").await.expect("read log");
        assert!(log.is_none(), "no owner id on a sponsored app means nothing to append to");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn log_activity_appends_for_organization_owned_apps() {
        let dir = tempdir("append");
        let (store, logger) = harness(&dir);

        store
            .optimistic_update("system://cache/apps.json", AppsCacheBlob::default(), |blob| {
                blob.apps.insert(
                    "app-a".to_string(),
                    AppEntry {
                        owner_id: Some("org1".to_string()),
                        ..Default::default()
                    },
                );
            })
            .await
            .expect("seed apps cache");

        logger.log_activity("app-a", "Dev@X.io", "export").await;

        let log: Vec<ActivityLogEntry> = store.read("logs://org1_featureLog.json").await.expect("read log").expect("entry present");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].app_id, "app-a");
        assert_eq!(log[0].email, "dev@x.io");
        assert_eq!(log[0].feature, "export");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn log_touch_activity_batches_by_owner_with_a_shared_timestamp() {
        let dir = tempdir("touch");
        let (store, logger) = harness(&dir);

        store
            .optimistic_update("system://cache/apps.json", AppsCacheBlob::default(), |blob| {
                blob.apps.insert(
                    "app-a".to_string(),
                    AppEntry {
                        owner_id: Some("org1".to_string()),
                        ..Default::default()
                    },
                );
                blob.apps.insert(
                    "app-b".to_string(),
                    AppEntry {
                        owner_id: Some("org1".to_string()),
                        ..Default::default()
                    },
                );
                blob.apps.insert(
                    "app-c".to_string(),
                    AppEntry {
                        emails: Some(vec!["personal@x.io".to_string()]),
                        ..Default::default()
                    },
                );
            })
            .await
            .expect("seed apps cache");

        let app_ids = vec!["app-a".to_string(), "app-b".to_string(), "app-c".to_string()];
        logger.log_touch_activity(&app_ids, "dev@x.io", "sync").await;

        let log: Vec<ActivityLogEntry> = store.read("logs://org1_featureLog.json").await.expect("read log").expect("entries present");
        assert_eq!(log.len(), 2, "only the two organization-owned apps produce entries");
        assert_eq!(log[0].timestamp, log[1].timestamp, "one call shares a single timestamp across its batch");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn log_touch_activity_is_a_noop_for_empty_app_ids() {
        let dir = tempdir("empty");
        let (store, logger) = harness(&dir);

        logger.log_touch_activity(&[], "dev@x.io", "sync").await;

        let log: Option<Vec<ActivityLogEntry>> = store.read("logs://org1_featureLog.json").await.expect("read log");
        assert!(log.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
