//
// Cache manager (§4.3)
//
// One `Snapshot<T>` per cached blob (apps, org-members, settings). `blocked`
// is read fresh on every call and has no snapshot. Single-flight refresh is
// built on the teacher's `futures::future::Shared` dependency: a mutex guards
// both snapshot replacement and in-flight-future installation (§5, §9), and
// the snapshot write-back happens inside the shared future itself so it runs
// exactly once no matter how many callers attach to it.
//
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, RwLock};

use crate::config::CONFIG;
use crate::domain::{AppEntry, AppRecord, AppsCacheBlob, BlockedBlob, OrgMembers, OrgMembersBlob, OrganizationRecord, OrganizationsStore, SettingsBlob};
use crate::error::Error;
use crate::store::BlobStore;

const APPS_CACHE_PATH: &str = "system://cache/apps.json";
const APPS_MASTER_PATH: &str = "system://apps.json";
const ORG_MEMBERS_PATH: &str = "system://cache/org-members.json";
const BLOCKED_PATH: &str = "system://cache/blocked.json";
const SETTINGS_PATH: &str = "system://cache/settings.json";
const ORGANIZATIONS_PATH: &str = "system://organizations.json";

type RefreshFuture<T> = Shared<BoxFuture<'static, Result<Arc<T>, Arc<String>>>>;

struct SnapshotState<T> {
    value: Option<Arc<T>>,
    loaded_at: Option<Instant>,
}

impl<T> Default for SnapshotState<T> {
    fn default() -> Self {
        Self { value: None, loaded_at: None }
    }
}

/// A TTL snapshot of one cached blob, with single-flight refresh and
/// miss-driven invalidation (§4.3.1, §4.3.2).
struct Snapshot<T> {
    state: Arc<RwLock<SnapshotState<T>>>,
    inflight: Arc<Mutex<Option<RefreshFuture<T>>>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(SnapshotState::default())),
            inflight: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Send + Sync + 'static> Snapshot<T> {
    /// Returns a valid snapshot, refreshing (with single-flight coalescing)
    /// if the TTL has lapsed or `is_valid` rejects the cached value (the
    /// miss-driven refresh rule of §4.3.1).
    async fn get<Valid, Load, Fut>(&self, is_valid: Valid, load: Load) -> Result<Arc<T>, Error>
    where
        Valid: Fn(&T) -> bool,
        Load: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, Error>> + Send + 'static,
    {
        {
            let state = self.state.read().await;
            if let Some(value) = &state.value {
                let within_ttl = state.loaded_at.is_some_and(|t| t.elapsed() < CONFIG.cache_ttl());
                if within_ttl && is_valid(value) {
                    return Ok(Arc::clone(value));
                }
            }
        }

        self.refresh(load).await
    }

    async fn refresh<Load, Fut>(&self, load: Load) -> Result<Arc<T>, Error>
    where
        Load: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, Error>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().await;
            match &*inflight {
                Some(existing) => existing.clone(),
                None => {
                    let state = Arc::clone(&self.state);
                    let inflight_slot = Arc::clone(&self.inflight);

                    let fut: BoxFuture<'static, Result<Arc<T>, Arc<String>>> = Box::pin(async move {
                        let outcome = load().await;
                        let mut slot = inflight_slot.lock().await;
                        *slot = None;
                        drop(slot);

                        match outcome {
                            Ok(value) => {
                                let value = Arc::new(value);
                                let mut guard = state.write().await;
                                guard.value = Some(Arc::clone(&value));
                                guard.loaded_at = Some(Instant::now());
                                Ok(value)
                            }
                            Err(e) => Err(Arc::new(e.log_and_user_message())),
                        }
                    });

                    let shared = fut.shared();
                    *inflight = Some(shared.clone());
                    shared
                }
            }
        };

        shared.await.map_err(|msg| Error::Upstream((*msg).clone(), String::new()))
    }

    /// Test-only / invalidation hook: clears the cached value so the next
    /// `get` refreshes unconditionally (§4.3.3, §5).
    async fn invalidate(&self) {
        let mut guard = self.state.write().await;
        guard.value = None;
        guard.loaded_at = None;
    }
}

/// Holds the three cached snapshots plus a handle to the blob store. `blocked`
/// is read straight from the store on every call (§4.3) and has no snapshot.
pub struct CacheManager {
    store: Arc<BlobStore>,
    apps: Snapshot<AppsCacheBlob>,
    org_members: Snapshot<OrgMembersBlob>,
    settings: Snapshot<SettingsBlob>,
}

impl CacheManager {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            apps: Snapshot::default(),
            org_members: Snapshot::default(),
            settings: Snapshot::default(),
        }
    }

    /// `getApps(ids)` (§4.3.1). Empty `ids` never triggers a refresh.
    pub async fn get_apps(&self, ids: &[String]) -> Result<Arc<AppsCacheBlob>, Error> {
        let store = Arc::clone(&self.store);
        self.apps
            .get(
                |blob| ids.iter().all(|id| blob.apps.contains_key(id)),
                move || async move { load_apps_cache(&store).await },
            )
            .await
    }

    /// `getOrgMembers(orgId, email)` (§4.3.1).
    pub async fn get_org_members(&self, org_id: &str, email: Option<&str>) -> Result<Arc<OrgMembersBlob>, Error> {
        let org_id = org_id.to_string();
        let email = email.map(str::to_lowercase);
        let store = Arc::clone(&self.store);

        self.org_members
            .get(
                move |blob| match blob.orgs.get(&org_id) {
                    None => false,
                    Some(org) => match &email {
                        None => true,
                        Some(email) => org.allow.iter().any(|e| e.eq_ignore_ascii_case(email)) || org.deny.iter().any(|e| e.eq_ignore_ascii_case(email)),
                    },
                },
                move || async move { load_org_members_cache(&store).await },
            )
            .await
    }

    /// `getSettings(orgId?)` (§4.3.1).
    pub async fn get_settings(&self, org_id: Option<&str>) -> Result<Arc<SettingsBlob>, Error> {
        let org_id = org_id.map(str::to_string);
        let store = Arc::clone(&self.store);

        self.settings
            .get(
                move |blob| match &org_id {
                    Some(id) => blob.orgs.contains_key(id),
                    None => true,
                },
                move || async move { load_settings_cache(&store).await },
            )
            .await
    }

    /// `getBlocked(orgId)` (§4.3) — never cached, always a fresh read.
    pub async fn get_blocked(&self) -> Result<BlockedBlob, Error> {
        Ok(self.store.read(BLOCKED_PATH).await?.unwrap_or_default())
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn clear_all(&self) {
        self.apps.invalidate().await;
        self.org_members.invalidate().await;
        self.settings.invalidate().await;
    }

    /// `addOrphanedApp(id, freeUntil, publisher?, name?)` (§4.3.3). No-op in
    /// the master list if `id` is already present — preserves the original
    /// `freeUntil` (§8.1 "idempotent orphan creation").
    pub async fn add_orphaned_app(&self, id: &str, free_until: i64, publisher: Option<&str>, name: Option<&str>) -> Result<(), Error> {
        let id_owned = id.to_string();
        let publisher_owned = publisher.map(str::to_string);
        let name_owned = name.map(str::to_string);

        self.mutate_apps_master(|records| {
            if !records.iter().any(|r| r.id == id_owned) {
                records.push(AppRecord {
                    id: id_owned.clone(),
                    entry: AppEntry {
                        free_until: Some(free_until),
                        publisher: publisher_owned.clone(),
                        name: name_owned.clone(),
                        ..Default::default()
                    },
                });
            }
        })
        .await?;

        self.mutate_apps_cache(move |blob| {
            blob.apps.entry(id.to_string()).or_insert_with(|| AppEntry {
                free_until: Some(free_until),
                publisher: publisher.map(str::to_string),
                ..Default::default()
            });
        })
        .await?;

        self.apps.invalidate().await;
        Ok(())
    }

    /// `addOrganizationApp(id, orgId, freeUntil, publisher?, name?)` (§4.3.3).
    pub async fn add_organization_app(
        &self,
        id: &str,
        org_id: &str,
        free_until: i64,
        publisher: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), Error> {
        let id_owned = id.to_string();
        let org_owned = org_id.to_string();
        let publisher_owned = publisher.map(str::to_string);
        let name_owned = name.map(str::to_string);

        self.mutate_apps_master(move |records| match records.iter_mut().find(|r| r.id == id_owned) {
            Some(existing) => {
                existing.entry.owner_id = Some(org_owned.clone());
                existing.entry.owner_type = Some("organization".to_string());
                if existing.entry.publisher.as_deref().unwrap_or("").is_empty() {
                    existing.entry.publisher = publisher_owned.clone();
                }
                if existing.entry.name.as_deref().unwrap_or("").is_empty() {
                    existing.entry.name = name_owned.clone();
                }
            }
            None => records.push(AppRecord {
                id: id_owned.clone(),
                entry: AppEntry {
                    owner_id: Some(org_owned.clone()),
                    owner_type: Some("organization".to_string()),
                    publisher: publisher_owned.clone(),
                    name: name_owned.clone(),
                    free_until: Some(free_until),
                    ..Default::default()
                },
            }),
        })
        .await?;

        let org_id_for_cache = org_id.to_string();
        self.mutate_apps_cache(move |blob| {
            blob.apps.insert(
                id.to_string(),
                AppEntry {
                    owner_id: Some(org_id_for_cache),
                    ..Default::default()
                },
            );
        })
        .await?;

        self.apps.invalidate().await;
        Ok(())
    }

    /// `addUserToOrganizationAllowList(orgId, email)` (§4.3.3). Empty email
    /// is a no-op. Fails with `OrganizationNotFound` if `orgId` has no record.
    pub async fn add_user_to_allow_list(&self, org_id: &str, email: &str) -> Result<AddUserOutcome, Error> {
        if email.trim().is_empty() {
            return Ok(AddUserOutcome {
                added: false,
                already_present: false,
            });
        }

        let email_lower = email.trim().to_lowercase();
        let outcome = self.mutate_organization(org_id, |org| {
            let already_present = org.users.iter().any(|u| u.eq_ignore_ascii_case(email));
            if already_present {
                return AddUserOutcome {
                    added: false,
                    already_present: true,
                };
            }

            if let Some(limit) = org.users_limit {
                if org.users.len() as i64 >= limit {
                    return AddUserOutcome {
                        added: false,
                        already_present: false,
                    };
                }
            }

            org.denied_users.retain(|u| !u.eq_ignore_ascii_case(email));
            org.users.push(email.to_string());
            AddUserOutcome {
                added: true,
                already_present: false,
            }
        })
        .await?;

        if outcome.added {
            self.mutate_org_members_cache(org_id, move |members| {
                members.deny.retain(|e| *e != email_lower);
                if !members.allow.contains(&email_lower) {
                    members.allow.push(email_lower.clone());
                }
            })
            .await?;
            self.org_members.invalidate().await;
        }

        Ok(outcome)
    }

    /// `addUserToOrganizationDenyList(orgId, email)` (§4.3.3). Does not touch
    /// `users`; mirrors into the membership cache's `deny` list.
    pub async fn add_user_to_deny_list(&self, org_id: &str, email: &str) -> Result<(), Error> {
        if email.trim().is_empty() {
            return Ok(());
        }

        let email_owned = email.to_string();
        self.mutate_organization(org_id, move |org| {
            if !org.denied_users.iter().any(|u| u.eq_ignore_ascii_case(&email_owned)) {
                org.denied_users.push(email_owned.clone());
            }
        })
        .await?;

        let email_lower = email.trim().to_lowercase();
        self.mutate_org_members_cache(org_id, move |members| {
            if !members.deny.contains(&email_lower) {
                members.deny.push(email_lower.clone());
            }
        })
        .await?;

        self.org_members.invalidate().await;
        Ok(())
    }

    async fn mutate_apps_master<F>(&self, transform: F) -> Result<(), Error>
    where
        F: Fn(&mut Vec<AppRecord>),
    {
        self.store.optimistic_update(APPS_MASTER_PATH, Vec::new(), transform).await.map(|_| ())
    }

    async fn mutate_apps_cache<F>(&self, transform: F) -> Result<(), Error>
    where
        F: Fn(&mut AppsCacheBlob),
    {
        self.store
            .optimistic_update(APPS_CACHE_PATH, AppsCacheBlob::default(), move |blob| {
                transform(blob);
                blob.updated_at = crate::util::now_millis();
            })
            .await
            .map(|_| ())
    }

    async fn mutate_org_members_cache<F>(&self, org_id: &str, transform: F) -> Result<(), Error>
    where
        F: Fn(&mut OrgMembers),
    {
        let org_id = org_id.to_string();
        self.store
            .optimistic_update(ORG_MEMBERS_PATH, OrgMembersBlob::default(), move |blob| {
                transform(blob.orgs.entry(org_id.clone()).or_default());
                blob.updated_at = crate::util::now_millis();
            })
            .await
            .map(|_| ())
    }

    async fn mutate_organization<F, R>(&self, org_id: &str, transform: F) -> Result<R, Error>
    where
        F: Fn(&mut OrganizationRecord) -> R,
        R: Send,
    {
        let org_id_owned = org_id.to_string();

        let (_, found) = self
            .store
            .optimistic_update::<OrganizationsStore, _, Option<R>>(ORGANIZATIONS_PATH, Vec::new(), move |records| {
                records.iter_mut().find(|r| r.id == org_id_owned).map(&transform)
            })
            .await?;

        found.ok_or_else(|| Error::OrganizationNotFound(org_id.to_string(), String::new()))
    }
}

/// Outcome of `addUserToOrganizationAllowList` (§4.3.3, §8.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddUserOutcome {
    pub added: bool,
    pub already_present: bool,
}

async fn load_apps_cache(store: &BlobStore) -> Result<AppsCacheBlob, Error> {
    Ok(store.read(APPS_CACHE_PATH).await?.unwrap_or_default())
}

async fn load_org_members_cache(store: &BlobStore) -> Result<OrgMembersBlob, Error> {
    Ok(store.read(ORG_MEMBERS_PATH).await?.unwrap_or_default())
}

async fn load_settings_cache(store: &BlobStore) -> Result<SettingsBlob, Error> {
    Ok(store.read(SETTINGS_PATH).await?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::counting::CountingBackend;

    fn tempdir(label: &str) -> String {
        format!("{}/ninjacore-cache-test-{label}-{}-{}", std::env::temp_dir().display(), std::process::id(), rand_suffix())
    }

    fn rand_suffix() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// §8.1 "single-flight": N concurrent lookups during a cold cache invoke
    /// the underlying `read` exactly once.
    #[tokio::test]
    async fn single_flight_coalesces_concurrent_cold_reads() {
        let backend = CountingBackend::with_read_delay(Duration::from_millis(50));
        let store = Arc::new(BlobStore::counting(Arc::clone(&backend)));
        let cache = Arc::new(CacheManager::new(store));

        let tasks = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_apps(&[]).await })
        });
        for t in tasks {
            t.await.expect("task").expect("get_apps");
        }

        assert_eq!(backend.read_count(), 1);
    }

    /// §8.1 "miss-triggered refresh": a warm cache without `id` refreshes
    /// exactly once per subsequent lookup of that id; a warm cache that
    /// already has `id` does not refresh again within the TTL.
    #[tokio::test]
    async fn miss_driven_refresh_fires_only_on_absent_keys() {
        let backend = CountingBackend::new();
        let store = Arc::new(BlobStore::counting(Arc::clone(&backend)));
        let cache = CacheManager::new(store);

        let ids = ["app-a".to_string()];
        cache.get_apps(&ids).await.expect("first load");
        assert_eq!(backend.read_count(), 1, "cold cache always refreshes once");

        cache.get_apps(&ids).await.expect("miss-driven refresh");
        assert_eq!(backend.read_count(), 2, "app-a is absent from the cached blob, so this lookup refreshes");

        cache.get_apps(&[]).await.expect("empty ids never refresh");
        assert_eq!(backend.read_count(), 2, "empty id list is vacuously valid and must not trigger a refresh");
    }

    #[tokio::test]
    async fn warm_cache_with_present_key_does_not_refresh() {
        let backend = CountingBackend::new();
        let store = Arc::new(BlobStore::counting(Arc::clone(&backend)));

        store
            .optimistic_update(APPS_CACHE_PATH, AppsCacheBlob::default(), |blob| {
                blob.apps.insert("app-a".to_string(), AppEntry::default());
            })
            .await
            .expect("seed");

        let cache = CacheManager::new(store);
        let ids = ["app-a".to_string()];
        cache.get_apps(&ids).await.expect("first load");
        assert_eq!(backend.read_count(), 1);

        cache.get_apps(&ids).await.expect("second load");
        assert_eq!(backend.read_count(), 1, "app-a is already present, so the TTL-valid snapshot is reused");
    }

    /// §8.1 "idempotent orphan creation": a second `addOrphanedApp` for the
    /// same id leaves the master list at the first call's `freeUntil`.
    #[tokio::test]
    async fn idempotent_orphan_creation_preserves_first_free_until() {
        let dir = tempdir("orphan");
        let store = Arc::new(BlobStore::at(&dir).expect("store"));
        let cache = CacheManager::new(Arc::clone(&store));

        cache.add_orphaned_app("app-a", 1_000, None, None).await.expect("first add");
        cache.add_orphaned_app("app-a", 2_000, None, None).await.expect("second add");

        let master: Vec<AppRecord> = store.read(APPS_MASTER_PATH).await.expect("read master").unwrap_or_default();
        let entry = master.iter().find(|r| r.id == "app-a").expect("app-a present");
        assert_eq!(entry.entry.free_until, Some(1_000));

        std::fs::remove_dir_all(&dir).ok();
    }

    /// §8.3 round-trip laws for the allow-list mutator.
    #[tokio::test]
    async fn allow_list_add_is_idempotent_and_reverses_a_deny() {
        let dir = tempdir("allowlist");
        let store = Arc::new(BlobStore::at(&dir).expect("store"));
        let cache = CacheManager::new(Arc::clone(&store));

        store
            .optimistic_update(ORGANIZATIONS_PATH, Vec::new(), |records: &mut Vec<OrganizationRecord>| {
                records.push(OrganizationRecord {
                    id: "org1".to_string(),
                    users: vec![],
                    denied_users: vec![],
                    users_limit: None,
                })
            })
            .await
            .expect("seed organization");

        let first = cache.add_user_to_allow_list("org1", "dev@x.io").await.expect("first add");
        assert_eq!(first, AddUserOutcome { added: true, already_present: false });

        let second = cache.add_user_to_allow_list("org1", "dev@x.io").await.expect("second add");
        assert_eq!(second, AddUserOutcome { added: false, already_present: true });

        cache.add_user_to_deny_list("org1", "blocked@x.io").await.expect("deny add");
        let outcome = cache.add_user_to_allow_list("org1", "blocked@x.io").await.expect("allow after deny");
        assert_eq!(outcome, AddUserOutcome { added: true, already_present: false });

        let org_members = cache.get_org_members("org1", None).await.expect("members");
        let org = org_members.orgs.get("org1").expect("org present");
        assert!(!org.deny.contains(&"blocked@x.io".to_string()));
        assert!(org.allow.contains(&"blocked@x.io".to_string()));

        std::fs::remove_dir_all(&dir).ok();
    }
}
