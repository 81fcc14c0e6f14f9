//
// Permission checker (§4.4)
//
// Orchestrates the cache manager, the unknown-user logger, and the pure
// classifiers in `decision` into the ordered guard pipeline. Nothing here
// touches bytes or Rocket; `binding.rs` is the only caller.
//
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::CONFIG;
use crate::decision;
use crate::domain::SettingsEntry;
use crate::error::Error;
use crate::unknown_user_log::UnknownUserLogger;
use crate::util::{email_domain, now_millis};

/// Warning and error codes surfaced in the response body (§6.3, §7). Plain
/// string constants, the same representation `decision::block_reason_to_code`
/// already returns for blocked-organization reasons.
pub mod codes {
    pub const APP_GRACE_PERIOD: &str = "APP_GRACE_PERIOD";
    pub const ORG_GRACE_PERIOD: &str = "ORG_GRACE_PERIOD";
    pub const GRACE_EXPIRED: &str = "GRACE_EXPIRED";
    pub const ORG_GRACE_EXPIRED: &str = "ORG_GRACE_EXPIRED";
    pub const USER_NOT_AUTHORIZED: &str = "USER_NOT_AUTHORIZED";
    pub const GIT_EMAIL_REQUIRED: &str = "GIT_EMAIL_REQUIRED";
}

/// Outcome of `check()` (§4.4, §6.3). `git_email` is only ever populated on
/// branches that had an email to report back in the first place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Allow,
    AllowWithWarning {
        code: &'static str,
        time_remaining: Option<i64>,
        git_email: Option<String>,
    },
    Deny {
        code: &'static str,
        git_email: Option<String>,
    },
}

pub struct PermissionChecker {
    cache: Arc<CacheManager>,
    unknown_logger: Arc<UnknownUserLogger>,
}

impl PermissionChecker {
    pub fn new(cache: Arc<CacheManager>, unknown_logger: Arc<UnknownUserLogger>) -> Self {
        Self { cache, unknown_logger }
    }

    /// `check(appId, email?, publisher?, appName?)` (§4.4.1). The ordered
    /// guard pipeline: unknown → sponsored → orphaned → personal →
    /// organization.
    pub async fn check(&self, app_id: &str, email: Option<&str>, publisher: Option<&str>, app_name: Option<&str>) -> Result<CheckResult, Error> {
        let now = now_millis();
        let ids = [app_id.to_string()];
        let apps = self.cache.get_apps(&ids).await?;

        let Some(entry) = apps.apps.get(app_id) else {
            let free_until = now + CONFIG.grace_period_ms();
            if let Some(result) = self.try_publisher_claim(app_id, email, publisher, free_until, app_name).await? {
                return Ok(result);
            }

            self.cache.add_orphaned_app(app_id, free_until, publisher, app_name).await?;
            return Ok(CheckResult::AllowWithWarning {
                code: codes::APP_GRACE_PERIOD,
                time_remaining: Some(CONFIG.grace_period_ms()),
                git_email: None,
            });
        };

        if decision::is_sponsored(entry) {
            return Ok(CheckResult::Allow);
        }

        if decision::is_orphaned(entry) {
            let free_until = entry.free_until.expect("is_orphaned guarantees free_until is set");
            if let Some(result) = self.try_publisher_claim(app_id, email, publisher, free_until, app_name).await? {
                return Ok(result);
            }

            return Ok(if decision::is_grace_period_expired(free_until, now) {
                CheckResult::Deny {
                    code: codes::GRACE_EXPIRED,
                    git_email: None,
                }
            } else {
                CheckResult::AllowWithWarning {
                    code: codes::APP_GRACE_PERIOD,
                    time_remaining: Some(decision::time_remaining(free_until, now)),
                    git_email: None,
                }
            });
        }

        if decision::is_personal(entry) {
            let Some(email) = email else {
                return Ok(CheckResult::Deny {
                    code: codes::GIT_EMAIL_REQUIRED,
                    git_email: None,
                });
            };

            let emails = entry.emails.as_deref().unwrap_or(&[]);
            return Ok(if decision::email_in_list(emails, email) {
                CheckResult::Allow
            } else {
                CheckResult::Deny {
                    code: codes::USER_NOT_AUTHORIZED,
                    git_email: Some(email.to_string()),
                }
            });
        }

        let owner_id = entry.owner_id.clone().expect("is_organization guarantees owner_id is set");
        self.organization_handler(&owner_id, app_id, email).await
    }

    /// `tryPublisherAutoClaim` (§4.4.2). Looks `publisher` up against every
    /// organization's publisher allow-list, picks the lexicographically first
    /// matching organization id on ties, and claims the app into it. Returns
    /// `None` when there is no publisher to match or no organization claims it.
    async fn try_publisher_claim(
        &self,
        app_id: &str,
        email: Option<&str>,
        publisher: Option<&str>,
        free_until: i64,
        app_name: Option<&str>,
    ) -> Result<Option<CheckResult>, Error> {
        let Some(publisher) = publisher.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let publisher_lower = publisher.to_lowercase();

        let settings = self.cache.get_settings(None).await?;
        let mut org_ids: Vec<&String> = settings.orgs.keys().collect();
        org_ids.sort();

        let Some(winner) = org_ids.into_iter().find(|org_id| {
            settings.orgs[*org_id]
                .publishers
                .as_ref()
                .is_some_and(|list| list.iter().any(|p| p.trim().eq_ignore_ascii_case(&publisher_lower)))
        }) else {
            return Ok(None);
        };

        self.cache.add_organization_app(app_id, winner, free_until, Some(publisher), app_name).await?;
        Ok(Some(self.organization_handler(winner, app_id, email).await?))
    }

    /// `organizationHandler(orgId, appId, email)` (§4.4.3). Blocked check
    /// first, then deny list, allow list, domain auto-claim,
    /// `DENY_UNKNOWN_DOMAINS` enforcement, finally the unknown-user grace
    /// period.
    async fn organization_handler(&self, org_id: &str, app_id: &str, email: Option<&str>) -> Result<CheckResult, Error> {
        let now = now_millis();
        let (members, blocked, settings) = tokio::try_join!(self.cache.get_org_members(org_id, email), self.cache.get_blocked(), self.cache.get_settings(Some(org_id)))?;

        if let Some(blocked_org) = blocked.orgs.get(org_id) {
            return Ok(CheckResult::Deny {
                code: decision::block_reason_to_code(blocked_org.reason),
                git_email: None,
            });
        }

        let Some(email) = email else {
            return Ok(CheckResult::Deny {
                code: codes::GIT_EMAIL_REQUIRED,
                git_email: None,
            });
        };

        let Some(org) = members.orgs.get(org_id) else {
            return Ok(CheckResult::Deny {
                code: codes::USER_NOT_AUTHORIZED,
                git_email: None,
            });
        };

        if decision::email_in_list(&org.deny, email) {
            return Ok(CheckResult::Deny {
                code: codes::USER_NOT_AUTHORIZED,
                git_email: Some(email.to_string()),
            });
        }
        if decision::email_in_list(&org.allow, email) {
            return Ok(CheckResult::Allow);
        }

        let settings_entry = settings.orgs.get(org_id);
        let domain = email_domain(email);
        let domain_matches = settings_entry.is_some_and(|s| s.domains.as_ref().is_some_and(|domains| domains.iter().any(|d| d.trim().eq_ignore_ascii_case(&domain))));

        if domain_matches {
            let outcome = self.cache.add_user_to_allow_list(org_id, email).await?;
            if outcome.added {
                return Ok(CheckResult::Allow);
            }
        }

        if settings_entry.is_some_and(|s| s.has_flag(SettingsEntry::DENY_UNKNOWN_DOMAINS)) {
            self.cache.add_user_to_deny_list(org_id, email).await?;
            return Ok(CheckResult::Deny {
                code: codes::USER_NOT_AUTHORIZED,
                git_email: Some(email.to_string()),
            });
        }

        let first_seen = match self.unknown_logger.log_attempt(app_id, email, org_id).await {
            Ok(ts) => ts,
            Err(e) => {
                error!("unknown-user log failed for {org_id}/{email}: {e:?}");
                return Ok(CheckResult::Deny {
                    code: codes::USER_NOT_AUTHORIZED,
                    git_email: Some(email.to_string()),
                });
            }
        };

        // Not floored by `MINIMUM_GRACE_PERIOD_END` — that floor applies only
        // to app-level grace (§4.4.4); this is measured strictly from
        // `first_seen`.
        let remaining = (CONFIG.grace_period_ms() - (now - first_seen)).max(0);
        Ok(if remaining > 0 {
            CheckResult::AllowWithWarning {
                code: codes::ORG_GRACE_PERIOD,
                time_remaining: Some(remaining),
                git_email: Some(email.to_string()),
            }
        } else {
            CheckResult::Deny {
                code: codes::ORG_GRACE_EXPIRED,
                git_email: Some(email.to_string()),
            }
        })
    }
}
