//
// Data model (§3)
//
// Every shape here round-trips against the blob paths of §6.1. `AppEntry`'s
// classification is defined purely by which optional field is populated —
// there is no separate discriminant tag, matching the wire format.
//
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !*b
}

/// One application's classification-defining fields (§3.1). Exactly one of
/// `sponsored`, `free_until`-without-`owner_id`, `emails`, or `owner_id`
/// should be populated at a time — enforced by the decision functions
/// (`decision::classify`), not by this type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEntry {
    #[serde(default, skip_serializing_if = "is_false")]
    pub sponsored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A master-list record: an `AppEntry` tagged with its id (`system://apps.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: String,
    #[serde(flatten)]
    pub entry: AppEntry,
}

/// `system://apps.json`.
pub type AppsStore = Vec<AppRecord>;

/// `system://cache/apps.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsCacheBlob {
    pub updated_at: i64,
    pub apps: HashMap<String, AppEntry>,
}

/// Per-organization allow/deny membership (§3.1). Entries are stored lowercase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgMembers {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// `system://cache/org-members.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgMembersBlob {
    pub updated_at: i64,
    pub orgs: HashMap<String, OrgMembers>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Flagged,
    SubscriptionCancelled,
    PaymentFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedOrg {
    pub reason: BlockReason,
    pub blocked_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// `system://cache/blocked.json`. Never cached (§4.3) — always read fresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedBlob {
    pub updated_at: i64,
    pub orgs: HashMap<String, BlockedOrg>,
}

/// Per-organization settings (§3.1). `flags` bit 0 is `SKIP_USER_CHECK`, bit 1
/// is `DENY_UNKNOWN_DOMAINS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsEntry {
    #[serde(default)]
    pub flags: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

impl SettingsEntry {
    pub const SKIP_USER_CHECK: i32 = 1 << 0;
    pub const DENY_UNKNOWN_DOMAINS: i32 = 1 << 1;

    pub fn has_flag(&self, flag: i32) -> bool {
        self.flags & flag != 0
    }
}

/// `system://cache/settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsBlob {
    pub updated_at: i64,
    pub orgs: HashMap<String, SettingsEntry>,
}

/// An authoritative organization roster record (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRecord {
    pub id: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub denied_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_limit: Option<i64>,
}

/// `system://organizations.json`.
pub type OrganizationsStore = Vec<OrganizationRecord>;

/// An entry in `logs://{orgId}_unknown.json` (§3.1, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownUserAttempt {
    pub timestamp: i64,
    pub email: String,
    pub app_id: String,
}

/// An entry in `logs://{orgId}_featureLog.json` (§3.1, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub app_id: String,
    pub timestamp: i64,
    pub email: String,
    pub feature: String,
}
