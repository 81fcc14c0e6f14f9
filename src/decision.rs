//
// Decision functions (§4.2)
//
// Pure classifiers and list predicates. No I/O, no logging — everything here
// is a plain function of its arguments so it can be exhaustively unit tested.
//
use crate::config::CONFIG;
use crate::domain::{AppEntry, BlockReason};

pub fn is_known(apps: &std::collections::HashMap<String, AppEntry>, id: &str) -> bool {
    apps.contains_key(id)
}

pub fn is_sponsored(entry: &AppEntry) -> bool {
    entry.sponsored
}

/// `freeUntil` present and `ownerId` absent (§3.1, §4.2).
pub fn is_orphaned(entry: &AppEntry) -> bool {
    entry.free_until.is_some() && entry.owner_id.is_none()
}

pub fn is_personal(entry: &AppEntry) -> bool {
    entry.emails.as_ref().is_some_and(|e| !e.is_empty())
}

pub fn is_organization(entry: &AppEntry) -> bool {
    entry.owner_id.is_some()
}

/// Case-insensitive membership test (§4.2, §8.1 "case-insensitive membership").
pub fn email_in_list(list: &[String], email: &str) -> bool {
    let needle = email.trim().to_lowercase();
    list.iter().any(|candidate| candidate.trim().to_lowercase() == needle)
}

/// `freeUntil` floored to the configured minimum (§3.2 invariant 4).
pub fn effective_free_until(free_until: i64) -> i64 {
    free_until.max(CONFIG.minimum_grace_period_end_ms())
}

/// Equality at the boundary is *not* expired (§4.2).
pub fn is_grace_period_expired(free_until: i64, now: i64) -> bool {
    effective_free_until(free_until) < now
}

pub fn time_remaining(free_until: i64, now: i64) -> i64 {
    (effective_free_until(free_until) - now).max(0)
}

pub fn block_reason_to_code(reason: BlockReason) -> &'static str {
    match reason {
        BlockReason::Flagged => "ORG_FLAGGED",
        BlockReason::SubscriptionCancelled => "SUBSCRIPTION_CANCELLED",
        BlockReason::PaymentFailed => "PAYMENT_FAILED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AppEntry;

    fn entry(sponsored: bool, free_until: Option<i64>, owner_id: Option<&str>, emails: Option<Vec<&str>>) -> AppEntry {
        AppEntry {
            sponsored,
            free_until,
            owner_id: owner_id.map(String::from),
            emails: emails.map(|es| es.into_iter().map(String::from).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn classification_exclusivity() {
        let sponsored = entry(true, None, None, None);
        assert!(is_sponsored(&sponsored));
        assert!(!is_orphaned(&sponsored));
        assert!(!is_personal(&sponsored));
        assert!(!is_organization(&sponsored));

        let orphaned = entry(false, Some(1000), None, None);
        assert!(!is_sponsored(&orphaned));
        assert!(is_orphaned(&orphaned));
        assert!(!is_personal(&orphaned));
        assert!(!is_organization(&orphaned));

        let personal = entry(false, None, None, Some(vec!["a@x.io"]));
        assert!(!is_sponsored(&personal));
        assert!(!is_orphaned(&personal));
        assert!(is_personal(&personal));
        assert!(!is_organization(&personal));

        let org = entry(false, None, Some("org_1"), None);
        assert!(!is_sponsored(&org));
        assert!(!is_orphaned(&org));
        assert!(!is_personal(&org));
        assert!(is_organization(&org));
    }

    #[test]
    fn email_in_list_is_case_insensitive() {
        let list = vec!["Alice@Example.com".to_string()];
        assert!(email_in_list(&list, "alice@example.com"));
        assert!(email_in_list(&list, "ALICE@EXAMPLE.COM"));
        assert!(!email_in_list(&list, "bob@example.com"));
    }

    #[test]
    fn grace_period_boundary_is_not_expired() {
        assert!(!is_grace_period_expired(1_000, 1_000));
        assert!(is_grace_period_expired(1_000, 1_001));
        assert!(!is_grace_period_expired(1_000, 999));
    }

    #[test]
    fn time_remaining_never_negative() {
        assert_eq!(time_remaining(1_000, 2_000), 0);
        assert_eq!(time_remaining(2_000, 1_000), 1_000);
    }

    #[test]
    fn block_reason_codes() {
        assert_eq!(block_reason_to_code(BlockReason::Flagged), "ORG_FLAGGED");
        assert_eq!(block_reason_to_code(BlockReason::SubscriptionCancelled), "SUBSCRIPTION_CANCELLED");
        assert_eq!(block_reason_to_code(BlockReason::PaymentFailed), "PAYMENT_FAILED");
    }
}
