//! Per-user eligibility rules for discovered resources.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{FilterRules, ResourceCandidate};
use crate::store::Store;

pub trait ResourceFilter: Send + Sync {
    fn accept(&self, candidate: &ResourceCandidate, user_id: i64) -> bool;
}

/// Default policy: every classified resource is eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ResourceFilter for AcceptAll {
    fn accept(&self, _candidate: &ResourceCandidate, _user_id: i64) -> bool {
        true
    }
}

/// Applies the [`FilterRules`] stored in each user's notification settings.
pub struct RuleFilter<S: Store> {
    store: Arc<S>,
}

impl<S: Store> RuleFilter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: Store + Send + Sync> ResourceFilter for RuleFilter<S> {
    fn accept(&self, candidate: &ResourceCandidate, user_id: i64) -> bool {
        match self.store.get_settings(user_id) {
            Ok(Some(settings)) => rules_accept(&settings.filters, candidate),
            Ok(None) => true,
            Err(e) => {
                warn!("Could not load filter rules for user {}: {}", user_id, e);
                true
            }
        }
    }
}

pub fn rules_accept(rules: &FilterRules, candidate: &ResourceCandidate) -> bool {
    if rules.is_empty() {
        return true;
    }

    let url = candidate.url.to_lowercase();
    let ext = candidate
        .file_name()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    let matches_ext = |list: &[String]| {
        list.iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    };

    if matches_ext(&rules.deny_extensions) {
        return false;
    }
    if !rules.allow_extensions.is_empty() && !matches_ext(&rules.allow_extensions) {
        return false;
    }
    if !rules.kinds.is_empty() && !rules.kinds.contains(&candidate.kind) {
        return false;
    }
    if !rules.keywords.is_empty()
        && !rules
            .keywords
            .iter()
            .any(|k| url.contains(&k.to_lowercase()))
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MediaKind, NotificationSettings};
    use crate::store::SqliteStore;

    fn pdf() -> ResourceCandidate {
        ResourceCandidate::new("https://example.com/Results-2024.PDF".into(), MediaKind::Document)
    }

    fn gif() -> ResourceCandidate {
        ResourceCandidate::new("https://example.com/spinner.gif".into(), MediaKind::Image)
    }

    #[test]
    fn test_empty_rules_accept_all() {
        let rules = FilterRules::default();
        assert!(rules_accept(&rules, &pdf()));
        assert!(rules_accept(&rules, &gif()));
        assert!(AcceptAll.accept(&gif(), 1));
    }

    #[test]
    fn test_deny_extension() {
        let rules = FilterRules {
            deny_extensions: vec![".gif".into()],
            ..Default::default()
        };
        assert!(rules_accept(&rules, &pdf()));
        assert!(!rules_accept(&rules, &gif()));
    }

    #[test]
    fn test_allow_extension_case_insensitive() {
        let rules = FilterRules {
            allow_extensions: vec!["pdf".into()],
            ..Default::default()
        };
        assert!(rules_accept(&rules, &pdf()));
        assert!(!rules_accept(&rules, &gif()));
    }

    #[test]
    fn test_kinds_and_keywords() {
        let rules = FilterRules {
            kinds: vec![MediaKind::Document],
            keywords: vec!["results".into()],
            ..Default::default()
        };
        assert!(rules_accept(&rules, &pdf()));
        assert!(!rules_accept(&rules, &gif()));

        let other_pdf =
            ResourceCandidate::new("https://example.com/timetable.pdf".into(), MediaKind::Document);
        assert!(!rules_accept(&rules, &other_pdf));
    }

    #[test]
    fn test_rule_filter_reads_user_settings() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut settings = NotificationSettings::new(1);
        settings.filters.kinds = vec![MediaKind::Document];
        store.save_settings(&settings).unwrap();

        let filter = RuleFilter::new(store);
        assert!(filter.accept(&pdf(), 1));
        assert!(!filter.accept(&gif(), 1));
        // No settings for user 2: everything passes.
        assert!(filter.accept(&gif(), 2));
    }
}
