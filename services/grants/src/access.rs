//! Read access decisions for galleries.

use crate::config::{AccessConfig, AccessMode};
use std::collections::{HashMap, HashSet};

/// Decides whether a caller may act within a gallery
pub trait AccessPolicy: Send + Sync {
    fn has_access(&self, caller_identity: &str, owner_context: &str) -> bool;
}

/// Policy fixed at startup: open, or a per-gallery allow list
#[derive(Debug, Clone)]
pub struct StaticAccessPolicy {
    mode: AccessMode,
    allow: HashMap<String, HashSet<String>>,
}

impl StaticAccessPolicy {
    pub fn open() -> Self {
        Self {
            mode: AccessMode::Open,
            allow: HashMap::new(),
        }
    }

    pub fn allow_list<I, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, C)>,
        C: IntoIterator<Item = String>,
    {
        Self {
            mode: AccessMode::AllowList,
            allow: entries
                .into_iter()
                .map(|(context, callers)| (context, callers.into_iter().collect()))
                .collect(),
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        match config.mode {
            AccessMode::Open => Self::open(),
            AccessMode::AllowList => Self::allow_list(config.allow.clone()),
        }
    }
}

impl AccessPolicy for StaticAccessPolicy {
    fn has_access(&self, caller_identity: &str, owner_context: &str) -> bool {
        if caller_identity.is_empty() || owner_context.is_empty() {
            return false;
        }
        match self.mode {
            AccessMode::Open => true,
            AccessMode::AllowList => self
                .allow
                .get(owner_context)
                .is_some_and(|callers| callers.contains(caller_identity)),
        }
    }
}

/// True when `key` lives under `{owner_context}/`
pub fn key_in_context(key: &str, owner_context: &str) -> bool {
    key.strip_prefix(owner_context)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list() -> StaticAccessPolicy {
        StaticAccessPolicy::allow_list(vec![(
            "party".to_string(),
            vec!["alice".to_string(), "bob".to_string()],
        )])
    }

    #[test]
    fn test_open_policy_allows_named_callers() {
        let policy = StaticAccessPolicy::open();
        assert!(policy.has_access("anyone", "party"));
        assert!(!policy.has_access("", "party"));
        assert!(!policy.has_access("alice", ""));
    }

    #[test]
    fn test_allow_list() {
        let policy = allow_list();
        assert!(policy.has_access("alice", "party"));
        assert!(!policy.has_access("mallory", "party"));
        assert!(!policy.has_access("alice", "other-party"));
    }

    #[test]
    fn test_from_config() {
        let mut config = AccessConfig::default();
        assert!(StaticAccessPolicy::from_config(&config).has_access("x", "y"));

        config.mode = AccessMode::AllowList;
        config
            .allow
            .insert("party".to_string(), vec!["alice".to_string()]);
        let policy = StaticAccessPolicy::from_config(&config);
        assert!(policy.has_access("alice", "party"));
        assert!(!policy.has_access("x", "y"));
    }

    #[test]
    fn test_key_in_context() {
        assert!(key_in_context("party/alice/1-a.jpg", "party"));
        assert!(!key_in_context("party-2/alice/1-a.jpg", "party"));
        assert!(!key_in_context("party/", "party"));
        assert!(!key_in_context("other/party/a.jpg", "party"));
    }
}
