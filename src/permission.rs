//! Role and permission checks.
//!
//! Permission lookups are delegated to a [`PermissionChecker`] supplied by the
//! surrounding application; this crate only calls it. Holders of the
//! super-admin role bypass every check.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Reserved role id that bypasses permission and role checks.
pub const SUPER_ADMIN_ROLE_ID: u64 = 1;

#[must_use]
pub fn is_super_admin(role_ids: &BTreeSet<u64>) -> bool {
    role_ids.contains(&SUPER_ADMIN_ROLE_ID)
}

/// `true` for super-admins or when any of `role_ids` is in `allowed`.
#[must_use]
pub fn has_any_role(role_ids: &BTreeSet<u64>, allowed: &[u64]) -> bool {
    is_super_admin(role_ids) || allowed.iter().any(|id| role_ids.contains(id))
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `user_id` may access the resource identified by `code`.
    async fn check_permission(&self, user_id: u64, code: &str) -> bool;
}

/// Grants nothing; only super-admins get through.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl PermissionChecker for DenyAll {
    async fn check_permission(&self, _user_id: u64, _code: &str) -> bool {
        false
    }
}

/// Fixed user → permission-code table.
#[derive(Clone, Debug, Default)]
pub struct StaticPermissions {
    grants: HashMap<u64, HashSet<String>>,
}

impl StaticPermissions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn grant(mut self, user_id: u64, code: impl Into<String>) -> Self {
        self.grants.entry(user_id).or_default().insert(code.into());
        self
    }
}

#[async_trait]
impl PermissionChecker for StaticPermissions {
    async fn check_permission(&self, user_id: u64, code: &str) -> bool {
        self.grants
            .get(&user_id)
            .is_some_and(|codes| codes.contains(code))
    }
}
