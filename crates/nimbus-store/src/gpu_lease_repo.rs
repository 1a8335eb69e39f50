//! Leases granted against GPU claims.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use nimbus_model::GpuLease;

use crate::error::{StoreError, StoreResult};

/// Repository of GPU leases. Cloning shares the records.
#[derive(Clone, Default)]
pub struct GpuLeaseRepo {
    leases: Arc<RwLock<HashMap<String, GpuLease>>>,
}

impl GpuLeaseRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new lease. Fails if the id already exists.
    pub fn create(&self, lease: GpuLease) -> StoreResult<()> {
        let mut leases = self.leases.write();
        if leases.contains_key(&lease.id) {
            return Err(StoreError::non_unique("id", lease.id));
        }
        leases.insert(lease.id.clone(), lease);
        Ok(())
    }

    /// Returns a lease by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<GpuLease> {
        self.leases.read().get(id).cloned()
    }

    /// Lists all leases, oldest first (queue order).
    #[must_use]
    pub fn list(&self) -> Vec<GpuLease> {
        let mut out: Vec<GpuLease> = self.leases.read().values().cloned().collect();
        out.sort_by_key(|l| l.created_at);
        out
    }

    /// Lists leases backed by the given claim.
    #[must_use]
    pub fn list_by_claim(&self, claim_id: &str) -> Vec<GpuLease> {
        self.leases
            .read()
            .values()
            .filter(|l| l.claim_id == claim_id)
            .cloned()
            .collect()
    }

    /// Deletes a lease. Deleting an absent lease is not an error.
    pub fn delete(&self, id: &str) -> bool {
        self.leases.write().remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lease(id: &str, claim: &str) -> GpuLease {
        GpuLease {
            id: id.into(),
            claim_id: claim.into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn create_and_lookup_by_claim() {
        let repo = GpuLeaseRepo::new();
        repo.create(lease("l1", "c1")).unwrap();
        repo.create(lease("l2", "c1")).unwrap();
        repo.create(lease("l3", "c2")).unwrap();

        assert_eq!(repo.list_by_claim("c1").len(), 2);
        assert_eq!(repo.list().len(), 3);
        assert!(repo.delete("l3"));
        assert!(!repo.delete("l3"));
    }
}
