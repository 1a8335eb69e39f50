//! Generic resource repository with activity gating.
//!
//! One repository instance exists per resource kind. All operations are
//! single atomic updates under the repository lock; `start_activity` is
//! the only concurrency gate resources have (there is no distributed
//! lock server).

use std::sync::Arc;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use nimbus_model::{
    Activity, CustomDomainStatus, Deployment, Resource, Vm,
};

use crate::error::{StoreError, StoreResult};

/// Fluent filter over resources of one kind.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    owner: Option<String>,
    zone: Option<String>,
    name_regex: Option<String>,
    with_activities: Vec<Activity>,
    no_activities: bool,
    older_than: Option<DateTime<Utc>>,
    last_accessed_before: Option<DateTime<Utc>>,
}

impl ResourceFilter {
    /// An empty filter matching every resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only resources owned by the given user.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Only resources in the given zone.
    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Only resources whose name matches the regex.
    #[must_use]
    pub fn with_name_regex(mut self, pattern: impl Into<String>) -> Self {
        self.name_regex = Some(pattern.into());
        self
    }

    /// Only resources currently running all the given activities.
    #[must_use]
    pub fn with_activities(mut self, activities: &[Activity]) -> Self {
        self.with_activities.extend_from_slice(activities);
        self
    }

    /// Only idle resources (no activities at all).
    #[must_use]
    pub fn with_no_activities(mut self) -> Self {
        self.no_activities = true;
        self
    }

    /// Only resources created before the given time.
    #[must_use]
    pub fn older_than(mut self, t: DateTime<Utc>) -> Self {
        self.older_than = Some(t);
        self
    }

    /// Only resources last accessed before the given time.
    #[must_use]
    pub fn last_accessed_before(mut self, t: DateTime<Utc>) -> Self {
        self.last_accessed_before = Some(t);
        self
    }

    fn compile(&self) -> StoreResult<Option<Regex>> {
        Ok(match &self.name_regex {
            Some(p) => Some(Regex::new(p)?),
            None => None,
        })
    }

    fn matches<R: Resource>(&self, resource: &R, name_re: Option<&Regex>) -> bool {
        let meta = resource.meta();
        if let Some(ref owner) = self.owner {
            if &meta.owner_id != owner {
                return false;
            }
        }
        if let Some(ref zone) = self.zone {
            if &meta.zone != zone {
                return false;
            }
        }
        if let Some(re) = name_re {
            if !re.is_match(&meta.name) {
                return false;
            }
        }
        if self.no_activities && !meta.activities.is_empty() {
            return false;
        }
        if !self
            .with_activities
            .iter()
            .all(|a| meta.activities.contains(*a))
        {
            return false;
        }
        if let Some(t) = self.older_than {
            if meta.created_at >= t {
                return false;
            }
        }
        if let Some(t) = self.last_accessed_before {
            if meta.accessed_at >= t {
                return false;
            }
        }
        true
    }
}

/// Repository for one resource kind. Cloning shares the records.
pub struct ResourceRepo<R: Resource> {
    docs: Arc<RwLock<HashMap<String, R>>>,
}

impl<R: Resource> Clone for ResourceRepo<R> {
    fn clone(&self) -> Self {
        Self {
            docs: Arc::clone(&self.docs),
        }
    }
}

impl<R: Resource> Default for ResourceRepo<R> {
    fn default() -> Self {
        Self {
            docs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<R: Resource> ResourceRepo<R> {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new resource. The id must be unique, and the name must
    /// be unique within the owner's resources of this kind.
    pub fn create(&self, resource: R) -> StoreResult<()> {
        let mut docs = self.docs.write();
        let meta = resource.meta();
        if docs.contains_key(&meta.id) {
            return Err(StoreError::non_unique("id", meta.id.clone()));
        }
        let name_taken = docs.values().any(|r| {
            r.meta().owner_id == meta.owner_id
                && r.meta().name == meta.name
                && r.meta().deleted_at.is_none()
        });
        if name_taken {
            return Err(StoreError::non_unique("name", meta.name.clone()));
        }
        let id = meta.id.clone();
        docs.insert(id, resource);
        Ok(())
    }

    /// Returns a resource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<R> {
        self.docs.read().get(id).cloned()
    }

    /// Returns a resource by owner and name. Soft-deleted records are
    /// skipped; a name freed by deletion must resolve to its
    /// replacement, matching the uniqueness rule in [`Self::create`].
    #[must_use]
    pub fn get_by_name(&self, owner: &str, name: &str) -> Option<R> {
        self.docs
            .read()
            .values()
            .find(|r| {
                r.meta().owner_id == owner
                    && r.meta().name == name
                    && r.meta().deleted_at.is_none()
            })
            .cloned()
    }

    /// Lists resources matching the filter, oldest first.
    pub fn list(&self, filter: &ResourceFilter) -> StoreResult<Vec<R>> {
        let name_re = filter.compile()?;
        let docs = self.docs.read();
        let mut out: Vec<R> = docs
            .values()
            .filter(|r| filter.matches(*r, name_re.as_ref()))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.meta().created_at);
        Ok(out)
    }

    /// Returns true if any resource matches the filter.
    pub fn exists(&self, filter: &ResourceFilter) -> StoreResult<bool> {
        let name_re = filter.compile()?;
        let docs = self.docs.read();
        Ok(docs.values().any(|r| filter.matches(r, name_re.as_ref())))
    }

    /// Applies a patch to a resource under the repository lock and bumps
    /// `updated_at`.
    pub fn update<F>(&self, id: &str, patch: F) -> StoreResult<()>
    where
        F: FnOnce(&mut R),
    {
        let mut docs = self.docs.write();
        let resource = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch(resource);
        resource.meta_mut().updated_at = Utc::now();
        Ok(())
    }

    /// Deletes the record outright. Used by the deletion confirmers once
    /// subsystem and job-ledger quiescence hold.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.docs.write().remove(id).is_some();
        if removed {
            debug!(kind = %R::kind(), id, "deleted resource record");
        }
        removed
    }

    /// Bumps `accessed_at` to now.
    pub fn mark_accessed(&self, id: &str) -> StoreResult<()> {
        self.update(id, |r| r.meta_mut().accessed_at = Utc::now())
    }

    /// Records a successful repair.
    pub fn mark_repaired(&self, id: &str) -> StoreResult<()> {
        self.update(id, |r| r.meta_mut().repaired_at = Some(Utc::now()))
    }

    /// Checks whether `activity` could be started right now, without
    /// starting it.
    pub fn can_add_activity(&self, id: &str, activity: Activity) -> StoreResult<()> {
        let docs = self.docs.read();
        let resource = docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        resource
            .meta()
            .activities
            .can_add(activity)
            .map_err(|e| StoreError::busy(id, e))
    }

    /// Starts `activity` on the resource; first writer wins. The add is
    /// checked and applied under one write lock.
    pub fn start_activity(&self, id: &str, activity: Activity) -> StoreResult<()> {
        let mut docs = self.docs.write();
        let resource = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        resource
            .meta_mut()
            .activities
            .add(activity)
            .map_err(|e| StoreError::busy(id, e))
    }

    /// Starts `activity` unless it is already registered. Used by job
    /// entry hooks, which may re-run after a retry with the activity
    /// still in place.
    pub fn ensure_activity(&self, id: &str, activity: Activity) -> StoreResult<()> {
        let mut docs = self.docs.write();
        let resource = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if resource.meta().activities.contains(activity) {
            return Ok(());
        }
        resource
            .meta_mut()
            .activities
            .add(activity)
            .map_err(|e| StoreError::busy(id, e))
    }

    /// Removes `activity` from the resource. Removing an absent activity
    /// or from an absent resource is not an error; jobs call this on
    /// exit paths where the record may already be gone.
    pub fn remove_activity(&self, id: &str, activity: Activity) {
        if let Some(resource) = self.docs.write().get_mut(id) {
            resource.meta_mut().activities.remove(activity);
        }
    }
}

impl ResourceRepo<Deployment> {
    /// Sets the custom-domain status on a deployment.
    pub fn update_custom_domain_status(
        &self,
        id: &str,
        status: CustomDomainStatus,
    ) -> StoreResult<()> {
        self.update(id, |d| {
            if let Some(cd) = d.custom_domain.as_mut() {
                cd.status = status;
            }
        })
    }

    /// Deployments with a custom domain still needing verification,
    /// excluding any currently being deleted.
    #[must_use]
    pub fn list_with_any_pending_custom_domain(&self) -> Vec<Deployment> {
        self.docs
            .read()
            .values()
            .filter(|d| {
                !d.meta.activities.contains(Activity::BeingDeleted)
                    && d.custom_domain
                        .as_ref()
                        .is_some_and(|cd| cd.status.needs_verification())
            })
            .cloned()
            .collect()
    }
}

impl ResourceRepo<Vm> {
    /// Sets the custom-domain status on one named VM port.
    pub fn update_custom_domain_status(
        &self,
        id: &str,
        port_name: &str,
        status: CustomDomainStatus,
    ) -> StoreResult<()> {
        self.update(id, |vm| {
            if let Some(cd) = vm
                .port_map
                .get_mut(port_name)
                .and_then(|p| p.http_proxy.as_mut())
                .and_then(|proxy| proxy.custom_domain.as_mut())
            {
                cd.status = status;
            }
        })
    }

    /// VMs with at least one port whose custom domain still needs
    /// verification, excluding any currently being deleted.
    #[must_use]
    pub fn list_with_any_pending_custom_domain(&self) -> Vec<Vm> {
        self.docs
            .read()
            .values()
            .filter(|vm| {
                !vm.meta.activities.contains(Activity::BeingDeleted)
                    && vm.port_map.values().any(|p| {
                        p.http_proxy
                            .as_ref()
                            .and_then(|proxy| proxy.custom_domain.as_ref())
                            .is_some_and(|cd| cd.status.needs_verification())
                    })
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_model::{CustomDomain, HttpProxy, ResourceMeta, VmPort};

    fn deployment(id: &str, name: &str, owner: &str) -> Deployment {
        Deployment {
            meta: ResourceMeta::new(id, name, owner, "se-flem"),
            image: "nginx:latest".into(),
            k8s: Default::default(),
            harbor: Default::default(),
            custom_domain: None,
            disabled: false,
        }
    }

    fn idle(mut d: Deployment) -> Deployment {
        d.meta.activities.remove(Activity::BeingCreated);
        d
    }

    #[test]
    fn duplicate_name_per_owner_is_conflict() {
        let repo = ResourceRepo::<Deployment>::new();
        repo.create(deployment("d1", "web", "u1")).unwrap();
        let err = repo.create(deployment("d2", "web", "u1")).unwrap_err();
        assert!(matches!(err, StoreError::NonUniqueField { ref field, .. } if field == "name"));

        // Same name under another owner is fine.
        repo.create(deployment("d3", "web", "u2")).unwrap();
    }

    #[test]
    fn start_activity_enforces_gating() {
        let repo = ResourceRepo::<Deployment>::new();
        repo.create(idle(deployment("d1", "web", "u1"))).unwrap();

        repo.start_activity("d1", Activity::BeingDeleted).unwrap();
        let err = repo.start_activity("d1", Activity::Updating).unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn get_by_name_skips_soft_deleted_records() {
        let repo = ResourceRepo::<Deployment>::new();
        repo.create(idle(deployment("d1", "web", "u1"))).unwrap();
        repo.update("d1", |d| d.meta.deleted_at = Some(Utc::now()))
            .unwrap();
        assert!(repo.get_by_name("u1", "web").is_none());

        // The freed name resolves to its replacement.
        repo.create(idle(deployment("d2", "web", "u1"))).unwrap();
        assert_eq!(repo.get_by_name("u1", "web").unwrap().meta.id, "d2");
    }

    #[test]
    fn filter_no_activities_excludes_busy_resources() {
        let repo = ResourceRepo::<Deployment>::new();
        repo.create(deployment("d1", "web", "u1")).unwrap(); // being-created
        repo.create(idle(deployment("d2", "api", "u1"))).unwrap();

        let idle_list = repo
            .list(&ResourceFilter::new().with_no_activities())
            .unwrap();
        assert_eq!(idle_list.len(), 1);
        assert_eq!(idle_list[0].meta.id, "d2");
    }

    #[test]
    fn pending_custom_domain_listing_excludes_being_deleted() {
        let repo = ResourceRepo::<Deployment>::new();

        let mut with_domain = idle(deployment("d1", "web", "u1"));
        with_domain.custom_domain = Some(CustomDomain::new("example.org", "abc123"));
        repo.create(with_domain).unwrap();

        let mut deleting = idle(deployment("d2", "api", "u1"));
        deleting.custom_domain = Some(CustomDomain::new("other.org", "zzz"));
        repo.create(deleting).unwrap();
        repo.start_activity("d2", Activity::BeingDeleted).unwrap();

        let pending = repo.list_with_any_pending_custom_domain();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].meta.id, "d1");
    }

    #[test]
    fn vm_port_custom_domain_status_update() {
        let repo = ResourceRepo::<Vm>::new();
        let mut vm = Vm {
            meta: ResourceMeta::new("v1", "box", "u1", "se-flem"),
            port_map: Default::default(),
            k8s: Default::default(),
            port_registrations: Vec::new(),
            running: true,
        };
        vm.meta.activities.remove(Activity::BeingCreated);
        vm.port_map.insert(
            "http".into(),
            VmPort {
                port: 8080,
                protocol: "tcp".into(),
                http_proxy: Some(HttpProxy {
                    name: "box-http".into(),
                    custom_domain: Some(CustomDomain::new("example.org", "s3cr3t")),
                }),
            },
        );
        repo.create(vm).unwrap();

        assert_eq!(repo.list_with_any_pending_custom_domain().len(), 1);
        repo.update_custom_domain_status("v1", "http", CustomDomainStatus::Active)
            .unwrap();
        assert!(repo.list_with_any_pending_custom_domain().is_empty());
    }

    #[test]
    fn last_accessed_filter() {
        let repo = ResourceRepo::<Deployment>::new();
        repo.create(idle(deployment("d1", "web", "u1"))).unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = repo
            .list(&ResourceFilter::new().last_accessed_before(cutoff))
            .unwrap();
        assert_eq!(stale.len(), 1);

        let fresh = repo
            .list(&ResourceFilter::new().last_accessed_before(Utc::now() - chrono::Duration::hours(1)))
            .unwrap();
        assert!(fresh.is_empty());
    }
}
