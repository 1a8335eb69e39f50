//! Custom-domain verification.
//!
//! Each pass looks up the TXT record at `<txt_subdomain>.<domain>` for
//! every binding still needing verification. A record matching the
//! secret activates the binding; records that exist but do not match
//! mark it failed (the user will retry); an absent record leaves the
//! binding pending, since DNS propagation can take a while. Only
//! transport-level lookup failures count as worker errors.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimbus_model::{CustomDomain, CustomDomainStatus, TimerConfig};
use nimbus_store::Database;
use nimbus_worker::spawn_periodic;

use crate::error::{ReconcileError, ReconcileResult};

/// Transport-level DNS failure. "No such record" is not an error and
/// is reported through `Ok(None)` instead.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DnsLookupError(pub String);

/// Resolves TXT records. The production binary plugs in a real
/// resolver; tests use a static table.
pub trait TxtResolver: Send + Sync {
    /// Returns the TXT records published at `name`, or `Ok(None)` when
    /// the name does not exist.
    fn lookup_txt(&self, name: &str) -> Result<Option<Vec<String>>, DnsLookupError>;
}

enum Verdict {
    Verified,
    WrongRecords,
    NoRecords,
}

// A wrong record may be arbitrarily long; cut it to the expected
// secret's length so the log shows what DNS returned without echoing
// unbounded data.
fn truncate_received(record: &str, limit: usize) -> String {
    if record.chars().count() > limit {
        let head: String = record.chars().take(limit).collect();
        format!("{head}...")
    } else {
        record.to_string()
    }
}

fn verify(
    resolver: &dyn TxtResolver,
    txt_subdomain: &str,
    binding: &CustomDomain,
) -> ReconcileResult<Verdict> {
    let name = format!("{txt_subdomain}.{}", binding.domain);
    match resolver.lookup_txt(&name) {
        Ok(Some(records)) if !records.is_empty() => {
            if records.iter().any(|r| r == &binding.secret) {
                Ok(Verdict::Verified)
            } else {
                let received = records.first().map_or_else(String::new, |r| {
                    truncate_received(r, binding.secret.chars().count())
                });
                warn!(
                    domain = %binding.domain,
                    received = %received,
                    expected = %binding.secret,
                    "txt records present but none matches"
                );
                Ok(Verdict::WrongRecords)
            }
        }
        Ok(_) => {
            debug!(domain = %binding.domain, record = %name, "txt record not published yet");
            Ok(Verdict::NoRecords)
        }
        Err(e) => Err(ReconcileError::Dns(e.to_string())),
    }
}

/// One confirmer pass over every pending binding, deployments and VM
/// ports alike.
pub fn confirm_custom_domains(
    db: &Database,
    resolver: &dyn TxtResolver,
    txt_subdomain: &str,
) -> ReconcileResult<()> {
    for deployment in db.deployments.list_with_any_pending_custom_domain() {
        let Some(binding) = &deployment.custom_domain else {
            continue;
        };
        match verify(resolver, txt_subdomain, binding)? {
            Verdict::Verified => {
                info!(resource_id = %deployment.meta.id, domain = %binding.domain,
                    "custom domain verified");
                db.deployments
                    .update_custom_domain_status(&deployment.meta.id, CustomDomainStatus::Active)?;
            }
            Verdict::WrongRecords => {
                db.deployments.update_custom_domain_status(
                    &deployment.meta.id,
                    CustomDomainStatus::VerificationFailed,
                )?;
            }
            Verdict::NoRecords => {}
        }
    }

    for vm in db.vms.list_with_any_pending_custom_domain() {
        for (port_name, port) in &vm.port_map {
            let Some(binding) = port
                .http_proxy
                .as_ref()
                .and_then(|proxy| proxy.custom_domain.as_ref())
            else {
                continue;
            };
            if !binding.status.needs_verification() {
                continue;
            }
            match verify(resolver, txt_subdomain, binding)? {
                Verdict::Verified => {
                    info!(resource_id = %vm.meta.id, port = %port_name,
                        domain = %binding.domain, "custom domain verified");
                    db.vms.update_custom_domain_status(
                        &vm.meta.id,
                        port_name,
                        CustomDomainStatus::Active,
                    )?;
                }
                Verdict::WrongRecords => {
                    db.vms.update_custom_domain_status(
                        &vm.meta.id,
                        port_name,
                        CustomDomainStatus::VerificationFailed,
                    )?;
                }
                Verdict::NoRecords => {}
            }
        }
    }

    Ok(())
}

/// Spawns the custom-domain confirmer.
pub fn setup_custom_domain_confirmer(
    db: &Database,
    resolver: Arc<dyn TxtResolver>,
    txt_subdomain: String,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> JoinHandle<()> {
    let db = db.clone();
    spawn_periodic(
        "customDomainConfirmer",
        timers.custom_domain_confirm_interval(),
        db.worker_status.clone(),
        token.clone(),
        move || confirm_custom_domains(&db, resolver.as_ref(), &txt_subdomain),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_model::{Activity, Deployment, HttpProxy, ResourceMeta, Vm, VmPort};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Static TXT table; a missing name resolves to "no such record".
    struct StaticResolver {
        records: Mutex<HashMap<String, Vec<String>>>,
        fail: bool,
    }

    impl StaticResolver {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                fail: false,
            }
        }

        fn publish(&self, name: &str, value: &str) {
            self.records
                .lock()
                .entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    impl TxtResolver for StaticResolver {
        fn lookup_txt(&self, name: &str) -> Result<Option<Vec<String>>, DnsLookupError> {
            if self.fail {
                return Err(DnsLookupError("connection refused".into()));
            }
            Ok(self.records.lock().get(name).cloned())
        }
    }

    fn deployment_with_domain(id: &str, domain: &str, secret: &str) -> Deployment {
        let mut d = Deployment {
            meta: ResourceMeta::new(id, "web", "u1", "se-flem"),
            image: "nginx:latest".into(),
            k8s: Default::default(),
            harbor: Default::default(),
            custom_domain: Some(CustomDomain::new(domain, secret)),
            disabled: false,
        };
        d.meta.activities.remove(Activity::BeingCreated);
        d
    }

    fn domain_status(db: &Database, id: &str) -> CustomDomainStatus {
        db.deployments
            .get(id)
            .unwrap()
            .custom_domain
            .unwrap()
            .status
    }

    #[test]
    fn matching_record_activates_binding() {
        let db = Database::default();
        db.deployments
            .create(deployment_with_domain("d1", "example.org", "s3cr3t"))
            .unwrap();
        let resolver = StaticResolver::new();
        resolver.publish("_nimbus.example.org", "s3cr3t");

        confirm_custom_domains(&db, &resolver, "_nimbus").unwrap();
        assert_eq!(domain_status(&db, "d1"), CustomDomainStatus::Active);
    }

    #[test]
    fn wrong_record_marks_failed_but_can_recover() {
        let db = Database::default();
        db.deployments
            .create(deployment_with_domain("d1", "example.org", "s3cr3t"))
            .unwrap();
        let resolver = StaticResolver::new();
        resolver.publish("_nimbus.example.org", "wrong-value");

        confirm_custom_domains(&db, &resolver, "_nimbus").unwrap();
        assert_eq!(
            domain_status(&db, "d1"),
            CustomDomainStatus::VerificationFailed
        );

        // User fixes the record; the binding recovers on the next pass.
        resolver.publish("_nimbus.example.org", "s3cr3t");
        confirm_custom_domains(&db, &resolver, "_nimbus").unwrap();
        assert_eq!(domain_status(&db, "d1"), CustomDomainStatus::Active);
    }

    #[test]
    fn absent_record_leaves_binding_pending() {
        let db = Database::default();
        db.deployments
            .create(deployment_with_domain("d1", "example.org", "s3cr3t"))
            .unwrap();
        let resolver = StaticResolver::new();

        confirm_custom_domains(&db, &resolver, "_nimbus").unwrap();
        assert_eq!(domain_status(&db, "d1"), CustomDomainStatus::Pending);
    }

    #[test]
    fn transport_failure_is_a_worker_error() {
        let db = Database::default();
        db.deployments
            .create(deployment_with_domain("d1", "example.org", "s3cr3t"))
            .unwrap();
        let resolver = StaticResolver {
            records: Mutex::new(HashMap::new()),
            fail: true,
        };

        let err = confirm_custom_domains(&db, &resolver, "_nimbus").unwrap_err();
        assert!(matches!(err, ReconcileError::Dns(_)));
        assert_eq!(domain_status(&db, "d1"), CustomDomainStatus::Pending);
    }

    #[test]
    fn vm_port_binding_is_verified_per_port() {
        let db = Database::default();
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
                    custom_domain: Some(CustomDomain::new("vm.example.org", "vmsecret")),
                }),
            },
        );
        db.vms.create(vm).unwrap();

        let resolver = StaticResolver::new();
        resolver.publish("_nimbus.vm.example.org", "vmsecret");

        confirm_custom_domains(&db, &resolver, "_nimbus").unwrap();
        let vm = db.vms.get("v1").unwrap();
        let status = vm.port_map["http"]
            .http_proxy
            .as_ref()
            .unwrap()
            .custom_domain
            .as_ref()
            .unwrap()
            .status;
        assert_eq!(status, CustomDomainStatus::Active);
    }

    #[test]
    fn mismatch_log_cuts_received_record_to_secret_length() {
        // Longer than the expected secret: cut and mark the cut.
        assert_eq!(truncate_received("0123456789abcdef", 6), "012345...");
        // At or under the secret's length: shown as-is.
        assert_eq!(truncate_received("exact!", 6), "exact!");
        assert_eq!(truncate_received("ab", 6), "ab");
    }
}
