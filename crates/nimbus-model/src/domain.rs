//! Custom-domain bindings verified through DNS TXT records.

use serde::{Deserialize, Serialize};

/// Verification state of a custom-domain binding.
///
/// The only legal transitions are `Pending → Active`,
/// `Pending → VerificationFailed` and `VerificationFailed → Active`;
/// the domain confirmer drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CustomDomainStatus {
    /// Waiting for the user to publish the TXT secret.
    Pending,
    /// A TXT record matching the secret was found.
    Active,
    /// TXT records exist but none matches the secret.
    VerificationFailed,
}

impl CustomDomainStatus {
    /// True while the binding still needs confirmer attention.
    #[must_use]
    pub const fn needs_verification(&self) -> bool {
        matches!(self, Self::Pending | Self::VerificationFailed)
    }
}

/// A user-supplied DNS name bound to a deployment or VM port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDomain {
    /// The user's domain, e.g. `example.org`.
    pub domain: String,
    /// Secret the user must publish in a TXT record. Generated once per
    /// binding and never rotated.
    pub secret: String,
    /// Current verification state.
    pub status: CustomDomainStatus,
}

impl CustomDomain {
    /// Creates a new pending binding with the given secret.
    #[must_use]
    pub fn new(domain: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            secret: secret.into(),
            status: CustomDomainStatus::Pending,
        }
    }
}
