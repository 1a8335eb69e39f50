//! # nimbus-model
//!
//! Shared data model for the Nimbus control plane.
//!
//! This crate provides:
//!
//! - [`Activity`]: In-flight operation flags that gate resource mutations
//! - [`Deployment`], [`Vm`], [`StorageManager`], [`GpuClaim`]: Managed resources
//! - [`CustomDomain`]: User-supplied DNS bindings verified by TXT secret
//! - [`Job`], [`JobKind`], [`JobStatus`]: Durable units of asynchronous work
//! - [`Zone`], [`TimerConfig`]: Zone capabilities and worker cadences
//!
//! Every mutation of a resource flows through a job or a confirmer pass;
//! the types here only describe state, they never talk to a store.

#![forbid(unsafe_code)]

pub mod activity;
pub mod config;
pub mod domain;
pub mod error;
pub mod job;
pub mod resource;
pub mod subsystems;

pub use activity::{Activity, ActivitySet};
pub use config::{Lifetimes, TimerConfig, Zone, ZoneCapability};
pub use domain::{CustomDomain, CustomDomainStatus};
pub use error::ModelError;
pub use job::{Job, JobKind, JobStatus};
pub use resource::{
    Deployment, GpuClaim, GpuLease, HttpProxy, Resource, ResourceKind, ResourceMeta,
    StorageManager, Vm, VmPort,
};
pub use subsystems::{HarborSubsystem, K8sObject, K8sSubsystem, PortRegistration};
