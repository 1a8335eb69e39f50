//! Activity flags recording in-flight work on a resource.
//!
//! An activity is a coarse per-resource lock: a job registers one on
//! entry and removes it on exit, and the repair schedulers only touch
//! resources with no activities at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ModelError;

/// A named in-flight operation attached to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activity {
    /// The resource is being provisioned for the first time.
    BeingCreated,
    /// A user-driven update is in flight.
    Updating,
    /// A repair job is reconciling drift.
    Repairing,
    /// The resource is being torn down; only deletion work may proceed.
    BeingDeleted,
}

impl Activity {
    /// Returns the wire name of this activity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BeingCreated => "being-created",
            Self::Updating => "updating",
            Self::Repairing => "repairing",
            Self::BeingDeleted => "being-deleted",
        }
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of activities currently registered on a resource, each with
/// the time it was started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySet {
    #[serde(default)]
    entries: BTreeMap<Activity, DateTime<Utc>>,
}

impl ActivitySet {
    /// An empty activity set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The activity set of a freshly created resource: exactly
    /// [`Activity::BeingCreated`].
    #[must_use]
    pub fn newly_created() -> Self {
        let mut set = Self::new();
        set.entries.insert(Activity::BeingCreated, Utc::now());
        set
    }

    /// Returns true if no activities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the given activity is registered.
    #[must_use]
    pub fn contains(&self, activity: Activity) -> bool {
        self.entries.contains_key(&activity)
    }

    /// When the given activity was started, if registered.
    #[must_use]
    pub fn started_at(&self, activity: Activity) -> Option<DateTime<Utc>> {
        self.entries.get(&activity).copied()
    }

    /// Iterates over registered activities.
    pub fn iter(&self) -> impl Iterator<Item = (Activity, DateTime<Utc>)> + '_ {
        self.entries.iter().map(|(a, t)| (*a, *t))
    }

    /// Checks whether `activity` may be added without violating the
    /// mutual-constraint rules:
    ///
    /// - a resource with `being-deleted` rejects everything except more
    ///   deletion work,
    /// - `updating` and `repairing` never coexist.
    pub fn can_add(&self, activity: Activity) -> Result<(), ModelError> {
        if self.contains(activity) {
            return Err(ModelError::ActivityBusy(activity));
        }

        if self.contains(Activity::BeingDeleted) && activity != Activity::BeingDeleted {
            return Err(ModelError::ActivityBusy(Activity::BeingDeleted));
        }

        match activity {
            Activity::Updating if self.contains(Activity::Repairing) => {
                Err(ModelError::ActivityBusy(Activity::Repairing))
            }
            Activity::Repairing if self.contains(Activity::Updating) => {
                Err(ModelError::ActivityBusy(Activity::Updating))
            }
            _ => Ok(()),
        }
    }

    /// Adds `activity` after checking the constraints. First writer wins:
    /// adding an already-present activity fails.
    pub fn add(&mut self, activity: Activity) -> Result<(), ModelError> {
        self.can_add(activity)?;
        self.entries.insert(activity, Utc::now());
        Ok(())
    }

    /// Removes `activity` if present. Removing an absent activity is not
    /// an error.
    pub fn remove(&mut self, activity: Activity) {
        self.entries.remove(&activity);
    }
}
