//! # Conditions
//!
//! Condition model shared by `Runtime` and `GardenerCluster` status.
//!
//! A resource's progress is recorded as a small ordered set of conditions, at most one
//! per `type`. The coarse `state` shown to users is always derived from these conditions,
//! never written on its own.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents one observed aspect of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason for the last transition
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Last time the status changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

/// Ordered set of conditions keyed by type
///
/// Serialized as a plain list so it stays compatible with `kubectl` tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the condition of the given type.
    ///
    /// The transition time is only stamped when the status changes (or the type is new).
    /// Returns `true` when anything observable changed.
    pub fn upsert(
        &mut self,
        condition_type: &str,
        reason: &str,
        status: ConditionStatus,
        message: &str,
    ) -> bool {
        self.upsert_at(Utc::now(), condition_type, reason, status, message)
    }

    pub fn upsert_at(
        &mut self,
        now: DateTime<Utc>,
        condition_type: &str,
        reason: &str,
        status: ConditionStatus,
        message: &str,
    ) -> bool {
        let stamp = || Some(now.to_rfc3339_opts(SecondsFormat::Secs, true));

        let Some(index) = self.0.iter().position(|c| c.r#type == condition_type) else {
            self.0.push(Condition {
                r#type: condition_type.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: stamp(),
            });
            return true;
        };

        // Duplicates can only come from objects written by someone else
        let mut seen = false;
        self.0.retain(|c| {
            if c.r#type != condition_type {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        });

        let existing = &mut self.0[index];
        let status_changed = existing.status != status;
        let changed =
            status_changed || existing.reason != reason || existing.message != message;

        if status_changed || existing.last_transition_time.is_none() {
            existing.last_transition_time = stamp();
        }
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        changed
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.r#type == condition_type)
    }

    pub fn remove(&mut self, condition_type: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|c| c.r#type != condition_type);
        before != self.0.len()
    }

    /// Drop every condition whose type `keep` rejects; returns whether any was dropped
    pub fn retain_types(&mut self, keep: impl Fn(&str) -> bool) -> bool {
        let before = self.0.len();
        self.0.retain(|c| keep(&c.r#type));
        before != self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(conditions: Vec<Condition>) -> Self {
        let mut set = Self::new();
        for c in conditions {
            if set.get(&c.r#type).is_none() {
                set.0.push(c);
            }
        }
        set
    }
}
