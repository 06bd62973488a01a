//! # Leader Election
//!
//! `coordination.k8s.io/v1` Lease based election so that only one replica runs
//! the controllers. Writes carry the lease's resource version; losing a race
//! surfaces as a 409 and is treated as "not leader".
//!
//! Lease timestamps are read and written through their JSON form.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Api, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Lease shared by all replicas
pub const LEADER_LEASE_NAME: &str = "f1c68560.kyma-project.io";

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// The fields of a Lease that decide who may hold it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LeaseView {
    holder: Option<String>,
    renew_time: Option<DateTime<Utc>>,
    duration_secs: Option<i64>,
    transitions: i64,
    resource_version: Option<String>,
}

impl LeaseView {
    fn from_lease(lease: &Lease) -> Self {
        let spec = serde_json::to_value(&lease.spec).unwrap_or_default();
        Self {
            holder: spec["holderIdentity"].as_str().map(str::to_string),
            renew_time: spec["renewTime"]
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc)),
            duration_secs: spec["leaseDurationSeconds"].as_i64(),
            transitions: spec["leaseTransitions"].as_i64().unwrap_or(0),
            resource_version: lease.metadata.resource_version.clone(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.renew_time, self.duration_secs) {
            (Some(renewed), Some(secs)) => now > renewed + chrono::Duration::seconds(secs),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseAction {
    Renew,
    TakeOver,
    Wait,
}

fn decide(view: &LeaseView, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    if view.holder.as_deref() == Some(identity) {
        LeaseAction::Renew
    } else if view.holder.is_none() || view.is_expired(now) {
        LeaseAction::TakeOver
    } else {
        LeaseAction::Wait
    }
}

fn micro_time(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Clone)]
pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    fn lease(&self, now: DateTime<Utc>, acquired: Option<DateTime<Utc>>, view: &LeaseView) -> Result<Lease, Error> {
        let mut spec = json!({
            "holderIdentity": self.identity,
            "leaseDurationSeconds": LEASE_DURATION.as_secs(),
            "renewTime": micro_time(now),
            "leaseTransitions": view.transitions,
        });
        if let Some(acquired) = acquired {
            spec["acquireTime"] = json!(micro_time(acquired));
            spec["leaseTransitions"] = json!(view.transitions + 1);
        }
        Ok(serde_json::from_value(json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {
                "name": LEADER_LEASE_NAME,
                "namespace": self.namespace,
                "resourceVersion": view.resource_version,
            },
            "spec": spec,
        }))?)
    }

    /// One acquire-or-renew round; `Ok(false)` while someone else holds the lease
    async fn try_acquire_or_renew(&self) -> Result<bool, Error> {
        let now = Utc::now();
        let Some(existing) = self.leases.get_opt(LEADER_LEASE_NAME).await? else {
            let lease = self.lease(now, Some(now), &LeaseView::default())?;
            return match self.leases.create(&PostParams::default(), &lease).await {
                Ok(_) => {
                    info!(identity = %self.identity, "created leader lease");
                    Ok(true)
                }
                Err(e) => {
                    let err = Error::from(e);
                    if err.is_already_exists() || err.is_conflict() {
                        Ok(false)
                    } else {
                        Err(err)
                    }
                }
            };
        };

        let view = LeaseView::from_lease(&existing);
        let lease = match decide(&view, &self.identity, now) {
            LeaseAction::Wait => return Ok(false),
            LeaseAction::Renew => self.lease(now, None, &view)?,
            LeaseAction::TakeOver => self.lease(now, Some(now), &view)?,
        };
        match self
            .leases
            .replace(LEADER_LEASE_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = Error::from(e);
                if err.is_conflict() {
                    debug!(identity = %self.identity, "lease changed concurrently");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Block until this replica holds the lease
    pub async fn acquire(&self) {
        info!(identity = %self.identity, lease = LEADER_LEASE_NAME, "waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "👑 leadership acquired");
                    return;
                }
                Ok(false) => debug!(identity = %self.identity, "lease held by another replica"),
                Err(e) => warn!(identity = %self.identity, error = %e, "failed to acquire lease, retrying"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Renew the lease until it is lost; returns only on loss
    pub async fn hold(&self) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "leadership lost");
                    return;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "leadership lost");
                    return;
                }
            }
        }
    }
}
