//! Mirrors the Runtime's OIDC issuers onto the managed cluster.
//!
//! Managed `OpenIDConnect` resources are replaced wholesale on every pass: all
//! resources carrying the managed-by label are deleted, then one resource per
//! issuer is created as `kyma-oidc-<index>`. Resources without the label are
//! never touched.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{FsmEnv, StateId, SystemState, Transition};
use crate::constants::{LABEL_KYMA_MANAGED_BY, MANAGED_BY_VALUE, OIDC_EXTENSION_TYPE, OIDC_RESOURCE_PREFIX};
use crate::controller::runtime::cluster_client::RuntimeClusterClient;
use crate::crd::{ConditionStatus, OidcConfig, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;
use crate::gardener::types::Jwks;
use crate::gardener::{OpenIDConnect, OpenIDConnectSpec};

const OIDC_ERROR_MESSAGE: &str = "Failed to create OpenIDConnect resource. Scheduling for retry";

pub(crate) fn managed_selector() -> String {
    format!("{LABEL_KYMA_MANAGED_BY}={MANAGED_BY_VALUE}")
}

fn openid_connect_resource(config: &OidcConfig, index: usize) -> OpenIDConnect {
    let mut resource = OpenIDConnect::new(
        &format!("{OIDC_RESOURCE_PREFIX}-{index}"),
        OpenIDConnectSpec {
            issuer_url: config.issuer_url.clone().unwrap_or_default(),
            client_id: config.client_id.clone().unwrap_or_default(),
            username_claim: config.username_claim.clone(),
            username_prefix: config.username_prefix.clone(),
            groups_claim: config.groups_claim.clone(),
            groups_prefix: config.groups_prefix.clone(),
            required_claims: config.required_claims.clone(),
            supported_signing_algs: config.signing_algs.clone(),
            jwks: Jwks {
                keys: config.jwks.clone(),
            },
        },
    );
    resource.metadata.labels = Some(BTreeMap::from([(
        LABEL_KYMA_MANAGED_BY.to_string(),
        MANAGED_BY_VALUE.to_string(),
    )]));
    resource
}

/// Issuers to install: the Runtime's additional issuers, or the shared default tenant
fn desired_issuers(env: &FsmEnv, s: &SystemState) -> Result<Vec<OidcConfig>, Error> {
    let additional = s.runtime.additional_oidc();
    if additional.is_empty() {
        return Ok(vec![env
            .converter
            .config
            .cluster
            .default_shared_ias_tenant
            .to_oidc_config()]);
    }
    if let Some(index) = additional.iter().position(|c| !c.is_complete()) {
        return Err(Error::validation(format!(
            "additional OIDC config #{index} requires both clientID and issuerURL"
        )));
    }
    Ok(additional.to_vec())
}

async fn replace_oidc_resources(
    client: &dyn RuntimeClusterClient,
    issuers: &[OidcConfig],
) -> Result<(), Error> {
    for existing in client.list_oidc(&managed_selector()).await? {
        if let Some(name) = existing.metadata.name.as_deref() {
            client.delete_oidc(name).await?;
        }
    }
    for (index, issuer) in issuers.iter().enumerate() {
        client
            .create_oidc(&openid_connect_resource(issuer, index))
            .await?;
    }
    Ok(())
}

pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    let enabled = s
        .shoot
        .as_ref()
        .ok_or_else(|| Error::invariant("OIDC configuration reached without a shoot"))?
        .is_extension_enabled(OIDC_EXTENSION_TYPE);

    if !enabled {
        debug!(shoot = s.shoot_name(), "OIDC extension is disabled");
        s.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcAndCMsConfigured,
            ConditionStatus::True,
            "OIDC extension disabled",
        );
        return Ok(Transition::Switch(StateId::ApplyClusterRoleBindings));
    }

    let issuers = match desired_issuers(env, s) {
        Ok(issuers) => issuers,
        Err(e) => {
            warn!(shoot = s.shoot_name(), error = %e, "invalid OIDC configuration");
            s.update_condition(
                RuntimeConditionType::OidcAndCMsConfigured,
                RuntimeConditionReason::ConfigurationError,
                ConditionStatus::False,
                &e.to_string(),
            );
            return Ok(Transition::RequeueAfter(env.requeue.failure));
        }
    };

    let result = match s.cluster_client(env.clusters.as_ref()).await {
        Ok(client) => replace_oidc_resources(client.as_ref(), &issuers).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(shoot = s.shoot_name(), error = %e, "{OIDC_ERROR_MESSAGE}");
        s.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcError,
            ConditionStatus::False,
            OIDC_ERROR_MESSAGE,
        );
        return Ok(Transition::RequeueAfter(env.requeue.control_plane));
    }

    debug!(shoot = s.shoot_name(), issuers = issuers.len(), "OIDC has been configured");
    s.update_condition(
        RuntimeConditionType::OidcAndCMsConfigured,
        RuntimeConditionReason::OidcAndCMsConfigured,
        ConditionStatus::True,
        "OIDC and kyma-provisioning-info configuration completed",
    );
    Ok(Transition::Switch(StateId::ApplyClusterRoleBindings))
}
