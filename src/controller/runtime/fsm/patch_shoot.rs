use tracing::{info, warn};

use super::{FsmEnv, SystemState, Transition};
use crate::crd::{ConditionStatus, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;

/// Re-run the converter and server-side apply the result over the live shoot.
///
/// Resource references other controllers added to the live shoot are carried over.
pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    let live_resources = s
        .shoot
        .as_ref()
        .map(|shoot| shoot.spec.resources.clone())
        .unwrap_or_default();

    let shoot = match env.converter.for_patch(live_resources).to_shoot(&s.runtime) {
        Ok(shoot) => shoot,
        Err(e) => {
            warn!(shoot = s.shoot_name(), error = %e, "failed to convert runtime");
            s.update_condition(
                RuntimeConditionType::Provisioned,
                RuntimeConditionReason::ConversionError,
                ConditionStatus::False,
                &format!("Runtime conversion error: {e}"),
            );
            return Ok(Transition::RequeueAfter(env.requeue.failure));
        }
    };

    if let Err(e) = env.shoots.apply(&shoot).await {
        warn!(shoot = s.shoot_name(), error = %e, "failed to patch shoot");
        let reason = if e.is_conflict() {
            RuntimeConditionReason::ProcessingError
        } else {
            RuntimeConditionReason::GardenerError
        };
        s.update_condition(
            RuntimeConditionType::Provisioned,
            reason,
            ConditionStatus::False,
            &format!("Gardener API shoot patch error: {e}"),
        );
        return Ok(Transition::RequeueAfter(env.requeue.failure));
    }

    info!(
        shoot = s.shoot_name(),
        generation = s.runtime.generation(),
        "shoot patched"
    );
    s.runtime.reset_bootstrap_conditions();
    s.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ShootUpdatePending,
        ConditionStatus::Unknown,
        "Shoot is pending for update",
    );
    Ok(Transition::RequeueAfter(env.requeue.shoot_reconcile))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testutils::*;
    use super::*;
    use crate::constants::{ANNOTATION_RUNTIME_GENERATION, AUDIT_LOG_SECRET_REFERENCE};
    use crate::controller::runtime::store::MockRuntimeStore;
    use crate::gardener::client::MockShootClient;
    use crate::gardener::types::{
        CrossVersionObjectReference, LastOperationState, LastOperationType, NamedResourceReference,
    };

    #[tokio::test]
    async fn test_patch_keeps_live_resources_and_bumps_generation() {
        let mut shoots = MockShootClient::new();
        shoots
            .expect_apply()
            .withf(|shoot| {
                let names: Vec<&str> = shoot.spec.resources.iter().map(|r| r.name.as_str()).collect();
                let generation = shoot
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(ANNOTATION_RUNTIME_GENERATION))
                    .map(String::as_str);
                names == ["registry-cache", AUDIT_LOG_SECRET_REFERENCE] && generation == Some("6")
            })
            .times(1)
            .returning(|_| Ok(()));
        let env = env_with(shoots, MockRuntimeStore::new(), Arc::default());

        let mut live = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded);
        live.spec.resources = vec![NamedResourceReference {
            name: "registry-cache".to_string(),
            resource_ref: CrossVersionObjectReference {
                api_version: "v1".to_string(),
                kind: "Secret".to_string(),
                name: "registry-cache-secret".to_string(),
            },
        }];
        let mut rt = runtime();
        rt.metadata.generation = Some(6);

        let mut s = SystemState::new(rt, Some(live));
        let transition = run(&env, &mut s).await.unwrap();

        assert_eq!(transition, Transition::RequeueAfter(env.requeue.shoot_reconcile));
        assert_eq!(
            condition(&s, RuntimeConditionType::Provisioned).reason,
            "ShootUpdatePending"
        );
    }

    #[tokio::test]
    async fn test_apply_failure() {
        let mut shoots = MockShootClient::new();
        shoots
            .expect_apply()
            .returning(|_| Err(Error::not_found("Shoot", "c-6ea9b9b")));
        let env = env_with(shoots, MockRuntimeStore::new(), Arc::default());

        let mut s = SystemState::new(
            runtime(),
            Some(shoot(LastOperationType::Reconcile, LastOperationState::Succeeded)),
        );
        let transition = run(&env, &mut s).await.unwrap();

        assert_eq!(transition, Transition::RequeueAfter(env.requeue.failure));
        assert_eq!(condition(&s, RuntimeConditionType::Provisioned).reason, "GardenerErr");
    }
}
