use tracing::{debug, warn};

use super::{FsmEnv, StateId, SystemState, Transition};
use crate::constants::ANNOTATION_RUNTIME_GENERATION;
use crate::crd::{ConditionStatus, RuntimeConditionReason, RuntimeConditionType, RuntimeState};
use crate::error::Error;
use crate::gardener::types::{LastOperationType, Shoot};

/// Generation the shoot was last converted from; a missing annotation counts as 0
fn applied_generation(shoot: &Shoot) -> Result<i64, String> {
    match shoot
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_RUNTIME_GENERATION))
    {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| raw.clone()),
    }
}

pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    if s.runtime.is_deleting() {
        return Ok(match &s.shoot {
            Some(shoot) if shoot.metadata.deletion_timestamp.is_none() => {
                Transition::Switch(StateId::DeleteShoot)
            }
            _ => Transition::Switch(StateId::WaitForShootDeletion),
        });
    }

    let Some(shoot) = &s.shoot else {
        return Ok(Transition::Switch(StateId::CreateShoot));
    };

    let Some(last_operation) = shoot.last_operation() else {
        debug!(shoot = s.shoot_name(), "shoot has no last operation yet");
        return Ok(Transition::RequeueAfter(env.requeue.gardener));
    };
    if shoot.dns_domain().is_none() {
        debug!(shoot = s.shoot_name(), "shoot has no DNS domain yet");
        return Ok(Transition::RequeueAfter(env.requeue.gardener));
    }
    let operation = last_operation.r#type.clone();

    match applied_generation(shoot) {
        Ok(applied) if applied < s.runtime.generation() => {
            debug!(
                shoot = s.shoot_name(),
                applied,
                generation = s.runtime.generation(),
                "runtime changed since the shoot was last converted"
            );
            return Ok(Transition::Switch(StateId::PatchShoot));
        }
        Ok(_) => {}
        Err(raw) => {
            let message =
                format!("Shoot annotation {ANNOTATION_RUNTIME_GENERATION} is not a number: '{raw}'");
            warn!(shoot = s.shoot_name(), "{message}");
            s.update_condition(
                RuntimeConditionType::Provisioned,
                RuntimeConditionReason::ConversionError,
                ConditionStatus::False,
                &message,
            );
            return Ok(Transition::RequeueAfter(env.requeue.failure));
        }
    }

    let in_progress = matches!(
        s.runtime.state(),
        None | Some(RuntimeState::Pending) | Some(RuntimeState::Unknown)
    );
    if !in_progress {
        return Ok(Transition::Stop);
    }

    Ok(match operation {
        LastOperationType::Create => Transition::Switch(StateId::WaitForShootCreation),
        LastOperationType::Delete => {
            warn!(shoot = s.shoot_name(), "shoot is being deleted outside of the runtime lifecycle");
            Transition::Stop
        }
        LastOperationType::Reconcile => Transition::Switch(StateId::WaitForShootReconcile),
        LastOperationType::Migrate | LastOperationType::Restore | LastOperationType::Other => {
            warn!(shoot = s.shoot_name(), ?operation, "unhandled shoot operation type");
            Transition::Stop
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::testutils::*;
    use super::*;
    use crate::gardener::types::LastOperationState;

    async fn transition(s: &mut SystemState) -> Transition {
        run(&env(), s).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_shoot_creates() {
        let mut s = SystemState::new(runtime(), None);
        assert_eq!(transition(&mut s).await, Transition::Switch(StateId::CreateShoot));
    }

    #[tokio::test]
    async fn test_shoot_without_last_operation_waits_for_gardener() {
        let mut shoot = shoot(LastOperationType::Create, LastOperationState::Processing);
        shoot.status = None;
        let mut s = SystemState::new(runtime(), Some(shoot));
        assert_eq!(
            transition(&mut s).await,
            Transition::RequeueAfter(env().requeue.gardener)
        );
    }

    #[tokio::test]
    async fn test_generation_drift() {
        let mut shoot = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded);
        shoot
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(ANNOTATION_RUNTIME_GENERATION.to_string(), "3".to_string());
        let mut s = SystemState::new(runtime(), Some(shoot));
        assert_eq!(transition(&mut s).await, Transition::Switch(StateId::PatchShoot));
    }

    #[tokio::test]
    async fn test_malformed_generation_is_a_data_error() {
        let mut shoot = shoot(LastOperationType::Reconcile, LastOperationState::Succeeded);
        shoot
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(ANNOTATION_RUNTIME_GENERATION.to_string(), "five".to_string());
        let mut s = SystemState::new(runtime(), Some(shoot));

        assert_eq!(
            transition(&mut s).await,
            Transition::RequeueAfter(env().requeue.failure)
        );
        let provisioned = condition(&s, RuntimeConditionType::Provisioned);
        assert_eq!(provisioned.reason, "ConversionErr");
        assert_eq!(s.runtime.state(), Some(RuntimeState::Error));
    }

    #[tokio::test]
    async fn test_pending_runtime_follows_last_operation() {
        let mut s = SystemState::new(
            runtime(),
            Some(shoot(LastOperationType::Create, LastOperationState::Processing)),
        );
        assert_eq!(
            transition(&mut s).await,
            Transition::Switch(StateId::WaitForShootCreation)
        );

        let mut s = SystemState::new(
            runtime(),
            Some(shoot(LastOperationType::Reconcile, LastOperationState::Processing)),
        );
        assert_eq!(
            transition(&mut s).await,
            Transition::Switch(StateId::WaitForShootReconcile)
        );
    }

    #[tokio::test]
    async fn test_unhandled_operation_types_stop() {
        for operation in [
            LastOperationType::Migrate,
            LastOperationType::Restore,
            LastOperationType::Other,
        ] {
            let mut s = SystemState::new(
                runtime(),
                Some(shoot(operation, LastOperationState::Processing)),
            );
            assert_eq!(transition(&mut s).await, Transition::Stop);
        }
    }

    #[tokio::test]
    async fn test_errored_runtime_without_drift_stops() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::CreationError,
            ConditionStatus::False,
            "shoot creation failed",
        );
        let mut s = SystemState::new(
            rt,
            Some(shoot(LastOperationType::Create, LastOperationState::Failed)),
        );
        assert_eq!(transition(&mut s).await, Transition::Stop);
    }

    #[tokio::test]
    async fn test_deleting_runtime() {
        let mut rt = runtime();
        rt.metadata.deletion_timestamp = Some(deletion_timestamp());

        let mut s = SystemState::new(
            rt.clone(),
            Some(shoot(LastOperationType::Reconcile, LastOperationState::Succeeded)),
        );
        assert_eq!(transition(&mut s).await, Transition::Switch(StateId::DeleteShoot));

        let mut s = SystemState::new(rt, None);
        assert_eq!(
            transition(&mut s).await,
            Transition::Switch(StateId::WaitForShootDeletion)
        );
    }
}
