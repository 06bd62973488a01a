use tracing::{debug, info, warn};

use super::{FsmEnv, SystemState, Transition};
use crate::crd::{ConditionStatus, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;

pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    let shoot = match env.converter.for_create().to_shoot(&s.runtime) {
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

    match env.shoots.create(&shoot).await {
        Ok(()) => info!(shoot = s.shoot_name(), "🚀 shoot created"),
        Err(e) if e.is_already_exists() => {
            debug!(shoot = s.shoot_name(), "shoot already exists");
        }
        Err(e) => {
            warn!(shoot = s.shoot_name(), error = %e, "failed to create shoot");
            s.update_condition(
                RuntimeConditionType::Provisioned,
                RuntimeConditionReason::GardenerError,
                ConditionStatus::False,
                &format!("Gardener API create error: {e}"),
            );
            return Ok(Transition::RequeueAfter(env.requeue.failure));
        }
    }

    s.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ShootCreationPending,
        ConditionStatus::Unknown,
        "Shoot is pending",
    );
    Ok(Transition::RequeueAfter(env.requeue.shoot_create))
}
