//! # Controller Arguments
//!
//! Command line flags, each with an environment variable fallback so the
//! deployment can configure the controller from a ConfigMap.

use super::duration::parse_kubernetes_duration;
use super::server::parse_bind_address;
use crate::constants::*;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "runtime-provisioner", version, about = "Provisions Gardener shoots from Runtime resources")]
pub struct ControllerArgs {
    /// Address the metrics endpoint binds to
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = ":8080", value_parser = parse_bind_address)]
    pub metrics_bind_address: SocketAddr,

    /// Address the health endpoints bind to
    #[arg(long, env = "HEALTH_BIND_ADDRESS", default_value = ":8081", value_parser = parse_bind_address)]
    pub health_bind_address: SocketAddr,

    /// Only one replica may reconcile at a time when enabled
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Kubeconfig for the Gardener project
    #[arg(long, env = "GARDENER_KUBECONFIG_PATH", default_value = "/gardener/kubeconfig/kubeconfig")]
    pub gardener_kubeconfig_path: PathBuf,

    /// Gardener project; shoots live in `garden-<project>`
    #[arg(long, env = "GARDENER_PROJECT_NAME", default_value = "gardener-project")]
    pub gardener_project_name: String,

    /// Fraction of the kubeconfig lifetime after which it is rotated
    #[arg(long, env = "MINIMAL_ROTATION_TIME", default_value_t = DEFAULT_MINIMAL_ROTATION_TIME_RATIO)]
    pub minimal_rotation_time: f64,

    /// Lifetime of issued admin kubeconfigs
    #[arg(long, env = "KUBECONFIG_EXPIRATION_TIME", default_value = "24h", value_parser = parse_kubernetes_duration)]
    pub kubeconfig_expiration_time: Duration,

    /// Wall-clock budget for one Runtime reconcile pass
    #[arg(long, env = "GARDENER_CTRL_RECONCILIATION_TIMEOUT", default_value = "60s", value_parser = parse_kubernetes_duration)]
    pub gardener_ctrl_reconciliation_timeout: Duration,

    /// Timeout for a single Gardener API request
    #[arg(long, env = "GARDENER_REQUEST_TIMEOUT", default_value = "3s", value_parser = parse_kubernetes_duration)]
    pub gardener_request_timeout: Duration,

    #[arg(long, env = "GARDENER_RATE_LIMITER_QPS", default_value_t = DEFAULT_GARDENER_RATE_LIMIT_QPS)]
    pub gardener_rate_limiter_qps: u32,

    #[arg(long, env = "GARDENER_RATE_LIMITER_BURST", default_value_t = DEFAULT_GARDENER_RATE_LIMIT_BURST)]
    pub gardener_rate_limiter_burst: u32,

    #[arg(long, env = "RUNTIME_CTRL_WORKERS_CNT", default_value_t = DEFAULT_RUNTIME_WORKERS)]
    pub runtime_ctrl_workers_cnt: u16,

    #[arg(long, env = "GARDENER_CLUSTER_CTRL_WORKERS_CNT", default_value_t = DEFAULT_GARDENER_CLUSTER_WORKERS)]
    pub gardener_cluster_ctrl_workers_cnt: u16,

    #[arg(long, env = "CUSTOM_CONFIG_CTRL_WORKERS_CNT", default_value_t = DEFAULT_CUSTOM_CONFIG_WORKERS)]
    pub custom_config_ctrl_workers_cnt: u16,

    #[arg(long, env = "GARDENER_REQUEUE_DURATION", default_value = "15s", value_parser = parse_kubernetes_duration)]
    pub gardener_requeue_duration: Duration,

    #[arg(long, env = "SHOOT_CREATE_REQUEUE_DURATION", default_value = "60s", value_parser = parse_kubernetes_duration)]
    pub shoot_create_requeue_duration: Duration,

    #[arg(long, env = "SHOOT_DELETE_REQUEUE_DURATION", default_value = "90s", value_parser = parse_kubernetes_duration)]
    pub shoot_delete_requeue_duration: Duration,

    #[arg(long, env = "SHOOT_RECONCILE_REQUEUE_DURATION", default_value = "30s", value_parser = parse_kubernetes_duration)]
    pub shoot_reconcile_requeue_duration: Duration,

    #[arg(long, env = "CONTROL_PLANE_REQUEUE_DURATION", default_value = "10s", value_parser = parse_kubernetes_duration)]
    pub control_plane_requeue_duration: Duration,

    #[arg(long, env = "CONVERTER_CONFIG_FILEPATH", default_value = "/converter-config/converter_config.json")]
    pub converter_config_filepath: PathBuf,

    #[arg(long, env = "AUDIT_LOG_CONFIG_FILEPATH", default_value = "/audit-log-config/config.json")]
    pub audit_log_config_filepath: PathBuf,

    /// Fail shoot synthesis when no audit log tenant exists for the provider and region
    #[arg(long, env = "AUDIT_LOG_MANDATORY", default_value_t = true, action = clap::ArgAction::Set)]
    pub audit_log_mandatory: bool,
}

/// Requeue intervals handed to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeueDurations {
    pub gardener: Duration,
    pub shoot_create: Duration,
    pub shoot_delete: Duration,
    pub shoot_reconcile: Duration,
    pub control_plane: Duration,
    pub failure: Duration,
}

impl Default for RequeueDurations {
    fn default() -> Self {
        Self {
            gardener: Duration::from_secs(DEFAULT_GARDENER_REQUEUE_SECS),
            shoot_create: Duration::from_secs(DEFAULT_SHOOT_CREATE_REQUEUE_SECS),
            shoot_delete: Duration::from_secs(DEFAULT_SHOOT_DELETE_REQUEUE_SECS),
            shoot_reconcile: Duration::from_secs(DEFAULT_SHOOT_RECONCILE_REQUEUE_SECS),
            control_plane: Duration::from_secs(DEFAULT_CONTROL_PLANE_REQUEUE_SECS),
            failure: Duration::from_secs(DEFAULT_FAILURE_REQUEUE_SECS),
        }
    }
}

impl ControllerArgs {
    pub fn requeue_durations(&self) -> RequeueDurations {
        RequeueDurations {
            gardener: self.gardener_requeue_duration,
            shoot_create: self.shoot_create_requeue_duration,
            shoot_delete: self.shoot_delete_requeue_duration,
            shoot_reconcile: self.shoot_reconcile_requeue_duration,
            control_plane: self.control_plane_requeue_duration,
            failure: Duration::from_secs(DEFAULT_FAILURE_REQUEUE_SECS),
        }
    }

    /// `ratio × expiration`; fixed for the lifetime of the process
    pub fn rotation_period(&self) -> Duration {
        self.kubeconfig_expiration_time
            .mul_f64(self.minimal_rotation_time.clamp(0.0, 1.0))
    }

    pub fn gardener_namespace(&self) -> String {
        format!("garden-{}", self.gardener_project_name)
    }

    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if !(self.minimal_rotation_time > 0.0 && self.minimal_rotation_time <= 1.0) {
            return Err(crate::error::Error::validation(format!(
                "minimal-rotation-time must be in (0, 1], got {}",
                self.minimal_rotation_time
            )));
        }
        if self.runtime_ctrl_workers_cnt == 0
            || self.gardener_cluster_ctrl_workers_cnt == 0
            || self.custom_config_ctrl_workers_cnt == 0
        {
            return Err(crate::error::Error::validation(
                "worker counts must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ControllerArgs::parse_from(["runtime-provisioner"]);
        assert_eq!(args.metrics_bind_address.port(), 8080);
        assert_eq!(args.health_bind_address.port(), 8081);
        assert_eq!(args.kubeconfig_expiration_time, Duration::from_secs(86400));
        assert_eq!(args.gardener_request_timeout, Duration::from_secs(3));
        assert_eq!(args.runtime_ctrl_workers_cnt, 25);
        assert_eq!(args.custom_config_ctrl_workers_cnt, 1);
        assert!(args.audit_log_mandatory);
        assert_eq!(args.requeue_durations(), RequeueDurations::default());
        assert_eq!(args.gardener_namespace(), "garden-gardener-project");
        args.validate().unwrap();
    }

    #[test]
    fn test_rotation_period_is_ratio_of_expiration() {
        let args = ControllerArgs::parse_from(["runtime-provisioner"]);
        // 0.6 × 24h = 14.4h
        assert_eq!(args.rotation_period(), Duration::from_secs(51_840));
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = ControllerArgs::parse_from([
            "runtime-provisioner",
            "--gardener-project-name",
            "kyma-dev",
            "--kubeconfig-expiration-time",
            "10h",
            "--minimal-rotation-time",
            "0.5",
            "--audit-log-mandatory",
            "false",
        ]);
        assert_eq!(args.gardener_namespace(), "garden-kyma-dev");
        assert_eq!(args.rotation_period(), Duration::from_secs(5 * 3600));
        assert!(!args.audit_log_mandatory);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let args = ControllerArgs::parse_from([
            "runtime-provisioner",
            "--custom-config-ctrl-workers-cnt",
            "0",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let args = ControllerArgs::parse_from(["runtime-provisioner", "--minimal-rotation-time", "1.5"]);
        assert!(args.validate().is_err());
    }
}
