//! # Configuration
//!
//! Startup configuration: command line flags, HTTP server settings and the two
//! JSON documents (converter defaults, audit log tenants) read once at boot.

mod audit_log;
mod controller;
mod converter;
mod duration;
mod server;

pub use audit_log::{AuditLogConfig, AuditLogData};
pub use controller::{ControllerArgs, RequeueDurations};
pub use converter::{
    AuditLoggingConfig, AwsConfig, ClusterConfig, ConverterConfig, DnsConfig, KubernetesConfig,
    MachineImageConfig, OidcProviderDefaults, ProviderConfig,
};
pub use duration::parse_kubernetes_duration;
pub use server::{parse_bind_address, ServerConfig};

#[cfg(test)]
pub(crate) use converter::tests::fixture as converter_config_fixture;
