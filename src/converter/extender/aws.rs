//! AWS provider model: infrastructure, control plane and worker configuration blobs.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;

const API_VERSION: &str = "aws.provider.extensions.gardener.cloud/v1alpha1";
const MAX_ZONES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfrastructureConfig {
    api_version: String,
    kind: String,
    networks: Networks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Networks {
    vpc: Vpc,
    zones: Vec<Zone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Vpc {
    cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Zone {
    name: String,
    workers: String,
    public: String,
    internal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpTokens {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadataOptions {
    pub http_tokens: HttpTokens,
    pub http_put_response_hop_limit: i64,
}

impl InstanceMetadataOptions {
    /// Enforce IMDSv2 session tokens
    pub fn imds_v2() -> Self {
        Self {
            http_tokens: HttpTokens::Required,
            http_put_response_hop_limit: 2,
        }
    }
}

pub(super) fn worker_config(options: InstanceMetadataOptions) -> Value {
    serde_json::json!({
        "apiVersion": API_VERSION,
        "kind": "WorkerConfig",
        "instanceMetadataOptions": options,
    })
}

pub(super) fn control_plane_config() -> Value {
    serde_json::json!({
        "apiVersion": API_VERSION,
        "kind": "ControlPlaneConfig",
    })
}

fn parse_cidr(cidr: &str) -> Result<(u32, u32), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{cidr}' is not in CIDR notation"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| format!("'{cidr}' has an invalid address: {e}"))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|e| format!("'{cidr}' has an invalid prefix: {e}"))?;
    if prefix > 24 {
        return Err(format!("'{cidr}' is too small, need at least a /24"));
    }
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    Ok((u32::from(addr) & mask, prefix))
}

fn format_cidr(base: u32, prefix: u32) -> String {
    format!("{}/{prefix}", Ipv4Addr::from(base))
}

/// Carve per-zone subnets out of the node CIDR.
///
/// Workers get a `/p+3` each from the bottom of the range, public and internal
/// load balancer subnets get a `/p+6` each from the top quarter.
pub fn generate_infrastructure_config(nodes_cidr: &str, zones: &[String]) -> Result<Value, Error> {
    const EXTENDER: &str = "provider";

    if zones.is_empty() {
        return Err(Error::conversion(EXTENDER, "workers declare no zones"));
    }
    if zones.len() > MAX_ZONES {
        return Err(Error::conversion(
            EXTENDER,
            format!("at most {MAX_ZONES} zones are supported, got {}", zones.len()),
        ));
    }
    let (base, prefix) = parse_cidr(nodes_cidr).map_err(|e| Error::conversion(EXTENDER, e))?;

    let worker_block = 1u32 << (32 - prefix - 3);
    let lb_block = worker_block / 8;
    let public_base = base + 3 * worker_block;
    let internal_base = public_base + worker_block / 2;

    let zones = zones
        .iter()
        .zip(0u32..)
        .map(|(name, i)| Zone {
            name: name.clone(),
            workers: format_cidr(base + i * worker_block, prefix + 3),
            public: format_cidr(public_base + i * lb_block, prefix + 6),
            internal: format_cidr(internal_base + i * lb_block, prefix + 6),
        })
        .collect();

    let config = InfrastructureConfig {
        api_version: API_VERSION.to_string(),
        kind: "InfrastructureConfig".to_string(),
        networks: Networks {
            vpc: Vpc {
                cidr: format_cidr(base, prefix),
            },
            zones,
        },
    };
    Ok(serde_json::to_value(config)?)
}
