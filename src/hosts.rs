// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Maps the local machine's outbound IP to a known cluster role.
//!
//! The outbound address is discovered with the classic UDP-connect trick:
//! connecting a datagram socket picks a local endpoint without sending a
//! single packet, so this works offline-routable networks and never blocks.

use std::collections::BTreeMap;
use std::net::{IpAddr, UdpSocket};

pub const CLUSTER_LOCAL: &str = "local";
pub const CLUSTER_BRAINTREE: &str = "braintree";
pub const CLUSTER_OM: &str = "om";
pub const CLUSTER_VSC: &str = "vsc";

/// An IP-table entry: hostname plus the cluster it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct HostEntry {
    pub host: String,
    pub cluster: String,
}

/// What the launching machine resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub host: String,
    pub cluster: String,
    /// Node role decoded from the hostname, only for braintree-family nodes
    /// (`cpu`, `gpu1`, ...).
    pub node: Option<String>,
}

const BUILTIN_IPS: &[(&str, &str, &str)] = &[
    ("18.93.6.23", "braintree-cpu-1.mit.edu", CLUSTER_BRAINTREE),
    ("18.93.6.11", "braintree-gpu-1.mit.edu", CLUSTER_BRAINTREE),
    ("18.93.6.12", "braintree-gpu-2.mit.edu", CLUSTER_BRAINTREE),
    ("18.93.5.253", "braintree-gpu-3.mit.edu", CLUSTER_BRAINTREE),
    ("18.93.6.27", "braintree-gpu-4.mit.edu", CLUSTER_BRAINTREE),
    ("18.13.53.52", "openmind7.mit.edu", CLUSTER_OM),
    ("10.118.230.3", "login1-tier2.hpc.kuleuven.be", CLUSTER_VSC),
];

/// Resolve the local machine's identity. Never fails: an unmapped or
/// undeterminable IP degrades to `localhost` on the `local` cluster.
pub fn resolve(extra_ips: &BTreeMap<String, HostEntry>) -> HostIdentity {
    match outbound_ip() {
        Some(ip) => identity_for_ip(&ip.to_string(), extra_ips),
        None => {
            tracing::debug!("could not determine outbound ip, assuming localhost");
            local_identity()
        }
    }
}

fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    // No packet is sent; connect() only selects the route.
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn local_identity() -> HostIdentity {
    HostIdentity {
        host: "localhost".to_string(),
        cluster: CLUSTER_LOCAL.to_string(),
        node: None,
    }
}

fn identity_for_ip(ip: &str, extra_ips: &BTreeMap<String, HostEntry>) -> HostIdentity {
    let entry = extra_ips.get(ip).cloned().or_else(|| {
        BUILTIN_IPS
            .iter()
            .find(|(known, _, _)| *known == ip)
            .map(|(_, host, cluster)| HostEntry {
                host: host.to_string(),
                cluster: cluster.to_string(),
            })
    });

    match entry {
        Some(entry) => {
            let node = if entry.cluster == CLUSTER_BRAINTREE {
                node_role(&entry.host)
            } else {
                None
            };
            HostIdentity {
                host: entry.host,
                cluster: entry.cluster,
                node,
            }
        }
        None => local_identity(),
    }
}

/// Decode the node role from a braintree hostname: the dash-delimited
/// segments after the leading name, e.g. `braintree-gpu-3.mit.edu` → `gpu3`.
fn node_role(hostname: &str) -> Option<String> {
    let label = hostname.split('.').next()?;
    let segments: Vec<&str> = label.split('-').collect();
    if segments.len() < 2 {
        return None;
    }
    Some(segments[1..].concat())
}
