use std::collections::BTreeMap;

use serde::Serialize;

use mesh_packet::{DataChannel, Protocol};

use crate::ports::{egress_key, local_key};
use crate::rib::InternalRoute;

/// One proxy listener bound on the local data plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(rename = "routeName")]
    pub route_name: String,
}

/// One upstream the proxy forwards a listener to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub name: String,
    pub endpoint: String,
    pub protocol: Protocol,
}

/// Versioned bundle consumed by the local proxy. Identical inputs produce
/// byte-identical output, which downstream consumers rely on for
/// deduplication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub version: String,
    pub listeners: Vec<Listener>,
    pub clusters: Vec<Cluster>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: "0".to_string(),
            listeners: Vec::new(),
            clusters: Vec::new(),
        }
    }

    pub fn version_number(&self) -> u64 {
        self.version.parse().unwrap_or(0)
    }

    /// Equality of the resource content, version aside.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.listeners == other.listeners && self.clusters == other.clusters
    }
}

pub struct SnapshotInput<'a> {
    pub local: Vec<&'a DataChannel>,
    pub internal: Vec<&'a InternalRoute>,
    pub ports: &'a BTreeMap<String, u16>,
    pub bind_address: &'a str,
    pub version: u64,
}

/// Translate committed routes plus port assignments into proxy resources.
/// Local routes become ingress listeners pointing at the route endpoint;
/// learned routes become egress listeners pointing at the advertising
/// peer's proxy. Entries without a port assignment or upstream target are
/// left out.
pub fn build_snapshot(input: SnapshotInput<'_>) -> Snapshot {
    let mut listeners = Vec::new();
    let mut clusters = Vec::new();

    for channel in &input.local {
        let Some(endpoint) = &channel.endpoint else {
            continue;
        };
        let key = local_key(&channel.name);
        let Some(port) = input.ports.get(&key) else {
            continue;
        };
        listeners.push(Listener {
            name: key.clone(),
            address: input.bind_address.to_string(),
            port: *port,
            route_name: channel.name.clone(),
        });
        clusters.push(Cluster {
            name: key,
            endpoint: endpoint.clone(),
            protocol: channel.protocol,
        });
    }

    for route in &input.internal {
        let Some(upstream) = peer_proxy_endpoint(route) else {
            continue;
        };
        let key = egress_key(&route.channel.name, &route.peer_name);
        let Some(port) = input.ports.get(&key) else {
            continue;
        };
        listeners.push(Listener {
            name: key.clone(),
            address: input.bind_address.to_string(),
            port: *port,
            route_name: route.channel.name.clone(),
        });
        clusters.push(Cluster {
            name: key,
            endpoint: upstream,
            protocol: route.channel.protocol,
        });
    }

    listeners.sort_by(|a, b| a.name.cmp(&b.name));
    clusters.sort_by(|a, b| a.name.cmp(&b.name));

    Snapshot {
        version: input.version.to_string(),
        listeners,
        clusters,
    }
}

/// Where a learned route is reachable: the advertising peer's proxy host
/// at the port the peer advertised for the channel.
pub fn peer_proxy_endpoint(route: &InternalRoute) -> Option<String> {
    let port = route.channel.envoy_port?;
    let url = url::Url::parse(&route.peer.endpoint).ok()?;
    let host = url.host_str()?;
    let scheme = match route.channel.protocol {
        Protocol::Tcp => "tcp",
        _ => "http",
    };
    Some(format!("{scheme}://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_packet::PeerRef;

    fn local(name: &str, endpoint: &str) -> DataChannel {
        DataChannel::new(name, Protocol::Http).with_endpoint(endpoint)
    }

    fn internal(name: &str, peer: &str, envoy_port: Option<u16>) -> InternalRoute {
        let mut channel = DataChannel::new(name, Protocol::Http);
        channel.envoy_port = envoy_port;
        InternalRoute {
            channel,
            peer: PeerRef {
                name: peer.to_string(),
                endpoint: format!("wss://{peer}:4222"),
            },
            peer_name: peer.to_string(),
            node_path: vec![peer.to_string()],
        }
    }

    #[test]
    fn test_builder_is_deterministic() {
        let a = local("svc-a", "http://a:8080");
        let b = local("svc-b", "http://b:8080");
        let i = internal("svc-c", "node-b", Some(10100));
        let mut ports = BTreeMap::new();
        ports.insert("svc-a".to_string(), 10000u16);
        ports.insert("svc-b".to_string(), 10001u16);
        ports.insert("egress_svc-c_via_node-b".to_string(), 10002u16);

        let build = |locals: Vec<&DataChannel>, internals: Vec<&InternalRoute>| {
            build_snapshot(SnapshotInput {
                local: locals,
                internal: internals,
                ports: &ports,
                bind_address: "127.0.0.1",
                version: 7,
            })
        };
        let one = build(vec![&a, &b], vec![&i]);
        let two = build(vec![&b, &a], vec![&i]);
        assert_eq!(one, two);
        assert_eq!(
            serde_json::to_vec(&one).unwrap(),
            serde_json::to_vec(&two).unwrap()
        );
        assert_eq!(one.version, "7");
        assert_eq!(one.listeners.len(), 3);
        // Sorted by name: egress first.
        assert_eq!(one.listeners[0].name, "egress_svc-c_via_node-b");
        assert_eq!(one.listeners[0].route_name, "svc-c");
    }

    #[test]
    fn test_internal_route_resolves_peer_host() {
        let route = internal("svc-c", "node-b", Some(10100));
        assert_eq!(
            peer_proxy_endpoint(&route).unwrap(),
            "http://node-b:10100"
        );
        let no_port = internal("svc-c", "node-b", None);
        assert!(peer_proxy_endpoint(&no_port).is_none());
    }

    #[test]
    fn test_routes_without_targets_are_skipped() {
        let mut ports = BTreeMap::new();
        ports.insert("svc-a".to_string(), 10000u16);
        let no_endpoint = DataChannel::new("svc-a", Protocol::Http);
        let snapshot = build_snapshot(SnapshotInput {
            local: vec![&no_endpoint],
            internal: vec![],
            ports: &ports,
            bind_address: "127.0.0.1",
            version: 1,
        });
        assert!(snapshot.listeners.is_empty());
        assert!(snapshot.clusters.is_empty());
    }

    #[test]
    fn test_same_content_ignores_version() {
        let a = local("svc-a", "http://a:8080");
        let mut ports = BTreeMap::new();
        ports.insert("svc-a".to_string(), 10000u16);
        let build = |version| {
            build_snapshot(SnapshotInput {
                local: vec![&a],
                internal: vec![],
                ports: &ports,
                bind_address: "127.0.0.1",
                version,
            })
        };
        let one = build(1);
        let two = build(2);
        assert!(one.same_content(&two));
        assert_ne!(one, two);
    }
}
