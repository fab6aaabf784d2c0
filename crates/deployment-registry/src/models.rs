//! Component data model for the deployment registry

use crate::error::{Error, Result};
use crate::phase::ComponentPhase;
use serde::{Deserialize, Serialize};

/// The closed set of deployable component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A ledger consensus node
    ConsensusNode,
    /// A JSON-RPC relay fronting one or more consensus nodes
    Relay,
    /// A mirror node ingesting the record stream
    MirrorNode,
    /// A mirror node explorer UI
    Explorer,
    /// HAProxy in front of a consensus node's gRPC endpoint
    HaProxy,
    /// Envoy proxy in front of a consensus node's gRPC-web endpoint
    EnvoyProxy,
    /// A block node serving the block stream
    BlockNode,
}

impl ComponentKind {
    /// All kinds, in registry iteration order.
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::ConsensusNode,
        ComponentKind::Relay,
        ComponentKind::MirrorNode,
        ComponentKind::Explorer,
        ComponentKind::HaProxy,
        ComponentKind::EnvoyProxy,
        ComponentKind::BlockNode,
    ];

    /// Whether records of this kind may hold the given phase at all.
    pub fn allows_phase(self, phase: ComponentPhase) -> bool {
        match phase {
            ComponentPhase::Frozen => self == ComponentKind::ConsensusNode,
            _ => true,
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComponentKind::ConsensusNode => "consensus-node",
            ComponentKind::Relay => "relay",
            ComponentKind::MirrorNode => "mirror-node",
            ComponentKind::Explorer => "explorer",
            ComponentKind::HaProxy => "haproxy",
            ComponentKind::EnvoyProxy => "envoy-proxy",
            ComponentKind::BlockNode => "block-node",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "consensus-node" => Ok(ComponentKind::ConsensusNode),
            "relay" => Ok(ComponentKind::Relay),
            "mirror-node" => Ok(ComponentKind::MirrorNode),
            "explorer" => Ok(ComponentKind::Explorer),
            "haproxy" => Ok(ComponentKind::HaProxy),
            "envoy-proxy" => Ok(ComponentKind::EnvoyProxy),
            "block-node" => Ok(ComponentKind::BlockNode),
            other => Err(Error::Validation(format!(
                "unknown component kind '{other}'"
            ))),
        }
    }
}

/// Kind-specific component fields, discriminated by `kind`.
///
/// All registry operations dispatch on this discriminator through one
/// exhaustive match rather than scattered per-kind checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentSpec {
    /// Consensus node fields
    ConsensusNode {
        /// Ledger-internal node id
        node_id: u64,
        /// Node account on the ledger (e.g. "0.0.3")
        account_id: String,
        /// Gossip endpoints (host:port)
        gossip_endpoints: Vec<String>,
        /// gRPC service endpoints (host:port)
        grpc_endpoints: Vec<String>,
    },
    /// Relay fields
    Relay {
        /// Aliases of the consensus nodes this relay proxies
        consensus_node_aliases: Vec<String>,
    },
    /// Mirror node fields
    MirrorNode {
        /// Helm release the mirror node was installed under
        release_name: String,
        /// Chart version
        version: String,
    },
    /// Explorer fields
    Explorer {
        /// Helm release the explorer was installed under
        release_name: String,
        /// Chart version
        version: String,
    },
    /// HAProxy fields
    HaProxy {
        /// Alias of the consensus node this proxy fronts
        consensus_node_alias: String,
    },
    /// Envoy proxy fields
    EnvoyProxy {
        /// Alias of the consensus node this proxy fronts
        consensus_node_alias: String,
    },
    /// Block node fields
    BlockNode {
        /// Block stream endpoints (host:port)
        endpoints: Vec<String>,
    },
}

impl ComponentSpec {
    /// The kind discriminator for this spec.
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentSpec::ConsensusNode { .. } => ComponentKind::ConsensusNode,
            ComponentSpec::Relay { .. } => ComponentKind::Relay,
            ComponentSpec::MirrorNode { .. } => ComponentKind::MirrorNode,
            ComponentSpec::Explorer { .. } => ComponentKind::Explorer,
            ComponentSpec::HaProxy { .. } => ComponentKind::HaProxy,
            ComponentSpec::EnvoyProxy { .. } => ComponentKind::EnvoyProxy,
            ComponentSpec::BlockNode { .. } => ComponentKind::BlockNode,
        }
    }

    /// Validate kind-specific required fields.
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        let fail = |msg: &str| {
            Err(Error::Validation(format!(
                "{} component '{}': {}",
                self.kind(),
                name,
                msg
            )))
        };

        match self {
            ComponentSpec::ConsensusNode {
                account_id,
                gossip_endpoints,
                grpc_endpoints,
                ..
            } => {
                if account_id.trim().is_empty() {
                    return fail("account id must not be empty");
                }
                if gossip_endpoints.is_empty() {
                    return fail("at least one gossip endpoint is required");
                }
                if grpc_endpoints.is_empty() {
                    return fail("at least one grpc endpoint is required");
                }
            }
            ComponentSpec::Relay {
                consensus_node_aliases,
            } => {
                if consensus_node_aliases.is_empty() {
                    return fail("relay must proxy at least one consensus node");
                }
            }
            ComponentSpec::MirrorNode { release_name, .. }
            | ComponentSpec::Explorer { release_name, .. } => {
                if release_name.trim().is_empty() {
                    return fail("release name must not be empty");
                }
            }
            ComponentSpec::HaProxy {
                consensus_node_alias,
            }
            | ComponentSpec::EnvoyProxy {
                consensus_node_alias,
            } => {
                if consensus_node_alias.trim().is_empty() {
                    return fail("consensus node alias must not be empty");
                }
            }
            ComponentSpec::BlockNode { endpoints } => {
                if endpoints.is_empty() {
                    return fail("at least one block stream endpoint is required");
                }
            }
        }

        Ok(())
    }
}

/// One registered component.
///
/// The record only exists inside a [`crate::DeploymentState`] aggregate;
/// its lifetime is bounded by the persisted snapshot's lifetime. Unknown
/// fields read from an older or newer snapshot are kept in `extra` and
/// written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Kind-scoped id, assigned monotonically by the registry
    pub id: u32,
    /// Human-readable alias, unique within the kind
    pub name: String,
    /// Logical cluster this component is placed on
    pub cluster_ref: String,
    /// Kubernetes namespace within the cluster
    pub namespace: String,
    /// Current lifecycle phase
    pub phase: ComponentPhase,
    /// Kind-specific fields
    pub spec: ComponentSpec,
    /// Unknown fields preserved across snapshot round-trips
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ComponentRecord {
    /// Create a new record in the `Requested` phase.
    ///
    /// The id is a placeholder; the registry assigns the real one on add.
    pub fn new(
        name: impl Into<String>,
        cluster_ref: impl Into<String>,
        namespace: impl Into<String>,
        spec: ComponentSpec,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            cluster_ref: cluster_ref.into(),
            namespace: namespace.into(),
            phase: ComponentPhase::Requested,
            spec,
            extra: serde_json::Map::new(),
        }
    }

    /// The kind discriminator of this record.
    pub fn kind(&self) -> ComponentKind {
        self.spec.kind()
    }

    /// Structural identity used for duplicate detection within a kind.
    pub fn structural_identity(&self) -> (&str, &str) {
        (self.cluster_ref.as_str(), self.namespace.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_spec() -> ComponentSpec {
        ComponentSpec::ConsensusNode {
            node_id: 0,
            account_id: "0.0.3".into(),
            gossip_endpoints: vec!["node1:50111".into()],
            grpc_endpoints: vec!["node1:50211".into()],
        }
    }

    #[test]
    fn test_spec_kind_dispatch() {
        assert_eq!(node_spec().kind(), ComponentKind::ConsensusNode);
        assert_eq!(
            ComponentSpec::Relay {
                consensus_node_aliases: vec!["node1".into()]
            }
            .kind(),
            ComponentKind::Relay
        );
        assert_eq!(
            ComponentSpec::BlockNode {
                endpoints: vec!["block1:8080".into()]
            }
            .kind(),
            ComponentKind::BlockNode
        );
    }

    #[test]
    fn test_spec_validation() {
        assert!(node_spec().validate("node1").is_ok());

        let missing_endpoints = ComponentSpec::ConsensusNode {
            node_id: 0,
            account_id: "0.0.3".into(),
            gossip_endpoints: vec![],
            grpc_endpoints: vec!["node1:50211".into()],
        };
        assert!(missing_endpoints.validate("node1").is_err());

        let empty_relay = ComponentSpec::Relay {
            consensus_node_aliases: vec![],
        };
        assert!(empty_relay.validate("relay1").is_err());
    }

    #[test]
    fn test_frozen_is_consensus_only() {
        assert!(ComponentKind::ConsensusNode.allows_phase(ComponentPhase::Frozen));
        assert!(!ComponentKind::Relay.allows_phase(ComponentPhase::Frozen));
        assert!(!ComponentKind::HaProxy.allows_phase(ComponentPhase::Frozen));
        assert!(ComponentKind::Relay.allows_phase(ComponentPhase::Started));
    }

    #[test]
    fn test_record_round_trip_preserves_unknown_fields() {
        let json = serde_json::json!({
            "id": 3,
            "name": "node1",
            "cluster_ref": "c1",
            "namespace": "ledger",
            "phase": "started",
            "spec": {
                "kind": "consensus_node",
                "node_id": 0,
                "account_id": "0.0.3",
                "gossip_endpoints": ["node1:50111"],
                "grpc_endpoints": ["node1:50211"],
            },
            "future_field": {"nested": true},
        });

        let record: ComponentRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(record.id, 3);
        assert!(record.extra.contains_key("future_field"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back, json);
    }
}
