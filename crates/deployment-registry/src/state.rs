//! The deployment state aggregate and registry operations.
//!
//! [`DeploymentState`] is the root aggregate for one logical deployment:
//! the cluster set, every component record grouped by kind, and the
//! versioning metadata stamped on each mutation. All mutating operations
//! re-validate the whole aggregate before committing, so an in-memory
//! state that round-trips through [`DeploymentState::to_snapshot`] is
//! valid by construction.

use crate::error::{Error, Result};
use crate::models::{ComponentKind, ComponentRecord};
use crate::phase::ComponentPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Versioning metadata stamped on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    /// When the aggregate was last mutated
    pub last_updated_at: DateTime<Utc>,
    /// Who performed the last mutation (CLI user, operator identity)
    pub last_updated_by: String,
}

/// Root aggregate for one logical deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Versioning metadata
    pub metadata: StateMetadata,
    /// Logical cluster name -> connection context
    pub clusters: BTreeMap<String, String>,
    /// Per-kind component collections, keyed by component id
    pub components: BTreeMap<ComponentKind, BTreeMap<u32, ComponentRecord>>,
    /// Per-kind monotonic id counters; freed ids are never reassigned
    pub next_id: BTreeMap<ComponentKind, u32>,
    /// Unknown top-level fields preserved across snapshot round-trips
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeploymentState {
    /// Create an empty aggregate.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            metadata: StateMetadata {
                last_updated_at: Utc::now(),
                last_updated_by: actor.into(),
            },
            clusters: BTreeMap::new(),
            components: BTreeMap::new(),
            next_id: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    fn touch(&mut self, actor: &str) {
        self.metadata.last_updated_at = Utc::now();
        self.metadata.last_updated_by = actor.to_string();
    }

    /// Register a cluster reference and its connection context.
    pub fn register_cluster(
        &mut self,
        cluster_ref: impl Into<String>,
        context: impl Into<String>,
        actor: &str,
    ) {
        let cluster_ref = cluster_ref.into();
        info!("Registering cluster reference '{}'", cluster_ref);
        self.clusters.insert(cluster_ref, context.into());
        self.touch(actor);
    }

    /// Add a component, assigning it a fresh kind-scoped id.
    ///
    /// Fails with [`Error::DuplicateComponent`] when a record of the same
    /// kind already occupies the same cluster and namespace, leaving the
    /// aggregate unchanged.
    pub fn add_component(&mut self, mut record: ComponentRecord, actor: &str) -> Result<u32> {
        let kind = record.kind();

        if let Some(existing) = self
            .components
            .get(&kind)
            .and_then(|records| {
                records
                    .values()
                    .find(|r| r.structural_identity() == record.structural_identity())
            })
        {
            return Err(Error::DuplicateComponent {
                kind,
                cluster_ref: existing.cluster_ref.clone(),
                namespace: existing.namespace.clone(),
            });
        }

        let id = {
            let counter = self.next_id.entry(kind).or_insert(0);
            let id = *counter;
            *counter += 1;
            id
        };
        record.id = id;

        info!("Adding {} component '{}' with id {}", kind, record.name, id);
        self.components.entry(kind).or_default().insert(id, record);

        if let Err(e) = self.validate() {
            // Roll the insert back so a failed add leaves state unchanged
            if let Some(records) = self.components.get_mut(&kind) {
                records.remove(&id);
            }
            return Err(e);
        }

        self.touch(actor);
        Ok(id)
    }

    /// Apply a mutator to an existing component and re-validate.
    ///
    /// Phase changes are rejected here; they go through
    /// [`DeploymentState::change_phase`] so transitions cannot bypass the
    /// state machine.
    pub fn edit_component<F>(&mut self, kind: ComponentKind, id: u32, mutator: F, actor: &str) -> Result<()>
    where
        F: FnOnce(&mut ComponentRecord),
    {
        let original = self
            .components
            .get(&kind)
            .and_then(|m| m.get(&id))
            .cloned()
            .ok_or(Error::NotFound { kind, id })?;

        let mut updated = original.clone();
        mutator(&mut updated);

        if updated.phase != original.phase {
            return Err(Error::Validation(
                "phase changes must go through change_phase".to_string(),
            ));
        }
        if updated.id != original.id || updated.kind() != kind {
            return Err(Error::Validation(
                "component id and kind are immutable".to_string(),
            ));
        }

        debug!("Editing {} component id {}", kind, id);
        self.components
            .get_mut(&kind)
            .expect("record existence checked above")
            .insert(id, updated);

        if let Err(e) = self.validate() {
            self.components
                .get_mut(&kind)
                .expect("record existence checked above")
                .insert(id, original);
            return Err(e);
        }

        self.touch(actor);
        Ok(())
    }

    /// Remove a component record.
    ///
    /// The freed id is never reassigned within this aggregate's lifetime,
    /// so a stale id held by a concurrent pipeline step can never silently
    /// address a different component.
    pub fn remove_component(
        &mut self,
        kind: ComponentKind,
        id: u32,
        actor: &str,
    ) -> Result<ComponentRecord> {
        let removed = self
            .components
            .get_mut(&kind)
            .and_then(|m| m.remove(&id))
            .ok_or(Error::NotFound { kind, id })?;

        if let Err(e) = self.validate() {
            self.components
                .get_mut(&kind)
                .expect("record existence checked above")
                .insert(id, removed);
            return Err(e);
        }

        info!("Removed {} component '{}' (id {})", kind, removed.name, id);
        self.touch(actor);
        Ok(removed)
    }

    /// Transition a component's phase.
    ///
    /// Fails with [`Error::InvalidTransition`] when the target phase is not
    /// reachable from the current one, or when the target is only reachable
    /// through a coordinated operation (freeze, destroy). The phase is left
    /// unchanged on failure.
    pub fn change_phase(
        &mut self,
        kind: ComponentKind,
        id: u32,
        new_phase: ComponentPhase,
        actor: &str,
    ) -> Result<()> {
        let record = self
            .components
            .get_mut(&kind)
            .and_then(|m| m.get_mut(&id))
            .ok_or(Error::NotFound { kind, id })?;

        let from = record.phase;
        if new_phase.is_coordinated() || !from.can_transition(new_phase) {
            return Err(Error::InvalidTransition {
                from,
                to: new_phase,
            });
        }
        if !kind.allows_phase(new_phase) {
            return Err(Error::InvalidTransition {
                from,
                to: new_phase,
            });
        }

        debug!(
            "{} component id {} phase: {} -> {}",
            kind, id, from, new_phase
        );
        record.phase = new_phase;
        self.touch(actor);
        Ok(())
    }

    /// Coordinated freeze: every consensus node moves `Started -> Frozen`.
    ///
    /// All-or-nothing: if any node is not currently `Started`, no phase is
    /// touched and [`Error::InvalidTransition`] names the offending phase.
    pub fn freeze_consensus_nodes(&mut self, actor: &str) -> Result<()> {
        self.transition_all_consensus_nodes(ComponentPhase::Started, ComponentPhase::Frozen, actor)
    }

    /// Coordinated thaw: every consensus node moves `Frozen -> Started`.
    pub fn unfreeze_consensus_nodes(&mut self, actor: &str) -> Result<()> {
        self.transition_all_consensus_nodes(ComponentPhase::Frozen, ComponentPhase::Started, actor)
    }

    fn transition_all_consensus_nodes(
        &mut self,
        from: ComponentPhase,
        to: ComponentPhase,
        actor: &str,
    ) -> Result<()> {
        let nodes = self
            .components
            .entry(ComponentKind::ConsensusNode)
            .or_default();

        if let Some(record) = nodes.values().find(|r| r.phase != from) {
            return Err(Error::InvalidTransition {
                from: record.phase,
                to,
            });
        }

        info!(
            "Transitioning {} consensus node(s): {} -> {}",
            nodes.len(),
            from,
            to
        );
        for record in nodes.values_mut() {
            record.phase = to;
        }
        self.touch(actor);
        Ok(())
    }

    /// Destroy-pipeline-only transition into the terminal `Removed` phase.
    pub fn mark_removed(&mut self, kind: ComponentKind, id: u32, actor: &str) -> Result<()> {
        let record = self
            .components
            .get_mut(&kind)
            .and_then(|m| m.get_mut(&id))
            .ok_or(Error::NotFound { kind, id })?;

        if !record.phase.can_transition(ComponentPhase::Removed) {
            return Err(Error::InvalidTransition {
                from: record.phase,
                to: ComponentPhase::Removed,
            });
        }

        debug!("{} component id {} marked removed", kind, id);
        record.phase = ComponentPhase::Removed;
        self.touch(actor);
        Ok(())
    }

    /// Look up a component by kind and id.
    pub fn get_component(&self, kind: ComponentKind, id: u32) -> Result<&ComponentRecord> {
        self.components
            .get(&kind)
            .and_then(|m| m.get(&id))
            .ok_or(Error::NotFound { kind, id })
    }

    /// All components of one kind, in id order.
    pub fn list_components(&self, kind: ComponentKind) -> Vec<&ComponentRecord> {
        self.components
            .get(&kind)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Total number of records across all kinds.
    pub fn component_count(&self) -> usize {
        self.components.values().map(|m| m.len()).sum()
    }

    /// Serialize the aggregate to a snapshot document.
    pub fn to_snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize and fully re-validate a snapshot document.
    ///
    /// A snapshot that parses but violates an invariant fails with
    /// [`Error::CorruptState`] rather than being silently repaired.
    pub fn from_snapshot(data: &[u8]) -> Result<Self> {
        let state: DeploymentState =
            serde_json::from_slice(data).map_err(|e| Error::CorruptState(Box::new(e.into())))?;
        state
            .validate()
            .map_err(|e| Error::CorruptState(Box::new(e)))?;
        Ok(state)
    }

    /// Validate every invariant of the aggregate.
    pub fn validate(&self) -> Result<()> {
        for (kind, records) in &self.components {
            let mut seen = std::collections::BTreeSet::new();

            for (key, record) in records {
                if *key != record.id {
                    return Err(Error::Validation(format!(
                        "{} record stored under id {} carries id {}",
                        kind, key, record.id
                    )));
                }
                if record.kind() != *kind {
                    return Err(Error::Validation(format!(
                        "record '{}' of kind {} filed under {}",
                        record.name,
                        record.kind(),
                        kind
                    )));
                }
                if record.name.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "{} record id {} has an empty name",
                        kind, record.id
                    )));
                }
                if !self.clusters.contains_key(&record.cluster_ref) {
                    return Err(Error::Validation(format!(
                        "{} component '{}' references unknown cluster '{}'",
                        kind, record.name, record.cluster_ref
                    )));
                }
                if record.namespace.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "{} component '{}' has an empty namespace",
                        kind, record.name
                    )));
                }
                if !kind.allows_phase(record.phase) {
                    return Err(Error::Validation(format!(
                        "{} component '{}' holds phase '{}' not allowed for its kind",
                        kind, record.name, record.phase
                    )));
                }
                record.spec.validate(&record.name)?;

                if !seen.insert(record.structural_identity()) {
                    return Err(Error::Validation(format!(
                        "duplicate {} identity in cluster '{}', namespace '{}'",
                        kind, record.cluster_ref, record.namespace
                    )));
                }

                let counter = self.next_id.get(kind).copied().unwrap_or(0);
                if record.id >= counter {
                    return Err(Error::Validation(format!(
                        "{} record id {} is not below the id counter {}",
                        kind, record.id, counter
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComponentSpec;

    fn node_spec(account: &str) -> ComponentSpec {
        ComponentSpec::ConsensusNode {
            node_id: 0,
            account_id: account.into(),
            gossip_endpoints: vec!["node:50111".into()],
            grpc_endpoints: vec!["node:50211".into()],
        }
    }

    fn seeded_state() -> DeploymentState {
        let mut state = DeploymentState::new("tester");
        state.register_cluster("c1", "kind-c1", "tester");
        state.register_cluster("c2", "kind-c2", "tester");
        state
    }

    #[test]
    fn test_add_assigns_monotonic_ids() {
        let mut state = seeded_state();

        let a = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();
        let b = state
            .add_component(
                ComponentRecord::new("node2", "c2", "ns", node_spec("0.0.4")),
                "tester",
            )
            .unwrap();
        assert_eq!((a, b), (0, 1));

        // Removal must not free the id for reuse
        state
            .remove_component(ComponentKind::ConsensusNode, b, "tester")
            .unwrap();
        let c = state
            .add_component(
                ComponentRecord::new("node3", "c2", "ns", node_spec("0.0.5")),
                "tester",
            )
            .unwrap();
        assert_eq!(c, 2);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut state = seeded_state();
        state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();

        let before = state.to_snapshot().unwrap();
        let err = state
            .add_component(
                ComponentRecord::new("node1-bis", "c1", "ns", node_spec("0.0.9")),
                "tester",
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateComponent { .. }));
        assert_eq!(state.to_snapshot().unwrap(), before);

        // Same cluster+namespace is fine for a different kind
        state
            .add_component(
                ComponentRecord::new(
                    "relay1",
                    "c1",
                    "ns",
                    ComponentSpec::Relay {
                        consensus_node_aliases: vec!["node1".into()],
                    },
                ),
                "tester",
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_cluster_rejected() {
        let mut state = seeded_state();
        let err = state
            .add_component(
                ComponentRecord::new("node1", "nowhere", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(state.component_count(), 0);
    }

    #[test]
    fn test_phase_walk_and_skip_rejection() {
        let mut state = seeded_state();
        let id = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();
        let kind = ComponentKind::ConsensusNode;

        // Direct Requested -> Started must fail and leave the phase alone
        let err = state
            .change_phase(kind, id, ComponentPhase::Started, "tester")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(
            state.get_component(kind, id).unwrap().phase,
            ComponentPhase::Requested
        );

        for phase in [
            ComponentPhase::Deployed,
            ComponentPhase::Configured,
            ComponentPhase::Started,
        ] {
            state.change_phase(kind, id, phase, "tester").unwrap();
        }
        assert_eq!(
            state.get_component(kind, id).unwrap().phase,
            ComponentPhase::Started
        );
    }

    #[test]
    fn test_per_node_freeze_rejected() {
        let mut state = seeded_state();
        let id = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();
        let kind = ComponentKind::ConsensusNode;
        for phase in [
            ComponentPhase::Deployed,
            ComponentPhase::Configured,
            ComponentPhase::Started,
        ] {
            state.change_phase(kind, id, phase, "tester").unwrap();
        }

        let err = state
            .change_phase(kind, id, ComponentPhase::Frozen, "tester")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        state.freeze_consensus_nodes("tester").unwrap();
        assert_eq!(
            state.get_component(kind, id).unwrap().phase,
            ComponentPhase::Frozen
        );
        state.unfreeze_consensus_nodes("tester").unwrap();
        assert_eq!(
            state.get_component(kind, id).unwrap().phase,
            ComponentPhase::Started
        );
    }

    #[test]
    fn test_freeze_is_all_or_nothing() {
        let mut state = seeded_state();
        let kind = ComponentKind::ConsensusNode;
        let a = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();
        let b = state
            .add_component(
                ComponentRecord::new("node2", "c2", "ns", node_spec("0.0.4")),
                "tester",
            )
            .unwrap();

        // Only node a reaches Started
        for phase in [
            ComponentPhase::Deployed,
            ComponentPhase::Configured,
            ComponentPhase::Started,
        ] {
            state.change_phase(kind, a, phase, "tester").unwrap();
        }

        let err = state.freeze_consensus_nodes("tester").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(
            state.get_component(kind, a).unwrap().phase,
            ComponentPhase::Started
        );
        assert_eq!(
            state.get_component(kind, b).unwrap().phase,
            ComponentPhase::Requested
        );
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut state = seeded_state();
        let before = state.to_snapshot().unwrap();
        let err = state
            .remove_component(ComponentKind::ConsensusNode, 3, "tester")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: ComponentKind::ConsensusNode,
                id: 3
            }
        ));
        assert_eq!(state.to_snapshot().unwrap(), before);
    }

    #[test]
    fn test_remove_restores_record_when_validation_fails() {
        let mut state = seeded_state();
        let keep = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();
        let broken = state
            .add_component(
                ComponentRecord::new("node2", "c1", "ns2", node_spec("0.0.4")),
                "tester",
            )
            .unwrap();
        // Corrupt an unrelated record so the post-removal validation fails.
        state
            .components
            .get_mut(&ComponentKind::ConsensusNode)
            .unwrap()
            .get_mut(&broken)
            .unwrap()
            .name
            .clear();

        let err = state
            .remove_component(ComponentKind::ConsensusNode, keep, "tester")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(
            state
                .get_component(ComponentKind::ConsensusNode, keep)
                .is_ok()
        );
    }

    #[test]
    fn test_edit_rejects_phase_change() {
        let mut state = seeded_state();
        let id = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();

        let err = state
            .edit_component(
                ComponentKind::ConsensusNode,
                id,
                |r| r.phase = ComponentPhase::Started,
                "tester",
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        state
            .edit_component(
                ComponentKind::ConsensusNode,
                id,
                |r| {
                    if let ComponentSpec::ConsensusNode { grpc_endpoints, .. } = &mut r.spec {
                        grpc_endpoints.push("node:50212".into());
                    }
                },
                "tester",
            )
            .unwrap();
    }

    #[test]
    fn test_edit_restores_record_on_invalid_mutation() {
        let mut state = seeded_state();
        let id = state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();

        let err = state
            .edit_component(
                ComponentKind::ConsensusNode,
                id,
                |r| r.name.clear(),
                "tester",
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            state
                .get_component(ComponentKind::ConsensusNode, id)
                .unwrap()
                .name,
            "node1"
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut state = seeded_state();
        state
            .add_component(
                ComponentRecord::new("node1", "c1", "ns", node_spec("0.0.3")),
                "tester",
            )
            .unwrap();
        state
            .add_component(
                ComponentRecord::new(
                    "mirror1",
                    "c2",
                    "ns",
                    ComponentSpec::MirrorNode {
                        release_name: "mirror".into(),
                        version: "0.42.0".into(),
                    },
                ),
                "tester",
            )
            .unwrap();

        let bytes = state.to_snapshot().unwrap();
        let restored = DeploymentState::from_snapshot(&bytes).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_snapshot_preserves_unknown_fields() {
        let state = seeded_state();
        let mut doc: serde_json::Value =
            serde_json::from_slice(&state.to_snapshot().unwrap()).unwrap();
        doc.as_object_mut()
            .unwrap()
            .insert("introduced_later".into(), serde_json::json!(17));

        let bytes = serde_json::to_vec(&doc).unwrap();
        let restored = DeploymentState::from_snapshot(&bytes).unwrap();
        let round: serde_json::Value =
            serde_json::from_slice(&restored.to_snapshot().unwrap()).unwrap();
        assert_eq!(round["introduced_later"], serde_json::json!(17));
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let mut doc: serde_json::Value =
            serde_json::from_slice(&seeded_state().to_snapshot().unwrap()).unwrap();
        // A record referencing a cluster that is not registered
        doc["components"]["consensus_node"] = serde_json::json!({
            "0": {
                "id": 0,
                "name": "ghost",
                "cluster_ref": "missing",
                "namespace": "ns",
                "phase": "requested",
                "spec": {
                    "kind": "consensus_node",
                    "node_id": 0,
                    "account_id": "0.0.3",
                    "gossip_endpoints": ["g:1"],
                    "grpc_endpoints": ["r:1"],
                },
            }
        });
        doc["next_id"] = serde_json::json!({"consensus_node": 1});

        let err = DeploymentState::from_snapshot(&serde_json::to_vec(&doc).unwrap()).unwrap_err();
        assert!(matches!(err, Error::CorruptState(_)));
    }
}
