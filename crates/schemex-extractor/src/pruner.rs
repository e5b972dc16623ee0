//! Cascading pruning
//!
//! Removing a class removes every class that (transitively) depends on it.
//! Missing upstream evidence is a control signal, not an error: the
//! orchestrator turns it into skips and prunes between tiers.

use std::collections::HashSet;

use petgraph::Direction;
use serde::{Deserialize, Serialize};

use schemex_core::ResultMap;

use crate::graph::ClassGraph;
use crate::tiers::classify;

/// Why a class was skipped or pruned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MissingEvidence {
    /// Parent of a specialization produced no instances
    EmptyParent { class: String, parent: String },

    /// One or both endpoints of a relationship produced no instances
    EmptyEndpoint {
        class: String,
        endpoints: Vec<String>,
    },
}

impl MissingEvidence {
    pub fn class_name(&self) -> &str {
        match self {
            Self::EmptyParent { class, .. } | Self::EmptyEndpoint { class, .. } => class,
        }
    }
}

/// A prune applied to a document's graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneEvent {
    pub trigger: MissingEvidence,

    /// Every class removed, trigger first
    pub removed: Vec<String>,
}

impl ClassGraph {
    /// Remove a class and everything transitively depending on it.
    ///
    /// Returns the removed class names. Pruning an absent class is a no-op.
    pub fn prune(&mut self, class_name: &str) -> Vec<String> {
        let Some(&start) = self.index.get(class_name) else {
            return Vec::new();
        };

        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        let mut doomed = Vec::new();

        while let Some(node) = stack.pop() {
            doomed.push(node);
            for dependent in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for node in doomed {
            if let Some(name) = self.graph.remove_node(node) {
                self.index.remove(&name);
                removed.push(name);
            }
        }

        removed
    }

    /// Copy of the graph with `class_name` pruned
    pub fn without(&self, class_name: &str) -> (ClassGraph, Vec<String>) {
        let mut graph = self.clone();
        let removed = graph.prune(class_name);
        (graph, removed)
    }
}

/// Whether a class produced any instances in the committed results
fn has_evidence(results: &ResultMap, class_name: &str) -> bool {
    results
        .get(class_name)
        .map(|r| r.has_instances())
        .unwrap_or(false)
}

/// Parent-emptiness check for a specialization.
///
/// The parent is never pruned; the caller only skips the child.
pub fn check_parent(class_name: &str, parent: &str, results: &ResultMap) -> Option<MissingEvidence> {
    (!has_evidence(results, parent)).then(|| MissingEvidence::EmptyParent {
        class: class_name.to_string(),
        parent: parent.to_string(),
    })
}

/// Endpoint-emptiness policy, applied before the relationship tier.
///
/// Every relationship with an empty endpoint is pruned together with the
/// empty endpoint(s), transitively.
pub fn apply_endpoint_policy(graph: &mut ClassGraph, results: &ResultMap) -> Vec<PruneEvent> {
    let plan = classify(graph);
    let mut events = Vec::new();

    for (class, [subject, object]) in &plan.relationships {
        if !graph.contains(class) {
            continue;
        }

        let mut endpoints: Vec<String> = Vec::new();
        for endpoint in [subject, object] {
            if !has_evidence(results, endpoint) && !endpoints.contains(endpoint) {
                endpoints.push(endpoint.clone());
            }
        }
        if endpoints.is_empty() {
            continue;
        }

        let mut removed = graph.prune(class);
        for endpoint in &endpoints {
            removed.extend(graph.prune(endpoint));
        }

        tracing::warn!(
            class = %class,
            endpoints = ?endpoints,
            removed = ?removed,
            "Pruned relationship with empty endpoint"
        );

        events.push(PruneEvent {
            trigger: MissingEvidence::EmptyEndpoint {
                class: class.clone(),
                endpoints,
            },
            removed,
        });
    }

    events
}
