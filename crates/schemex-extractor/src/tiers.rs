//! Tier classification
//!
//! Classes are partitioned by their number of outgoing dependency edges.
//! The plan is always derived from the current graph, so it must be
//! recomputed after every prune.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use schemex_core::TierKind;

use crate::graph::{ClassGraph, EdgeRole};

/// Shape of a class's dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum ClassTier {
    Independent,
    Specialization { parent: String },
    Relationship { subject: String, object: String },
}

impl ClassTier {
    pub fn kind(&self) -> TierKind {
        match self {
            Self::Independent => TierKind::Independent,
            Self::Specialization { .. } => TierKind::Specialization,
            Self::Relationship { .. } => TierKind::Relationship,
        }
    }
}

/// Partition of the current graph into tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPlan {
    /// Classes without dependencies, ascending
    pub independent: Vec<String>,

    /// Specialization → parent, ascending by class name
    pub specializations: BTreeMap<String, String>,

    /// Relationship → [subject class, object class]
    pub relationships: BTreeMap<String, [String; 2]>,

    /// Classes with more than two dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_of_scope: Vec<String>,
}

impl TierPlan {
    /// Number of classes that will be extracted
    pub fn extractable(&self) -> usize {
        self.independent.len() + self.specializations.len() + self.relationships.len()
    }

    /// Tier of a class in this plan
    pub fn tier_of(&self, class_name: &str) -> Option<ClassTier> {
        if self.independent.iter().any(|c| c == class_name) {
            return Some(ClassTier::Independent);
        }
        if let Some(parent) = self.specializations.get(class_name) {
            return Some(ClassTier::Specialization {
                parent: parent.clone(),
            });
        }
        self.relationships
            .get(class_name)
            .map(|[subject, object]| ClassTier::Relationship {
                subject: subject.clone(),
                object: object.clone(),
            })
    }
}

/// Classify every class of the graph by its current dependencies
pub fn classify(graph: &ClassGraph) -> TierPlan {
    let mut plan = TierPlan::default();

    for class in graph.classes() {
        let deps = graph.dependencies(class).unwrap_or_default();
        match deps.as_slice() {
            [] => plan.independent.push(class.to_string()),
            [(_, parent)] => {
                plan.specializations
                    .insert(class.to_string(), parent.to_string());
            }
            [(EdgeRole::Subject, subject), (EdgeRole::Object, object)] => {
                plan.relationships
                    .insert(class.to_string(), [subject.to_string(), object.to_string()]);
            }
            _ => {
                tracing::debug!(class, edges = deps.len(), "Class is out of scope");
                plan.out_of_scope.push(class.to_string());
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{gene_schema, roots};

    #[test]
    fn test_classify_gene_schema() {
        let graph = ClassGraph::build(&gene_schema(), &roots()).unwrap();
        let plan = classify(&graph);

        assert_eq!(plan.independent, vec!["Gene"]);
        assert_eq!(plan.specializations.get("Enzyme").map(String::as_str), Some("Gene"));
        assert_eq!(
            plan.relationships.get("Regulates"),
            Some(&["Gene".to_string(), "Enzyme".to_string()])
        );
        assert!(plan.out_of_scope.is_empty());
        assert_eq!(plan.extractable(), 3);
    }

    #[test]
    fn test_tier_of() {
        let graph = ClassGraph::build(&gene_schema(), &roots()).unwrap();
        let plan = classify(&graph);

        assert_eq!(plan.tier_of("Gene"), Some(ClassTier::Independent));
        assert_eq!(
            plan.tier_of("Enzyme"),
            Some(ClassTier::Specialization {
                parent: "Gene".to_string()
            })
        );
        assert_eq!(plan.tier_of("Regulates").unwrap().kind(), TierKind::Relationship);
        assert_eq!(plan.tier_of("RegulatesPredicate"), None);
    }

    #[test]
    fn test_classify_empty_graph() {
        let plan = classify(&ClassGraph::default());
        assert_eq!(plan, TierPlan::default());
    }

    #[test]
    fn test_tier_serialization() {
        let tier = ClassTier::Relationship {
            subject: "Gene".to_string(),
            object: "Enzyme".to_string(),
        };
        let json = serde_json::to_value(&tier).unwrap();
        assert_eq!(json["tier"], "relationship");
        assert_eq!(json["subject"], "Gene");
    }
}
