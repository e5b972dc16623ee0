//! Class dependency graph
//!
//! Nodes are extractable schema classes, edges point from a class to what
//! it depends on: its parent (`is_a`) or, for relationship classes, its
//! subject and object classes. Predicate vocabularies never enter the graph.
//!
//! The graph is an arena with stable indices, so pruning nodes never
//! invalidates the name index of the survivors.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use schemex_core::{ClassKind, Schema, SchemaError};

/// Why a dependency edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRole {
    Parent,
    Subject,
    Object,
}

/// Dependency graph over extractable classes
#[derive(Debug, Clone, Default)]
pub struct ClassGraph {
    pub(crate) graph: StableDiGraph<String, EdgeRole>,
    pub(crate) index: HashMap<String, NodeIndex>,
}

/// Entry of the exported dependency map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub dependencies: Vec<String>,
}

impl ClassGraph {
    /// Build the graph from a schema.
    ///
    /// `root_types` are `is_a` targets imported from outside the schema
    /// (`NamedEntity`, `Triple`, ...); they add no edge.
    pub fn build(schema: &Schema, root_types: &[String]) -> Result<Self, SchemaError> {
        let mut graph = Self::default();

        for name in schema.classes.keys() {
            if schema.kind_of(name) == Some(ClassKind::Concept) {
                let node = graph.graph.add_node(name.clone());
                graph.index.insert(name.clone(), node);
            }
        }

        for (name, class) in &schema.classes {
            let Some(&node) = graph.index.get(name) else {
                continue;
            };

            let parent = class
                .is_a
                .as_deref()
                .filter(|p| !root_types.iter().any(|r| r == p));

            let parent_node = match parent {
                Some(p) => Some(graph.index.get(p).copied().ok_or_else(|| {
                    SchemaError::UnknownClass {
                        class: name.clone(),
                        reference: p.to_string(),
                    }
                })?),
                None => None,
            };

            if class.is_relationship_shaped() {
                if parent_node.is_some() {
                    return Err(SchemaError::ConflictingDependencies {
                        class: name.clone(),
                    });
                }
                let (subject, object) = graph.resolve_endpoints(name, class)?;
                graph.graph.add_edge(node, subject, EdgeRole::Subject);
                graph.graph.add_edge(node, object, EdgeRole::Object);
            } else if let Some(parent) = parent_node {
                graph.graph.add_edge(node, parent, EdgeRole::Parent);
            }
        }

        if let Err(cycle) = toposort(&graph.graph, None) {
            return Err(SchemaError::Cycle {
                class: graph.graph[cycle.node_id()].clone(),
            });
        }

        tracing::debug!(
            classes = graph.len(),
            edges = graph.graph.edge_count(),
            "Class graph built"
        );

        Ok(graph)
    }

    fn resolve_endpoints(
        &self,
        name: &str,
        class: &schemex_core::ClassDefinition,
    ) -> Result<(NodeIndex, NodeIndex), SchemaError> {
        let range = |attribute: &str, value: Option<&str>| {
            value
                .map(str::to_string)
                .ok_or_else(|| SchemaError::MissingEndpoint {
                    class: name.to_string(),
                    attribute: attribute.to_string(),
                })
        };
        let subject = range(schemex_core::schema::SUBJECT, class.subject_range())?;
        let object = range(schemex_core::schema::OBJECT, class.object_range())?;

        match (self.index.get(&subject), self.index.get(&object)) {
            (Some(&s), Some(&o)) => Ok((s, o)),
            (Some(_), None) => Err(SchemaError::UnresolvedEndpoint {
                class: name.to_string(),
                resolved: subject,
                missing: object,
            }),
            (None, Some(_)) => Err(SchemaError::UnresolvedEndpoint {
                class: name.to_string(),
                resolved: object,
                missing: subject,
            }),
            (None, None) => Err(SchemaError::UnknownClass {
                class: name.to_string(),
                reference: subject,
            }),
        }
    }

    /// Number of classes currently in the graph
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.index.contains_key(class_name)
    }

    /// Class names in ascending order
    pub fn classes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Outgoing dependencies, parent first, then subject, then object
    pub fn dependencies(&self, class_name: &str) -> Option<Vec<(EdgeRole, &str)>> {
        let &node = self.index.get(class_name)?;
        let mut deps: Vec<(EdgeRole, &str)> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (*e.weight(), self.graph[e.target()].as_str()))
            .collect();
        deps.sort_by_key(|(role, _)| *role);
        Some(deps)
    }

    /// Number of outgoing dependency edges
    pub fn dependency_count(&self, class_name: &str) -> Option<usize> {
        let &node = self.index.get(class_name)?;
        Some(
            self.graph
                .edges_directed(node, Direction::Outgoing)
                .count(),
        )
    }

    /// Direct dependents (reverse adjacency), ascending
    pub fn dependents(&self, class_name: &str) -> Vec<&str> {
        let Some(&node) = self.index.get(class_name) else {
            return Vec::new();
        };
        let names: BTreeSet<&str> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| self.graph[n].as_str())
            .collect();
        names.into_iter().collect()
    }

    /// Export as `{class: {"dependencies": [...]}}`
    pub fn dependency_map(&self) -> BTreeMap<String, DependencyEntry> {
        self.classes()
            .into_iter()
            .map(|name| {
                let dependencies = self
                    .dependencies(name)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(_, dep)| dep.to_string())
                    .collect();
                (name.to_string(), DependencyEntry { dependencies })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use schemex_core::schema::{NAMED_ENTITY, OBJECT, SUBJECT, TRIPLE};
    use schemex_core::{AttributeDefinition, ClassDefinition, ExtractionConfig};

    pub(crate) fn roots() -> Vec<String> {
        ExtractionConfig::default().root_types
    }

    pub(crate) fn gene_schema() -> Schema {
        Schema::from_json_str(
            r#"{
            "classes": {
                "Gene": {"is_a": "NamedEntity", "attributes": {"label": {"identifier": true}}},
                "Enzyme": {"is_a": "Gene"},
                "RegulatesPredicate": {
                    "is_a": "RelationshipType",
                    "attributes": {"id": {"identifier": true, "pattern": "regulates|inhibits"}}
                },
                "Regulates": {
                    "is_a": "Triple",
                    "attributes": {
                        "subject": {"range": "Gene"},
                        "predicate": {"range": "RegulatesPredicate"},
                        "object": {"range": "Enzyme"}
                    }
                }
            }
        }"#,
        )
        .unwrap()
    }

    fn schema(json: &str) -> Schema {
        Schema::from_json_str(json).unwrap()
    }

    #[test]
    fn test_build_edges() {
        let graph = ClassGraph::build(&gene_schema(), &roots()).unwrap();

        assert_eq!(graph.len(), 3);
        assert!(!graph.contains("RegulatesPredicate"));
        assert_eq!(graph.dependency_count("Gene"), Some(0));
        assert_eq!(graph.dependency_count("Enzyme"), Some(1));
        assert_eq!(graph.dependency_count("Regulates"), Some(2));
        assert_eq!(
            graph.dependencies("Regulates").unwrap(),
            vec![(EdgeRole::Subject, "Gene"), (EdgeRole::Object, "Enzyme")]
        );
        assert_eq!(graph.dependents("Gene"), vec!["Enzyme", "Regulates"]);
    }

    #[test]
    fn test_dependency_map() {
        let graph = ClassGraph::build(&gene_schema(), &roots()).unwrap();
        let map = graph.dependency_map();
        assert!(map["Gene"].dependencies.is_empty());
        assert_eq!(map["Enzyme"].dependencies, vec!["Gene"]);
        assert_eq!(map["Regulates"].dependencies, vec!["Gene", "Enzyme"]);
    }

    #[test]
    fn test_self_relationship_has_two_edges() {
        let graph = ClassGraph::build(
            &schema(
                r#"{"classes": {
                    "Gene": {"is_a": "NamedEntity"},
                    "Interacts": {"is_a": "Triple", "attributes": {
                        "subject": {"range": "Gene"}, "object": {"range": "Gene"}}}
                }}"#,
            ),
            &roots(),
        )
        .unwrap();
        assert_eq!(graph.dependency_count("Interacts"), Some(2));
        assert_eq!(graph.dependents("Gene"), vec!["Interacts"]);
    }

    #[test]
    fn test_unknown_parent() {
        let err = ClassGraph::build(
            &schema(r#"{"classes": {"Enzyme": {"is_a": "Protein"}}}"#),
            &roots(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownClass {
                class: "Enzyme".to_string(),
                reference: "Protein".to_string()
            }
        );
    }

    #[test]
    fn test_single_resolvable_endpoint() {
        let err = ClassGraph::build(
            &schema(
                r#"{"classes": {
                    "Gene": {},
                    "Binds": {"is_a": "Triple", "attributes": {
                        "subject": {"range": "Gene"}, "object": {"range": "Protein"}}}
                }}"#,
            ),
            &roots(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedEndpoint { ref missing, .. } if missing == "Protein"));
    }

    #[test]
    fn test_missing_endpoint_attribute() {
        let err = ClassGraph::build(
            &schema(
                r#"{"classes": {
                    "Gene": {},
                    "Binds": {"is_a": "Triple", "attributes": {"subject": {"range": "Gene"}}}
                }}"#,
            ),
            &roots(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::MissingEndpoint { ref attribute, .. } if attribute == "object"));
    }

    #[test]
    fn test_conflicting_dependencies() {
        let err = ClassGraph::build(
            &schema(
                r#"{"classes": {
                    "Gene": {},
                    "Odd": {"is_a": "Gene", "attributes": {
                        "subject": {"range": "Gene"}, "object": {"range": "Gene"}}}
                }}"#,
            ),
            &roots(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingDependencies { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = ClassGraph::build(
            &schema(r#"{"classes": {"A": {"is_a": "B"}, "B": {"is_a": "A"}}}"#),
            &roots(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Cycle { .. }));
    }

    #[test]
    fn test_relationship_to_itself_is_a_cycle() {
        let err = ClassGraph::build(
            &schema(
                r#"{"classes": {"Loop": {"attributes": {
                    "subject": {"range": "Loop"}, "object": {"range": "Loop"}}}}}"#,
            ),
            &roots(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::Cycle {
                class: "Loop".to_string()
            }
        );
    }

    // Class i is a named entity, a child of an earlier class, or a triple
    // whose endpoints are earlier classes, so every schema is acyclic
    fn acyclic_schema(specs: &[(u8, usize, usize)]) -> Schema {
        let mut schema = Schema::default();
        for (i, &(kind, a, b)) in specs.iter().enumerate() {
            let mut class = ClassDefinition::default();
            match if i == 0 { 0 } else { kind } {
                0 => class.is_a = Some(NAMED_ENTITY.to_string()),
                1 => class.is_a = Some(format!("K{}", a % i)),
                _ => {
                    class.is_a = Some(TRIPLE.to_string());
                    for (attr, target) in [(SUBJECT, a % i), (OBJECT, b % i)] {
                        class.attributes.insert(
                            attr.to_string(),
                            AttributeDefinition {
                                range: Some(format!("K{target}")),
                                ..Default::default()
                            },
                        );
                    }
                }
            }
            schema.classes.insert(format!("K{i}"), class);
        }
        schema
    }

    proptest! {
        #[test]
        fn prop_built_edge_counts_bounded(
            specs in prop::collection::vec((0u8..3, any::<usize>(), any::<usize>()), 1..12),
        ) {
            let schema = acyclic_schema(&specs);
            let graph = ClassGraph::build(&schema, &roots()).unwrap();
            prop_assert_eq!(graph.len(), specs.len());

            let mut triples = 0;
            for (name, class) in &schema.classes {
                let count = graph.dependency_count(name);
                prop_assert!(matches!(count, Some(0..=2)));
                if class.is_relationship_shaped() {
                    triples += 1;
                    prop_assert_eq!(count, Some(2));
                } else if class.is_a.as_deref() == Some(NAMED_ENTITY) {
                    prop_assert_eq!(count, Some(0));
                } else {
                    prop_assert_eq!(count, Some(1));
                }
            }

            let plan = crate::tiers::classify(&graph);
            prop_assert!(plan.out_of_scope.is_empty());
            prop_assert_eq!(plan.relationships.len(), triples);
            prop_assert_eq!(plan.extractable(), specs.len());
        }
    }
}
