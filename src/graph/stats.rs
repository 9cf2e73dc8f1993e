use std::collections::{BTreeMap, HashMap};

use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::Serialize;

use super::document::DocumentGraph;

/// Summary numbers for a [`DocumentGraph`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub total_entities: usize,
    pub total_relations: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
    /// Directed density: relations / (n * (n - 1))
    pub density: f64,
    pub connected_components: usize,
}

impl GraphStatistics {
    pub fn compute(graph: &DocumentGraph) -> Self {
        let mut entity_types = BTreeMap::new();
        for entity in graph.entities() {
            *entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        let mut relation_types = BTreeMap::new();
        for relation in graph.relations() {
            *relation_types
                .entry(relation.relation_type.clone())
                .or_insert(0) += 1;
        }

        let n = graph.entities().len();
        let density = if n > 1 {
            graph.relations().len() as f64 / (n * (n - 1)) as f64
        } else {
            0.0
        };

        Self {
            total_entities: n,
            total_relations: graph.relations().len(),
            entity_types,
            relation_types,
            density,
            connected_components: weakly_connected_components(graph),
        }
    }

    /// Types sorted by count, most frequent first.
    pub fn top_entity_types(&self) -> Vec<(&str, usize)> {
        sorted_by_count(&self.entity_types)
    }

    pub fn top_relation_types(&self) -> Vec<(&str, usize)> {
        sorted_by_count(&self.relation_types)
    }
}

fn sorted_by_count(map: &BTreeMap<String, usize>) -> Vec<(&str, usize)> {
    let mut items: Vec<(&str, usize)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    items
}

fn weakly_connected_components(graph: &DocumentGraph) -> usize {
    let mut network: UnGraph<(), ()> =
        UnGraph::with_capacity(graph.entities().len(), graph.relations().len());
    let nodes: HashMap<&str, NodeIndex> = graph
        .entities()
        .iter()
        .map(|e| (e.id.as_str(), network.add_node(())))
        .collect();

    for relation in graph.relations() {
        if let (Some(&a), Some(&b)) = (
            nodes.get(relation.source_entity_id.as_str()),
            nodes.get(relation.target_entity_id.as_str()),
        ) {
            network.add_edge(a, b, ());
        }
    }
    connected_components(&network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, Relation};

    #[test]
    fn counts_types_density_and_components() {
        let graph = DocumentGraph::new(
            vec![
                Entity::new("a", "A", "PERSON"),
                Entity::new("b", "B", "PERSON"),
                Entity::new("c", "C", "ORGANIZATION"),
                Entity::new("d", "D", "LOCATION"),
            ],
            vec![
                Relation::new("r1", "a", "c", "WORKS_FOR"),
                Relation::new("r2", "b", "c", "WORKS_FOR"),
            ],
        )
        .unwrap();

        let stats = GraphStatistics::compute(&graph);

        assert_eq!(stats.total_entities, 4);
        assert_eq!(stats.entity_types.get("PERSON"), Some(&2));
        assert_eq!(stats.top_relation_types(), vec![("WORKS_FOR", 2)]);
        assert_eq!(stats.top_entity_types()[0], ("PERSON", 2));
        assert!((stats.density - 2.0 / 12.0).abs() < 1e-9);
        assert_eq!(stats.connected_components, 2);
    }

    #[test]
    fn empty_graph_has_zero_density() {
        let stats = GraphStatistics::compute(&DocumentGraph::default());
        assert_eq!(stats.density, 0.0);
        assert_eq!(stats.connected_components, 0);
    }
}
