//! Graph store backed by Neo4j.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    EdgeSummary, EdgeWrite, GraphStore, Neighborhood, NodeSummary, NodeWrite, ScoredNode,
    StoreStats, CHUNK_LABEL, DOCUMENT_LABEL, EMBEDDED_LABEL, EMBEDDING_PROPERTY, VECTOR_INDEX_NAME,
};
use crate::completion::RetryPolicy;
use crate::config::Neo4jSettings;
use crate::{Error, Result};

const NODE_FIELDS: &str = "n.id AS id, n.name AS name, n.type AS type, n.description AS description";
const EDGE_FIELDS: &str =
    "r.id AS id, type(r) AS type, startNode(r).id AS source, endNode(r).id AS target, r.description AS description";

pub struct Neo4jGraphStore {
    graph: Graph,
    policy: RetryPolicy,
}

impl Neo4jGraphStore {
    /// Connect to the Neo4j server described by `settings`.
    pub async fn connect(settings: &Neo4jSettings, policy: RetryPolicy) -> Result<Self> {
        let password = settings
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Config("NEO4J_PASSWORD not set".to_string()))?;

        let mut builder = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(password);
        if let Some(database) = settings.database.as_deref().filter(|d| !d.is_empty()) {
            builder = builder.db(database);
        }
        let config = builder.build()?;
        let graph = Graph::connect(config).await?;

        info!("Connected to Neo4j at {}", settings.uri);
        Ok(Self { graph, policy })
    }

    /// Runs `op` under the per-attempt timeout, retrying transient failures with backoff.
    async fn retrying<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(self.policy.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => Error::Transient(format!(
                    "neo4j {} timed out after {:?}",
                    what, self.policy.timeout
                )),
            };
            if !err.is_retryable() || attempt >= attempts {
                return Err(err);
            }
            let delay = self.policy.backoff(attempt, err.retry_after());
            warn!("neo4j {} failed ({}), retrying in {:?}", what, err, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run(&self, what: &str, q: Query) -> Result<()> {
        self.retrying(what, || {
            let q = q.clone();
            async move { self.graph.run(q).await.map_err(Error::from) }
        })
        .await
    }

    async fn fetch(&self, what: &str, q: Query) -> Result<Vec<Row>> {
        self.retrying(what, || {
            let q = q.clone();
            async move {
                let mut stream = self.graph.execute(q).await?;
                let mut rows = Vec::new();
                while let Some(row) = stream.next().await? {
                    rows.push(row);
                }
                Ok::<_, Error>(rows)
            }
        })
        .await
    }

    async fn index_exists(&self) -> Result<bool> {
        let rows = self
            .fetch("index lookup", query("SHOW INDEXES YIELD name RETURN name"))
            .await?;
        Ok(rows
            .iter()
            .any(|row| row.get::<String>("name").ok().as_deref() == Some(VECTOR_INDEX_NAME)))
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn clear(&self) -> Result<()> {
        self.run("clear", query("MATCH (n) DETACH DELETE n")).await?;
        info!("Cleared existing graph data");
        Ok(())
    }

    async fn upsert_node(&self, node: &NodeWrite) -> Result<()> {
        let mut cypher = format!(
            "MERGE (n {{id: $id}})
             SET n:`{}`
             SET n += $props",
            node.label
        );
        let mut q_params: Vec<(&str, BoltType)> = vec![
            ("id", BoltType::from(node.id.as_str())),
            ("props", props_to_bolt(&node.properties)),
        ];
        if let Some(embedding) = &node.embedding {
            cypher.push_str(&format!(
                "\n             SET n:`{}`, n.`{}` = $embedding",
                EMBEDDED_LABEL, EMBEDDING_PROPERTY
            ));
            let vector: Vec<f64> = embedding.iter().map(|v| f64::from(*v)).collect();
            q_params.push(("embedding", BoltType::from(vector)));
        }

        let mut q = query(&cypher);
        for (key, value) in q_params {
            q = q.param(key, value);
        }
        self.run("node upsert", q).await?;
        debug!("Upserted node {} ({})", node.id, node.label);
        Ok(())
    }

    async fn upsert_edge(&self, edge: &EdgeWrite) -> Result<bool> {
        // Relationship types cannot be parameters; they are sanitised upstream.
        let cypher = format!(
            "MATCH (s {{id: $source_id}})
             MATCH (t {{id: $target_id}})
             MERGE (s)-[r:`{}` {{id: $id}}]->(t)
             SET r += $props
             RETURN count(r) AS merged",
            edge.rel_type
        );
        let q = query(&cypher)
            .param("source_id", edge.source_id.as_str())
            .param("target_id", edge.target_id.as_str())
            .param("id", edge.id.as_str())
            .param("props", props_to_bolt(&edge.properties));

        let rows = self.fetch("edge upsert", q).await?;
        let merged = rows
            .first()
            .and_then(|row| row.get::<i64>("merged").ok())
            .unwrap_or(0);
        debug!(
            "Upserted edge {} -[{}]-> {} ({})",
            edge.source_id, edge.rel_type, edge.target_id, merged
        );
        Ok(merged > 0)
    }

    async fn ensure_vector_index(&self, dimension: usize) -> Result<()> {
        let cypher = format!(
            "CREATE VECTOR INDEX `{}` IF NOT EXISTS
             FOR (n:`{}`) ON (n.`{}`)
             OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: 'cosine'}}}}",
            VECTOR_INDEX_NAME, EMBEDDED_LABEL, EMBEDDING_PROPERTY, dimension
        );
        self.run("vector index", query(&cypher)).await?;
        info!("Vector index {} ready ({} dimensions)", VECTOR_INDEX_NAME, dimension);
        Ok(())
    }

    async fn vector_search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredNode>> {
        if top_k == 0 || !self.index_exists().await? {
            debug!("No vector index {}; nothing to search", VECTOR_INDEX_NAME);
            return Ok(Vec::new());
        }

        let query_vector: Vec<f64> = vector.iter().map(|v| f64::from(*v)).collect();
        let q = query(&format!(
            "CALL db.index.vector.queryNodes($index_name, $k, $query_vector)
             YIELD node AS n, score
             RETURN {}, score
             ORDER BY score DESC",
            NODE_FIELDS
        ))
        .param("index_name", VECTOR_INDEX_NAME)
        .param("k", top_k as i64)
        .param("query_vector", query_vector);

        let rows = self.fetch("vector search", q).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(ScoredNode {
                    node: node_from_row(row)?,
                    score: row.get::<f64>("score").unwrap_or(0.0),
                })
            })
            .collect())
    }

    async fn neighborhood(&self, ids: &[String], hops: usize) -> Result<Neighborhood> {
        if ids.is_empty() {
            return Ok(Neighborhood::default());
        }
        let seeds: Vec<String> = ids.to_vec();

        if hops == 0 {
            let q = query(&format!("MATCH (n) WHERE n.id IN $ids RETURN {}", NODE_FIELDS))
                .param("ids", seeds);
            let rows = self.fetch("neighborhood", q).await?;
            return Ok(Neighborhood {
                nodes: rows.iter().filter_map(node_from_row).collect(),
                edges: Vec::new(),
            });
        }

        // Variable-length bounds cannot be parameters.
        let entity_path = format!(
            "none(x IN nodes(path) WHERE x:`{}` OR x:`{}`)",
            DOCUMENT_LABEL, CHUNK_LABEL
        );
        let node_q = query(&format!(
            "MATCH (seed) WHERE seed.id IN $ids
             OPTIONAL MATCH path = (seed)-[*1..{hops}]-(other)
             WHERE {entity_path}
             WITH collect(DISTINCT seed) + collect(DISTINCT other) AS found
             UNWIND found AS n
             WITH DISTINCT n
             RETURN {fields}",
            hops = hops,
            entity_path = entity_path,
            fields = NODE_FIELDS
        ))
        .param("ids", seeds.clone());
        let edge_q = query(&format!(
            "MATCH (seed) WHERE seed.id IN $ids
             MATCH path = (seed)-[*1..{hops}]-()
             WHERE {entity_path}
             UNWIND relationships(path) AS r
             WITH DISTINCT r
             RETURN {fields}",
            hops = hops,
            entity_path = entity_path,
            fields = EDGE_FIELDS
        ))
        .param("ids", seeds);

        let nodes = self.fetch("neighborhood", node_q).await?;
        let edges = self.fetch("neighborhood", edge_q).await?;
        Ok(Neighborhood {
            nodes: nodes.iter().filter_map(node_from_row).collect(),
            edges: edges.iter().filter_map(edge_from_row).collect(),
        })
    }

    async fn relations_with_property(&self, name: &str) -> Result<Vec<EdgeSummary>> {
        let q = query(&format!(
            "MATCH ()-[r]->() WHERE r[$name] IS NOT NULL RETURN {}",
            EDGE_FIELDS
        ))
        .param("name", name);
        let rows = self.fetch("property lookup", q).await?;
        Ok(rows.iter().filter_map(edge_from_row).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let count = |rows: Vec<Row>| {
            rows.first()
                .and_then(|row| row.get::<i64>("count").ok())
                .unwrap_or(0) as u64
        };
        let grouped = |rows: Vec<Row>, key: &str| -> BTreeMap<String, u64> {
            rows.iter()
                .filter_map(|row| {
                    let name = row.get::<String>(key).ok()?;
                    let count = row.get::<i64>("count").ok()?;
                    Some((name, count as u64))
                })
                .collect()
        };

        let total_nodes = count(
            self.fetch("stats", query("MATCH (n) RETURN count(n) AS count"))
                .await?,
        );
        let total_relationships = count(
            self.fetch("stats", query("MATCH ()-[r]->() RETURN count(r) AS count"))
                .await?,
        );
        let nodes_by_label = grouped(
            self.fetch(
                "stats",
                query("MATCH (n) UNWIND labels(n) AS label RETURN label, count(*) AS count"),
            )
            .await?,
            "label",
        );
        let relationships_by_type = grouped(
            self.fetch(
                "stats",
                query("MATCH ()-[r]->() RETURN type(r) AS type, count(*) AS count"),
            )
            .await?,
            "type",
        );

        Ok(StoreStats {
            total_nodes,
            total_relationships,
            nodes_by_label,
            relationships_by_type,
        })
    }
}

fn node_from_row(row: &Row) -> Option<NodeSummary> {
    Some(NodeSummary {
        id: row.get::<String>("id").ok()?,
        name: row.get::<String>("name").unwrap_or_default(),
        entity_type: row.get::<String>("type").unwrap_or_default(),
        description: row
            .get::<String>("description")
            .ok()
            .filter(|d| !d.is_empty()),
    })
}

fn edge_from_row(row: &Row) -> Option<EdgeSummary> {
    Some(EdgeSummary {
        id: row.get::<String>("id").unwrap_or_default(),
        rel_type: row.get::<String>("type").ok()?,
        source_id: row.get::<String>("source").ok()?,
        target_id: row.get::<String>("target").ok()?,
        description: row
            .get::<String>("description")
            .ok()
            .filter(|d| !d.is_empty()),
    })
}

fn props_to_bolt(props: &BTreeMap<String, Value>) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in props {
        map.put(BoltString::from(key.as_str()), to_bolt(value));
    }
    BoltType::Map(map)
}

fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(_) => BoltType::from(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_bolt() {
        assert_eq!(to_bolt(&json!(3)), BoltType::from(3i64));
        assert_eq!(to_bolt(&json!(0.5)), BoltType::from(0.5f64));
        assert_eq!(to_bolt(&json!("Uber")), BoltType::from("Uber"));
        assert!(matches!(to_bolt(&json!(["a", "b"])), BoltType::List(_)));
        assert!(matches!(to_bolt(&json!({"a": 1})), BoltType::String(_)));
        assert!(matches!(to_bolt(&Value::Null), BoltType::Null(_)));
    }

    #[test]
    fn props_become_a_bolt_map() {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), json!("Uber"));
        props.insert("founded".to_string(), json!(2009));
        assert!(matches!(props_to_bolt(&props), BoltType::Map(_)));
    }

    #[tokio::test]
    async fn connect_requires_password() {
        let settings = Neo4jSettings {
            password: None,
            ..Neo4jSettings::default()
        };
        let err = Neo4jGraphStore::connect(&settings, RetryPolicy::default())
            .await
            .err()
            .expect("missing password must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    #[ignore] // Requires a running Neo4j
    async fn test_round_trip_against_server() {
        dotenvy::dotenv().ok();
        let settings = crate::config::Config::from_env().neo4j;
        let store = Neo4jGraphStore::connect(&settings, RetryPolicy::default())
            .await
            .unwrap();
        store.ensure_vector_index(8).await.unwrap();
        assert!(store.vector_search(&[0.0; 8], 0).await.unwrap().is_empty());
        store.stats().await.unwrap();
    }
}
