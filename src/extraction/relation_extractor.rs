//! Relation extraction against a finalised entity list.
//!
//! Candidates come back from the model with endpoints given as ids or names.
//! Each candidate is checked on its own: unresolvable endpoints drop just
//! that relation, confidence is clamped into [0, 1], a missing type becomes
//! `RELATED_TO`, and everything else the model reported stays on the edge.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::prompts::{relation_extraction_input, Prompt};
use super::{complete_records, string_field, ExtractionOptions};
use crate::completion::CompletionProvider;
use crate::graph::relation::RELATION_CORE_FIELDS;
use crate::graph::{canonical_name, type_token, Entity, IdStrategy, Relation, DEFAULT_RELATION_TYPE};
use crate::{Error, Result};

const SOURCE_KEYS: &[&str] = &["source_entity_id", "source_id", "source", "source_name"];
const TARGET_KEYS: &[&str] = &["target_entity_id", "target_id", "target", "target_name"];
const TYPE_KEYS: &[&str] = &["relation_type", "type", "relationship"];

/// Accepted relations plus the validation errors of the dropped ones.
#[derive(Debug, Default)]
pub struct RelationBatch {
    pub relations: Vec<Relation>,
    pub dropped: Vec<Error>,
}

pub struct RelationExtractor {
    provider: Arc<dyn CompletionProvider>,
    options: ExtractionOptions,
}

impl RelationExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>, options: ExtractionOptions) -> Self {
        Self { provider, options }
    }

    pub async fn extract(&self, text: &str, entities: &[Entity]) -> Result<Vec<Relation>> {
        Ok(self.extract_with_report(text, entities).await?.relations)
    }

    /// Like [`extract`](Self::extract), also returning why candidates were
    /// dropped.
    pub async fn extract_with_report(&self, text: &str, entities: &[Entity]) -> Result<RelationBatch> {
        if entities.is_empty() || text.trim().is_empty() {
            debug!("Nothing to relate: {} entities", entities.len());
            return Ok(RelationBatch::default());
        }

        let listing = entities
            .iter()
            .map(|e| format!("- id: {}, name: {}, type: {}", e.id, e.name, e.entity_type))
            .collect::<Vec<_>>()
            .join("\n");
        let request = self.options.request(
            Prompt::RelationExtraction.load(),
            relation_extraction_input(&listing, text),
        );
        let records =
            complete_records(self.provider.as_ref(), &self.options, request, "relations").await?;

        let batch = Self::validate(records, entities, self.options.id_strategy);
        info!(
            "Relations: {} accepted, {} dropped",
            batch.relations.len(),
            batch.dropped.len()
        );
        Ok(batch)
    }

    /// Checks raw candidate records against `entities`.
    pub fn validate(
        records: Vec<Map<String, Value>>,
        entities: &[Entity],
        id_strategy: IdStrategy,
    ) -> RelationBatch {
        let resolver = EndpointResolver::new(entities);
        let mut batch = RelationBatch::default();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for record in records {
            let source = resolver.resolve(&record, SOURCE_KEYS);
            let target = resolver.resolve(&record, TARGET_KEYS);
            let (source, target) = match (source, target) {
                (Some(s), Some(t)) => (s, t),
                (source, _) => {
                    let side = if source.is_none() { "source" } else { "target" };
                    let shown = |keys: &[&str]| string_field(&record, keys).unwrap_or_else(|| "?".into());
                    let err = Error::Validation(format!(
                        "relation {} -> {}: unresolvable {} endpoint",
                        shown(SOURCE_KEYS),
                        shown(TARGET_KEYS),
                        side
                    ));
                    warn!("Dropping relation: {}", err);
                    batch.dropped.push(err);
                    continue;
                }
            };

            let relation = build_relation(record, source, target, id_strategy);
            match seen.get(&relation.id) {
                Some(&idx) => {
                    if relation.richness() > batch.relations[idx].richness() {
                        batch.relations[idx] = relation;
                    }
                }
                None => {
                    seen.insert(relation.id.clone(), batch.relations.len());
                    batch.relations.push(relation);
                }
            }
        }
        batch
    }
}

struct EndpointResolver<'a> {
    ids: HashMap<&'a str, &'a str>,
    names: HashMap<String, &'a str>,
}

impl<'a> EndpointResolver<'a> {
    fn new(entities: &'a [Entity]) -> Self {
        let mut names = HashMap::new();
        for entity in entities {
            names.entry(canonical_name(&entity.name)).or_insert(entity.id.as_str());
        }
        Self {
            ids: entities.iter().map(|e| (e.id.as_str(), e.id.as_str())).collect(),
            names,
        }
    }

    /// Id first, then normalised name, over each key in turn.
    fn resolve(&self, record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| string_field(record, &[*key]))
            .find_map(|value| {
                self.ids
                    .get(value.as_str())
                    .or_else(|| self.names.get(&canonical_name(&value)))
                    .map(|id| id.to_string())
            })
    }
}

fn build_relation(
    mut record: Map<String, Value>,
    source: String,
    target: String,
    id_strategy: IdStrategy,
) -> Relation {
    let relation_type = string_field(&record, TYPE_KEYS)
        .and_then(|t| type_token(&t))
        .unwrap_or_else(|| DEFAULT_RELATION_TYPE.to_string());
    let description = string_field(&record, &["description"]);
    let confidence = record.get("confidence").and_then(clamp_confidence);
    let metadata = match record.remove("metadata") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let id = id_strategy.relation_id(&source, &relation_type, &target);
    let mut relation = Relation::new(id, source, target, relation_type);
    relation.description = description;
    relation.confidence = confidence;
    relation.metadata = metadata;
    relation.attributes = record
        .into_iter()
        .filter(|(key, value)| {
            !value.is_null()
                && !RELATION_CORE_FIELDS.contains(&key.as_str())
                && !SOURCE_KEYS.contains(&key.as_str())
                && !TARGET_KEYS.contains(&key.as_str())
                && !TYPE_KEYS.contains(&key.as_str())
        })
        .collect();
    relation
}

/// Numeric (or numeric string) confidence clamped into [0, 1].
fn clamp_confidence(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}
