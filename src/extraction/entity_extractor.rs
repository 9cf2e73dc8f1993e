//! Two-stage entity extraction.
//!
//! Stage 1 asks for entities without any type so the model is not steered by
//! a taxonomy; stage 2 sends that list back to have a type token assigned to
//! each entry. The merged result is filtered (no DATE/TIME), deduplicated by
//! normalised name and given fresh ids.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::prompts::{entity_categorization_input, entity_extraction_input, Prompt};
use super::{complete_records, string_field, ExtractionOptions};
use crate::completion::CompletionProvider;
use crate::graph::entity::ENTITY_CORE_FIELDS;
use crate::graph::{canonical_name, type_token, Entity, UNKNOWN_TYPE};
use crate::text::{render_with_markers, Chunk};
use crate::Result;

const TYPE_KEYS: &[&str] = &["type", "entity_type", "category"];

/// Entities of one extraction run, with what was filtered out.
#[derive(Debug, Default)]
pub struct EntityBatch {
    pub entities: Vec<Entity>,
    /// DATE/TIME entities removed.
    pub temporal: usize,
    /// Records without a usable name.
    pub unnamed: usize,
    /// Records folded into an earlier entry with the same name.
    pub duplicates: usize,
}

pub struct EntityExtractor {
    provider: Arc<dyn CompletionProvider>,
    options: ExtractionOptions,
}

impl EntityExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>, options: ExtractionOptions) -> Self {
        Self { provider, options }
    }

    /// Entities of a plain text, in the order the model reported them.
    pub async fn extract(&self, text: &str) -> Result<Vec<Entity>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.run(text).await?.entities)
    }

    /// Same as [`extract`](Self::extract) over chunk-marked text, so the
    /// model can cite `source_chunk_ids`.
    pub async fn extract_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Entity>> {
        Ok(self.extract_chunks_with_report(chunks).await?.entities)
    }

    pub async fn extract_chunks_with_report(&self, chunks: &[Chunk]) -> Result<EntityBatch> {
        if chunks.iter().all(|c| c.text.trim().is_empty()) {
            return Ok(EntityBatch::default());
        }
        self.run(&render_with_markers(chunks)).await
    }

    async fn run(&self, body: &str) -> Result<EntityBatch> {
        let candidates = self.extract_candidates(body).await?;
        if candidates.is_empty() {
            info!("Model reported no entities");
            return Ok(EntityBatch::default());
        }
        info!("Stage 1: {} candidate entities", candidates.len());

        let typed = self.categorize(candidates).await?;
        let batch = finalize(typed, &self.options);
        info!("Stage 2: {} typed entities after filtering", batch.entities.len());
        Ok(batch)
    }

    /// Stage 1: untyped records with temporary ids `c1, c2, ...`.
    async fn extract_candidates(&self, body: &str) -> Result<Vec<Map<String, Value>>> {
        let request = self.options.request(
            Prompt::EntityExtraction.load(),
            entity_extraction_input(body),
        );
        let records =
            complete_records(self.provider.as_ref(), &self.options, request, "entities").await?;

        let mut candidates = Vec::with_capacity(records.len());
        for mut record in records {
            let Some(name) = string_field(&record, &["name"]) else {
                debug!("Skipping entity without a name: {:?}", record);
                continue;
            };
            for key in TYPE_KEYS {
                record.remove(*key);
            }
            record.insert("name".to_string(), Value::String(name));
            record.insert(
                "id".to_string(),
                Value::String(format!("c{}", candidates.len() + 1)),
            );
            candidates.push(record);
        }
        Ok(candidates)
    }

    /// Stage 2: attaches a type to every candidate. Candidate fields are
    /// kept as they were; only the type is taken from the answer.
    async fn categorize(
        &self,
        candidates: Vec<Map<String, Value>>,
    ) -> Result<Vec<Map<String, Value>>> {
        let listing = serde_json::to_string_pretty(&candidates)?;
        let request = self.options.request(
            Prompt::EntityCategorization.load(),
            entity_categorization_input(&listing),
        );
        let answers =
            complete_records(self.provider.as_ref(), &self.options, request, "entities").await?;

        let mut by_id: HashMap<String, String> = HashMap::new();
        let mut by_name: HashMap<String, String> = HashMap::new();
        for answer in &answers {
            let Some(entity_type) = string_field(answer, TYPE_KEYS).and_then(|t| type_token(&t))
            else {
                continue;
            };
            if let Some(id) = string_field(answer, &["id"]) {
                by_id.entry(id).or_insert_with(|| entity_type.clone());
            }
            if let Some(name) = string_field(answer, &["name"]) {
                by_name.entry(canonical_name(&name)).or_insert(entity_type);
            }
        }

        let mut untyped = 0usize;
        let typed = candidates
            .into_iter()
            .map(|mut candidate| {
                let id = string_field(&candidate, &["id"]).unwrap_or_default();
                let name = string_field(&candidate, &["name"]).unwrap_or_default();
                let entity_type = by_id
                    .get(&id)
                    .or_else(|| by_name.get(&canonical_name(&name)))
                    .cloned()
                    .unwrap_or_else(|| {
                        untyped += 1;
                        UNKNOWN_TYPE.to_string()
                    });
                candidate.insert("type".to_string(), Value::String(entity_type));
                candidate
            })
            .collect();

        if untyped > 0 {
            debug!("{} entities left without a type", untyped);
        }
        Ok(typed)
    }
}

/// Turns typed records into entities: drops temporal ones, collapses
/// duplicates by normalised name and allocates final ids.
fn finalize(records: Vec<Map<String, Value>>, options: &ExtractionOptions) -> EntityBatch {
    let mut batch = EntityBatch::default();
    let mut position: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(entity) = record_to_entity(record).filter(|e| !canonical_name(&e.name).is_empty()) else {
            batch.unnamed += 1;
            continue;
        };
        if entity.is_temporal() {
            batch.temporal += 1;
            continue;
        }
        let key = canonical_name(&entity.name);
        match position.get(&key) {
            Some(&idx) => {
                batch.duplicates += 1;
                if prefer(&entity, &batch.entities[idx]) {
                    batch.entities[idx] = entity;
                }
            }
            None => {
                position.insert(key, batch.entities.len());
                batch.entities.push(entity);
            }
        }
    }

    if batch.unnamed > 0 {
        warn!("Dropped {} entities without a name", batch.unnamed);
    }
    if batch.temporal > 0 {
        debug!("Dropped {} DATE/TIME entities", batch.temporal);
    }
    if batch.duplicates > 0 {
        debug!("Collapsed {} duplicate entities", batch.duplicates);
    }

    for entity in &mut batch.entities {
        entity.id = options.id_strategy.entity_id(&entity.name, &entity.entity_type);
    }
    batch
}

fn record_to_entity(mut record: Map<String, Value>) -> Option<Entity> {
    let name = string_field(&record, &["name"])?;
    let entity_type = string_field(&record, &["type"]).unwrap_or_else(|| UNKNOWN_TYPE.to_string());
    let description = string_field(&record, &["description"]);
    let metadata = match record.remove("metadata") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let attributes: Map<String, Value> = record
        .into_iter()
        .filter(|(key, value)| !value.is_null() && !ENTITY_CORE_FIELDS.contains(&key.as_str()))
        .collect();

    let mut entity = Entity::new(String::new(), name, entity_type);
    entity.description = description;
    entity.metadata = metadata;
    entity.attributes = attributes;
    Some(entity)
}

/// Whether `challenger` should replace `current`. Richer entries win; ties
/// are broken on content so the outcome does not depend on input order.
fn prefer(challenger: &Entity, current: &Entity) -> bool {
    let rank = |e: &Entity| {
        (
            e.richness(),
            e.description.as_deref().map(str::len).unwrap_or(0),
        )
    };
    match rank(challenger).cmp(&rank(current)) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            let fingerprint = |e: &Entity| serde_json::to_string(&e.all_properties()).unwrap_or_default();
            fingerprint(challenger) > fingerprint(current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::testing::ScriptedProvider;
    use crate::graph::IdStrategy;
    use crate::Error;

    fn extractor(provider: Arc<ScriptedProvider>) -> EntityExtractor {
        EntityExtractor::new(provider, ExtractionOptions::default())
    }

    const STAGE_ONE: &str = r#"```json
[
  {"name": "Uber", "description": "Ride-hailing company", "type": "ORG"},
  {"name": "Rider", "description": "A person using the app"},
  {"name": "January 1, 2020", "description": "Effective date"},
  {"name": "uber", "description": ""}
]
```"#;

    const STAGE_TWO: &str = r#"{"entities": [
  {"id": "c1", "name": "Uber", "type": "organization"},
  {"id": "c2", "name": "Rider", "type": "ROLE"},
  {"id": "c3", "name": "January 1, 2020", "type": "DATE"},
  {"id": "c4", "name": "uber", "type": "ORGANIZATION"}
]}"#;

    #[tokio::test]
    async fn two_stages_produce_typed_deduplicated_entities() {
        let provider = Arc::new(ScriptedProvider::new([STAGE_ONE, STAGE_TWO]));
        let entities = extractor(provider.clone())
            .extract("Uber terms for Riders, effective January 1, 2020.")
            .await
            .unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "Uber");
        assert_eq!(entities[0].entity_type, "ORGANIZATION");
        assert_eq!(entities[0].description.as_deref(), Some("Ride-hailing company"));
        assert_eq!(entities[1].entity_type, "ROLE");
        assert!(entities.iter().all(|e| !e.is_temporal()));
        assert_ne!(entities[0].id, entities[1].id);
        assert!(!entities[0].id.starts_with('c'));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn stage_one_prompt_carries_no_types_to_stage_two() {
        let provider = Arc::new(ScriptedProvider::new([STAGE_ONE, STAGE_TWO]));
        extractor(provider.clone()).extract("text").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].prompt.contains("text"));
        assert!(!requests[1].prompt.contains("\"ORG\""));
        assert!(requests[1].prompt.contains("\"c1\""));
    }

    #[tokio::test]
    async fn empty_text_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        let entities = extractor(provider.clone()).extract("   \n").await.unwrap();
        assert!(entities.is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn unparseable_answer_is_retried_then_fatal() {
        let provider = Arc::new(ScriptedProvider::new(["not json", "still not json"]));
        let err = extractor(provider.clone()).extract("Uber").await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn second_attempt_may_recover() {
        let provider = Arc::new(ScriptedProvider::new([
            "sorry",
            r#"[{"name": "Uber"}]"#,
            r#"[{"id": "c1", "type": "ORGANIZATION"}]"#,
        ]));
        let entities = extractor(provider).extract("Uber").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "ORGANIZATION");
    }

    #[tokio::test]
    async fn provider_failure_aborts_extraction() {
        let provider = Arc::new(ScriptedProvider::new([r#"[{"name": "Uber"}]"#]));
        provider.push_error(Error::Transient("connection reset".into()));
        let err = extractor(provider).extract("Uber").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn uncategorised_entities_get_placeholder_type() {
        let provider = Arc::new(ScriptedProvider::new([
            r#"[{"name": "Uber"}, {"name": "Lyft"}]"#,
            r#"[{"name": "Uber", "type": "ORGANIZATION"}]"#,
        ]));
        let entities = extractor(provider).extract("Uber and Lyft").await.unwrap();
        assert_eq!(entities[0].entity_type, "ORGANIZATION");
        assert_eq!(entities[1].entity_type, UNKNOWN_TYPE);
    }

    #[tokio::test]
    async fn open_fields_survive_as_attributes() {
        let provider = Arc::new(ScriptedProvider::new([
            r#"[{"name": "John Doe", "email": "john@example.com", "source_chunk_ids": ["chunk_0"], "metadata": {"page": 2}}]"#,
            r#"[{"id": "c1", "type": "PERSON"}]"#,
        ]));
        let entities = extractor(provider).extract("John Doe").await.unwrap();
        let john = &entities[0];
        assert_eq!(john.attribute("email"), Some(&Value::from("john@example.com")));
        assert_eq!(john.metadata.get("page"), Some(&Value::from(2)));
        assert!(john.attribute("source_chunk_ids").is_some());
    }

    #[test]
    fn dedup_is_order_independent() {
        let a: Map<String, Value> = serde_json::from_str(
            r#"{"name": "Uber", "type": "ORGANIZATION", "description": "Company"}"#,
        )
        .unwrap();
        let b: Map<String, Value> = serde_json::from_str(
            r#"{"name": "UBER", "type": "ORGANIZATION", "description": "Firm.."}"#,
        )
        .unwrap();
        let options = ExtractionOptions::default().with_id_strategy(IdStrategy::Content);

        let forward = finalize(vec![a.clone(), b.clone()], &options).entities;
        let backward = finalize(vec![b, a], &options).entities;
        assert_eq!(forward.len(), 1);
        assert_eq!(forward, backward);
    }

    #[test]
    fn richer_duplicate_wins() {
        let plain: Map<String, Value> =
            serde_json::from_str(r#"{"name": "Uber", "type": "ORGANIZATION"}"#).unwrap();
        let rich: Map<String, Value> = serde_json::from_str(
            r#"{"name": "Uber", "type": "ORGANIZATION", "description": "Ride-hailing", "hq": "SF"}"#,
        )
        .unwrap();
        let batch = finalize(vec![plain, rich], &ExtractionOptions::default());
        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.entities[0].attribute("hq"), Some(&Value::from("SF")));
    }

    #[test]
    fn unnamed_records_are_counted() {
        let records: Vec<Map<String, Value>> = serde_json::from_str(
            r#"[{"name": "Uber", "type": "ORGANIZATION"},
                {"name": "  ", "type": "ROLE"},
                {"description": "no name at all"},
                {"name": "2020", "type": "DATE"}]"#,
        )
        .unwrap();
        let batch = finalize(records, &ExtractionOptions::default());

        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.unnamed, 2);
        assert_eq!(batch.temporal, 1);
    }
}
