use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{merge_open_fields, non_null, null_as_empty};

/// Relation type used when the model did not name one.
pub const DEFAULT_RELATION_TYPE: &str = "RELATED_TO";

/// Field names owned by [`Relation`] itself.
pub const RELATION_CORE_FIELDS: &[&str] = &[
    "id",
    "source_entity_id",
    "target_entity_id",
    "relation_type",
    "description",
    "confidence",
    "metadata",
];

/// Directed, typed edge between two entities of the same graph.
///
/// Temporal and contextual facts (start_date, role, amount, ...) are open
/// attributes of the relation instead of separate entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    #[serde(default = "default_relation_type")]
    pub relation_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Relation {
    pub fn new(
        id: impl Into<String>,
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relation_type: relation_type.into(),
            description: None,
            confidence: None,
            metadata: Map::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Looks up an open attribute, falling back to metadata.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .get(key)
            .or_else(|| self.metadata.get(key))
            .filter(|v| !v.is_null())
    }

    /// Names of the non-null open attributes (metadata included).
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .chain(self.metadata.iter())
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
    }

    pub fn touches(&self, entity_id: &str) -> bool {
        self.source_entity_id == entity_id || self.target_entity_id == entity_id
    }

    /// Every property as one flat map, nulls skipped.
    pub fn all_properties(&self) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        props.insert("id".to_string(), Value::String(self.id.clone()));
        props.insert(
            "source_entity_id".to_string(),
            Value::String(self.source_entity_id.clone()),
        );
        props.insert(
            "target_entity_id".to_string(),
            Value::String(self.target_entity_id.clone()),
        );
        props.insert(
            "relation_type".to_string(),
            Value::String(self.relation_type.clone()),
        );
        if let Some(description) = &self.description {
            props.insert("description".to_string(), Value::String(description.clone()));
        }
        if let Some(confidence) = self.confidence.and_then(serde_json::Number::from_f64) {
            props.insert("confidence".to_string(), Value::Number(confidence));
        }
        merge_open_fields(&mut props, &self.metadata, RELATION_CORE_FIELDS);
        merge_open_fields(&mut props, &self.attributes, RELATION_CORE_FIELDS);
        props
    }

    pub fn richness(&self) -> usize {
        let description = self
            .description
            .as_deref()
            .map(|d| usize::from(!d.trim().is_empty()))
            .unwrap_or(0);
        description
            + usize::from(self.confidence.is_some())
            + non_null(&self.metadata)
            + non_null(&self.attributes)
    }
}

fn default_relation_type() -> String {
    DEFAULT_RELATION_TYPE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temporal_attributes_stay_on_the_relation() {
        let raw = json!({
            "id": "r1",
            "source_entity_id": "e1",
            "target_entity_id": "e2",
            "relation_type": "WORKS_FOR",
            "confidence": 0.95,
            "start_date": "2020-01-01",
            "role": "CEO"
        });

        let relation: Relation = serde_json::from_value(raw).unwrap();
        assert_eq!(relation.attribute("start_date"), Some(&json!("2020-01-01")));
        assert_eq!(relation.confidence, Some(0.95));

        let mut names: Vec<&str> = relation.attribute_names().collect();
        names.sort();
        assert_eq!(names, vec!["role", "start_date"]);
    }

    #[test]
    fn missing_relation_type_defaults() {
        let relation: Relation = serde_json::from_value(json!({
            "id": "r1",
            "source_entity_id": "a",
            "target_entity_id": "b"
        }))
        .unwrap();
        assert_eq!(relation.relation_type, DEFAULT_RELATION_TYPE);
    }

    #[test]
    fn touches_either_endpoint() {
        let relation = Relation::new("r1", "a", "b", "OWNS");
        assert!(relation.touches("a"));
        assert!(relation.touches("b"));
        assert!(!relation.touches("c"));
    }

    #[test]
    fn all_properties_includes_confidence_and_metadata() {
        let mut relation = Relation::new("r1", "a", "b", "OWNS").with_confidence(0.5);
        relation.metadata.insert("amount".into(), json!(1200));

        let props = relation.all_properties();
        assert_eq!(props.get("confidence"), Some(&json!(0.5)));
        assert_eq!(props.get("amount"), Some(&json!(1200)));
    }
}
