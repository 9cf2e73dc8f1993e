use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Placeholder type for entities the categorisation stage did not type.
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// Temporal types that never survive as entities; they belong on relations.
pub const TEMPORAL_TYPES: &[&str] = &["DATE", "TIME"];

/// Field names owned by [`Entity`] itself rather than its open attributes.
pub const ENTITY_CORE_FIELDS: &[&str] = &["id", "name", "type", "description", "metadata"];

/// Typed node discovered in a document.
///
/// The core fields are fixed; anything else the model reported (email,
/// role, founded_date, ...) lands in `attributes` and is written back out
/// flattened next to the core fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "unknown_type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
            description: None,
            metadata: Map::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// True when the type is one of the temporal types.
    pub fn is_temporal(&self) -> bool {
        TEMPORAL_TYPES.contains(&self.entity_type.as_str())
    }

    /// Looks up an open attribute, falling back to metadata.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .get(key)
            .or_else(|| self.metadata.get(key))
            .filter(|v| !v.is_null())
    }

    /// Every property of the entity as one flat map: core fields, then
    /// metadata, then open attributes. Nulls are skipped.
    pub fn all_properties(&self) -> BTreeMap<String, Value> {
        let mut props = BTreeMap::new();
        props.insert("id".to_string(), Value::String(self.id.clone()));
        props.insert("name".to_string(), Value::String(self.name.clone()));
        props.insert("type".to_string(), Value::String(self.entity_type.clone()));
        if let Some(description) = &self.description {
            props.insert("description".to_string(), Value::String(description.clone()));
        }
        merge_open_fields(&mut props, &self.metadata, ENTITY_CORE_FIELDS);
        merge_open_fields(&mut props, &self.attributes, ENTITY_CORE_FIELDS);
        props
    }

    /// Count of non-empty descriptive fields, used to pick between duplicates.
    pub fn richness(&self) -> usize {
        let description = self
            .description
            .as_deref()
            .map(|d| usize::from(!d.trim().is_empty()))
            .unwrap_or(0);
        description + non_null(&self.metadata) + non_null(&self.attributes)
    }
}

fn unknown_type() -> String {
    UNKNOWN_TYPE.to_string()
}

pub(crate) fn non_null(map: &Map<String, Value>) -> usize {
    map.values().filter(|v| !v.is_null()).count()
}

pub(crate) fn merge_open_fields(
    props: &mut BTreeMap<String, Value>,
    fields: &Map<String, Value>,
    reserved: &[&str],
) {
    for (key, value) in fields {
        if value.is_null() || reserved.contains(&key.as_str()) {
            continue;
        }
        props.insert(key.clone(), value.clone());
    }
}

/// Accepts `null` where a map is expected (older graph files write it).
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_round_trip_through_flatten() {
        let raw = json!({
            "id": "e1",
            "name": "John Doe",
            "type": "PERSON",
            "description": "CEO of TechCorp",
            "email": "john@example.com",
            "metadata": {"source_page": 3}
        });

        let entity: Entity = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entity.entity_type, "PERSON");
        assert_eq!(entity.attributes.get("email"), Some(&json!("john@example.com")));

        let back = serde_json::to_value(&entity).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn missing_type_defaults_to_unknown_and_null_metadata_is_empty() {
        let entity: Entity =
            serde_json::from_value(json!({"id": "e1", "name": "X", "metadata": null})).unwrap();
        assert_eq!(entity.entity_type, UNKNOWN_TYPE);
        assert!(entity.metadata.is_empty());
    }

    #[test]
    fn all_properties_merges_metadata_and_attributes() {
        let mut entity = Entity::new("e1", "Uber", "ORGANIZATION")
            .with_attribute("website", "uber.com")
            .with_attribute("ceo", Value::Null);
        entity.metadata.insert("industry".into(), json!("transport"));

        let props = entity.all_properties();
        assert_eq!(props.get("website"), Some(&json!("uber.com")));
        assert_eq!(props.get("industry"), Some(&json!("transport")));
        assert!(!props.contains_key("ceo"));
        assert!(!props.contains_key("description"));
    }

    #[test]
    fn temporal_detection() {
        assert!(Entity::new("d", "2020", "DATE").is_temporal());
        assert!(Entity::new("t", "noon", "TIME").is_temporal());
        assert!(!Entity::new("p", "Ann", "PERSON").is_temporal());
    }

    #[test]
    fn richness_counts_filled_fields() {
        let bare = Entity::new("e1", "Uber", "ORGANIZATION");
        let rich = bare
            .clone()
            .with_description("ride hailing")
            .with_attribute("website", "uber.com");
        assert_eq!(bare.richness(), 0);
        assert_eq!(rich.richness(), 2);
    }
}
