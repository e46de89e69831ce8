use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Field name -> field descriptor (type hint, description, ...).
pub type FieldMapping = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeTag {
    Object,
    Array,
}

impl ShapeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeTag::Object => "object",
            ShapeTag::Array => "array",
        }
    }
}

impl fmt::Display for ShapeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema format error: {0}")]
    Format(String),
}

/// A schema classified once at load time. Downstream code matches on
/// `shape` and never looks at the raw schema document again.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSchema {
    pub fields: FieldMapping,
    pub shape: ShapeTag,
}

impl LoadedSchema {
    /// Classify a parsed schema document.
    ///
    /// `items.properties` marks a list of records; a top-level `properties`
    /// mapping marks a single record. The array form wins when both exist.
    pub fn from_value(schema: &Value) -> Result<Self, SchemaError> {
        let Some(root) = schema.as_object() else {
            return Err(SchemaError::Format(
                "schema root must be a JSON object".to_string(),
            ));
        };

        if let Some(fields) = root
            .get("items")
            .and_then(|items| items.get("properties"))
            .and_then(usable_mapping)
        {
            return Ok(Self {
                fields: fields.clone(),
                shape: ShapeTag::Array,
            });
        }

        if let Some(fields) = root.get("properties").and_then(usable_mapping) {
            return Ok(Self {
                fields: fields.clone(),
                shape: ShapeTag::Object,
            });
        }

        Err(SchemaError::Format(
            "no field mapping found under `properties` or `items.properties`".to_string(),
        ))
    }

    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(source)?;
        Self::from_value(&value)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let source = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&source)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

fn usable_mapping(value: &Value) -> Option<&FieldMapping> {
    value.as_object().filter(|fields| !fields.is_empty())
}

/// Label used for persisted rows when the caller gives none: the file name.
pub fn default_schema_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "planType": {"type": "string", "description": "HMO, PPO, ..."}
            }
        });

        let loaded = LoadedSchema::from_value(&schema).unwrap();
        assert_eq!(loaded.shape, ShapeTag::Object);
        assert_eq!(&Value::Object(loaded.fields), &schema["properties"]);
    }

    #[test]
    fn test_array_schema_uses_nested_mapping() {
        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {"claimId": {"type": "string"}}
            }
        });

        let loaded = LoadedSchema::from_value(&schema).unwrap();
        assert_eq!(loaded.shape, ShapeTag::Array);
        assert_eq!(loaded.field_names().collect::<Vec<_>>(), vec!["claimId"]);
    }

    #[test]
    fn test_array_wins_over_top_level_properties() {
        let schema = json!({
            "properties": {"ignored": {"type": "string"}},
            "items": {"properties": {"claimId": {"type": "string"}}}
        });

        let loaded = LoadedSchema::from_value(&schema).unwrap();
        assert_eq!(loaded.shape, ShapeTag::Array);
    }

    #[test]
    fn test_items_without_properties_falls_back_to_object() {
        let schema = json!({
            "items": {"type": "string"},
            "properties": {"memberId": {"type": "string"}}
        });

        let loaded = LoadedSchema::from_value(&schema).unwrap();
        assert_eq!(loaded.shape, ShapeTag::Object);
    }

    #[test]
    fn test_unrecognized_schema() {
        for schema in [
            json!({"type": "object"}),
            json!({"properties": {}}),
            json!({"properties": ["name"]}),
            json!(["name", "planType"]),
        ] {
            let err = LoadedSchema::from_value(&schema).unwrap_err();
            assert!(matches!(err, SchemaError::Format(_)), "{schema}");
        }
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            LoadedSchema::parse("{not json"),
            Err(SchemaError::Json(_))
        ));
    }

    #[test]
    fn test_default_schema_name() {
        assert_eq!(
            default_schema_name(Path::new("schemas/claims.json")),
            "claims.json"
        );
    }
}
