//! Definition document parsing and structural validation.
//!
//! A definition file is parsed as TOML, converted to a JSON tree, and the
//! tree is checked against an embedded JSON Schema. Every violation is
//! collected before returning so authors see the full failure set at once.
//! The same JSON tree is what integrity digests are computed over.

use serde_json::{Map, Value};
use tracing::debug;

use compass_contracts::error::{CompassError, CompassResult};

/// JSON Schema every definition document must satisfy.
///
/// Length bounds: names, author, role and tone ≤ 100 characters,
/// descriptions ≤ 500, instructions ≤ 2000.
pub const DEFINITION_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "required": ["meta", "persona"],
  "properties": {
    "meta": {
      "type": "object",
      "required": ["id", "name"],
      "properties": {
        "id": { "type": "string" },
        "name": { "type": "string", "minLength": 1, "maxLength": 100 },
        "version": { "type": "string" },
        "author": { "type": "string", "maxLength": 100 },
        "description": { "type": "string", "maxLength": 500 },
        "tags": { "type": "array", "items": { "type": "string" } },
        "created": { "type": "string" }
      }
    },
    "persona": {
      "type": "object",
      "required": ["role", "tone", "instructions"],
      "properties": {
        "role": { "type": "string", "minLength": 1, "maxLength": 100 },
        "tone": { "type": "string", "minLength": 1, "maxLength": 100 },
        "instructions": { "type": "string", "minLength": 1, "maxLength": 2000 },
        "personality": { "type": "object" },
        "communication_style": { "type": "object" }
      }
    },
    "skills": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name"],
        "properties": {
          "name": { "type": "string", "minLength": 1, "maxLength": 100 },
          "description": { "type": "string", "maxLength": 500 },
          "enabled": { "type": "boolean" },
          "parameters": { "type": "object" }
        }
      }
    },
    "tools": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name", "type"],
        "properties": {
          "name": { "type": "string", "minLength": 1, "maxLength": 100 },
          "type": { "enum": ["api", "function", "protocol", "mcp", "custom"] },
          "endpoint": { "type": "string" },
          "parameters": { "type": "object" },
          "auth": { "type": "object" }
        }
      }
    },
    "memory": {
      "type": "object",
      "properties": {
        "kind": { "type": "string" },
        "capacity": { "type": "integer", "minimum": 1 },
        "retention": { "type": "string" }
      }
    },
    "security": {
      "type": "object",
      "properties": {
        "allowed_operations": { "type": "array", "items": { "type": "string" } },
        "restricted_domains": { "type": "array", "items": { "type": "string" } },
        "max_calls_per_minute": { "type": "integer", "minimum": 1 },
        "integrity": {
          "type": "object",
          "required": ["algorithm", "digest"],
          "properties": {
            "algorithm": { "enum": ["sha256", "sha512"] },
            "digest": { "type": "string", "pattern": "^[0-9a-f]+$" },
            "scope": { "enum": ["content", "full"] }
          }
        }
      }
    }
  }
}"#;

/// Compiled structural validator for definition documents.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    /// Compile the embedded definition schema.
    pub fn new() -> CompassResult<Self> {
        let schema: Value = serde_json::from_str(DEFINITION_SCHEMA).map_err(|e| {
            CompassError::Config { reason: format!("embedded definition schema is not JSON: {e}") }
        })?;
        let validator = jsonschema::validator_for(&schema).map_err(|e| CompassError::Config {
            reason: format!("embedded definition schema does not compile: {e}"),
        })?;
        Ok(Self { validator })
    }

    /// Validate `document`, returning every violation in one `Schema` error.
    pub fn validate(&self, document: &Value, origin: &str) -> CompassResult<()> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(document)
            .map(|error| format!("at '{}': {}", error.instance_path, error))
            .collect();

        if violations.is_empty() {
            return Ok(());
        }
        debug!(origin = %origin, count = violations.len(), "definition failed schema validation");
        Err(CompassError::Schema { origin: origin.to_string(), reason: violations.join("; ") })
    }
}

/// Parse TOML source text into the JSON tree used for validation and digests.
pub fn parse_document(source: &str, origin: &str) -> CompassResult<Value> {
    let table: toml::Table = source.parse().map_err(|e: toml::de::Error| CompassError::Schema {
        origin: origin.to_string(),
        reason: format!("not a valid TOML document: {}", e.message()),
    })?;
    Ok(table_to_json(&table))
}

pub(crate) fn table_to_json(table: &toml::Table) -> Value {
    Value::Object(
        table
            .iter()
            .map(|(k, v)| (k.clone(), toml_to_json(v)))
            .collect::<Map<String, Value>>(),
    )
}

/// Datetimes become their RFC 3339 text; non-finite floats become null.
fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
        }
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => table_to_json(table),
    }
}

/// Return true for an RFC 4122 UUID of version 1 through 5.
pub fn is_valid_agent_id(id: &str) -> bool {
    match uuid::Uuid::parse_str(id) {
        Ok(uuid) => {
            matches!(uuid.get_version_num(), 1..=5) && uuid.get_variant() == uuid::Variant::RFC4122
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[meta]
id = "6f1c1f0e-2d3b-4c5a-9e7f-0a1b2c3d4e5f"
name = "Zara"

[persona]
role = "research specialist"
tone = "precise"
instructions = "Verify every claim."
"#;

    #[test]
    fn minimal_document_passes() {
        let validator = SchemaValidator::new().unwrap();
        let doc = parse_document(MINIMAL, "zara.toml").unwrap();
        assert!(validator.validate(&doc, "zara.toml").is_ok());
    }

    #[test]
    fn all_violations_are_reported_together() {
        let validator = SchemaValidator::new().unwrap();
        let source = format!(
            "[meta]\nid = \"x\"\nname = \"{}\"\n\n[persona]\nrole = \"r\"\n",
            "n".repeat(101)
        );
        let doc = parse_document(&source, "bad.toml").unwrap();

        let err = validator.validate(&doc, "bad.toml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/meta/name"));
        assert!(msg.contains("tone"));
        assert!(msg.contains("instructions"));
    }

    #[test]
    fn unknown_tool_type_is_rejected() {
        let validator = SchemaValidator::new().unwrap();
        let source = format!("{MINIMAL}\n[[tools]]\nname = \"fax\"\ntype = \"telegraph\"\n");
        let doc = parse_document(&source, "t.toml").unwrap();
        assert!(validator.validate(&doc, "t.toml").is_err());
    }

    #[test]
    fn malformed_toml_is_a_schema_error() {
        let err = parse_document("[meta\nname = ", "broken.toml").unwrap_err();
        assert_eq!(err.code(), "schema_error");
    }

    #[test]
    fn datetimes_become_strings() {
        let doc = parse_document("[meta]\ncreated = 2024-03-01T10:00:00Z\n", "d.toml").unwrap();
        assert_eq!(doc["meta"]["created"], "2024-03-01T10:00:00Z");
    }

    #[test]
    fn agent_id_requires_rfc4122_version_one_to_five() {
        assert!(is_valid_agent_id("6f1c1f0e-2d3b-4c5a-9e7f-0a1b2c3d4e5f"));
        assert!(!is_valid_agent_id("not-a-uuid"));
        // version nibble 0
        assert!(!is_valid_agent_id("6f1c1f0e-2d3b-0c5a-9e7f-0a1b2c3d4e5f"));
        // variant nibble c (Microsoft)
        assert!(!is_valid_agent_id("6f1c1f0e-2d3b-4c5a-ce7f-0a1b2c3d4e5f"));
    }
}
