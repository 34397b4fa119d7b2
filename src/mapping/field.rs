use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::core::{OdmError, Result};

/// Scalar type tag of a mapped attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Bytes,
    GeoPoint,
    File,
    Any,
}

impl FieldType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Date => is_date(value),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Bytes => value.is_string() || has_type_tag(value, "Bytes"),
            Self::GeoPoint => has_type_tag(value, "GeoPoint"),
            Self::File => has_type_tag(value, "File"),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Object => "object",
            Self::Array => "array",
            Self::Bytes => "bytes",
            Self::GeoPoint => "geopoint",
            Self::File => "file",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

fn has_type_tag(value: &Value, tag: &str) -> bool {
    value.get("__type").and_then(Value::as_str) == Some(tag)
}

/// Dates travel either as `{"__type": "Date", "iso": ..}` or as RFC 3339 strings.
fn is_date(value: &Value) -> bool {
    let iso = if has_type_tag(value, "Date") {
        value.get("iso").and_then(Value::as_str)
    } else {
        value.as_str()
    };
    iso.is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok())
}

/// One scalar attribute of a mapped class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Key in the remote representation
    pub store_as: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            store_as: name.clone(),
            name,
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.store_as = key.into();
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(OdmError::DataIntegrity(format!(
                    "Field '{}' cannot be null",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.field_type.is_compatible(value) {
            return Err(OdmError::DataIntegrity(format!(
                "Field '{}' expects type {}, got {}",
                self.name, self.field_type, value
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let field = FieldDescriptor::new("title", FieldType::default());
        assert_eq!(field.field_type, FieldType::String);
        assert!(!field.nullable);
        assert_eq!(field.store_as, "title");
    }

    #[test]
    fn test_validate_null_policy() {
        let strict = FieldDescriptor::new("title", FieldType::String);
        assert!(matches!(strict.validate(&Value::Null), Err(OdmError::DataIntegrity(_))));
        assert!(strict.clone().nullable().validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_validate_types() {
        let count = FieldDescriptor::new("count", FieldType::Number);
        assert!(count.validate(&json!(3)).is_ok());
        assert!(count.validate(&json!("3")).is_err());

        let created = FieldDescriptor::new("createdAt", FieldType::Date);
        assert!(created.validate(&json!("2024-05-01T12:00:00Z")).is_ok());
        assert!(created
            .validate(&json!({"__type": "Date", "iso": "2024-05-01T12:00:00.000Z"}))
            .is_ok());
        assert!(created.validate(&json!("yesterday")).is_err());

        let location = FieldDescriptor::new("location", FieldType::GeoPoint);
        assert!(location
            .validate(&json!({"__type": "GeoPoint", "latitude": 1.0, "longitude": 2.0}))
            .is_ok());
        assert!(location.validate(&json!([1.0, 2.0])).is_err());
    }

    #[test]
    fn test_type_names_round_trip() {
        let parsed: FieldType = serde_json::from_value(json!("geopoint")).unwrap();
        assert_eq!(parsed, FieldType::GeoPoint);
        assert_eq!(parsed.to_string(), "geopoint");
    }
}
