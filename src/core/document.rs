use serde_json::{Map, Value};

/// Raw document as exchanged with the storage adapter.
pub type Document = Map<String, Value>;

/// Remote object identifier.
pub type ObjectId = String;

/// Key holding the identifier of a stored document.
pub const OBJECT_ID: &str = "objectId";

const TYPE_KEY: &str = "__type";
const POINTER_TYPE: &str = "Pointer";
const CLASS_NAME_KEY: &str = "className";

/// A reference to one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub class_name: String,
    pub object_id: ObjectId,
}

impl Pointer {
    pub fn new(class_name: impl Into<String>, object_id: impl Into<ObjectId>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }

    /// Full pointer structure, optionally carrying a discriminator tag.
    pub fn to_value(&self, tag: Option<(&str, &str)>) -> Value {
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::String(POINTER_TYPE.to_string()));
        map.insert(CLASS_NAME_KEY.to_string(), Value::String(self.class_name.clone()));
        map.insert(OBJECT_ID.to_string(), Value::String(self.object_id.clone()));
        if let Some((field, value)) = tag {
            map.insert(field.to_string(), Value::String(value.to_string()));
        }
        Value::Object(map)
    }

    /// Stored form of the reference: a bare identifier when `simple`.
    pub fn to_stored(&self, simple: bool, tag: Option<(&str, &str)>) -> Value {
        if simple {
            Value::String(self.object_id.clone())
        } else {
            self.to_value(tag)
        }
    }

    /// Whether a stored reference points at this object; bare ids match on
    /// the identifier alone.
    pub fn is_stored_as(&self, stored: &Value) -> bool {
        if reference_id(stored) != Some(self.object_id.as_str()) {
            return false;
        }
        match stored.get(CLASS_NAME_KEY).and_then(Value::as_str) {
            Some(class_name) => class_name == self.class_name,
            None => true,
        }
    }
}

/// Identifier carried by a stored reference (bare string or pointer structure).
pub fn reference_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) => Some(id.as_str()),
        Value::Object(map) => map.get(OBJECT_ID).and_then(Value::as_str),
        _ => None,
    }
}

/// Identifier of a stored document.
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(OBJECT_ID).and_then(Value::as_str)
}

/// A missing key and an explicit `null` are treated alike.
pub fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}
