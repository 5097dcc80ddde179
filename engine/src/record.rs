//! Entity records: one domain object (a member, a tithe entry, an event) with
//! a unique identifier and a flat map of named fields.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Named field values of a record, without the identifier.
pub type Fields = serde_json::Map<String, Value>;

/// Name of the identifier key in the serialized form of a record.
pub const ID_FIELD: &str = "id";

/// A record of some entity type.
///
/// Serializes as a flat object: `{"id": "...", "first_name": "...", ...}`.
/// The field map never carries its own `id` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Unique identifier (client-generated for records created locally)
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    /// Everything except the identifier
    #[serde(flatten)]
    pub fields: Fields,
}

impl EntityRecord {
    /// Create a record, dropping any `id` key from `fields`.
    pub fn new(id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields: strip_id(fields),
        }
    }

    /// Build a record from a JSON object that carries its own `id`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidRecord("record must be a JSON object".into()));
        };
        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(Error::InvalidRecord("record id must be a string".into())),
            None => return Err(Error::InvalidRecord("record has no id".into())),
        };
        Ok(Self { id, fields })
    }

    /// Flat JSON object including the `id` key.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(object)
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Merge `patch` into the fields. The identifier is never changed here.
    pub fn apply_fields(&mut self, patch: &Fields) {
        for (name, value) in patch {
            if name != ID_FIELD {
                self.fields.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Remove the identifier key from a field map.
pub fn strip_id(mut fields: Fields) -> Fields {
    fields.remove(ID_FIELD);
    fields
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<RecordId, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "record id must be a string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_strips_id_from_fields() {
        let record = EntityRecord::new(
            "m-1",
            fields(json!({"id": "other", "first_name": "Grace"})),
        );

        assert_eq!(record.id, "m-1");
        assert!(record.get("id").is_none());
        assert_eq!(record.get("first_name"), Some(&json!("Grace")));
    }

    #[test]
    fn serializes_flat() {
        let record = EntityRecord::new("m-1", fields(json!({"first_name": "Grace"})));
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value, json!({"id": "m-1", "first_name": "Grace"}));
        assert_eq!(record.to_value(), value);
    }

    #[test]
    fn deserializes_numeric_id() {
        let record: EntityRecord =
            serde_json::from_value(json!({"id": 42, "first_name": "Grace"})).unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(record.fields.len(), 1);
    }

    #[test]
    fn from_value_requires_object_with_id() {
        assert!(EntityRecord::from_value(json!([1, 2])).is_err());
        assert!(EntityRecord::from_value(json!({"first_name": "Grace"})).is_err());
        assert!(EntityRecord::from_value(json!({"id": true})).is_err());

        let record = EntityRecord::from_value(json!({"id": "m-9", "phone": null})).unwrap();
        assert_eq!(record.id, "m-9");
        assert_eq!(record.get("phone"), Some(&Value::Null));
    }

    #[test]
    fn apply_fields_merges_and_keeps_id() {
        let mut record = EntityRecord::new(
            "m-1",
            fields(json!({"first_name": "Grace", "status": "visitor"})),
        );

        record.apply_fields(&fields(json!({"id": "hijack", "status": "member"})));

        assert_eq!(record.id, "m-1");
        assert_eq!(record.get("first_name"), Some(&json!("Grace")));
        assert_eq!(record.get("status"), Some(&json!("member")));
    }
}
