//! Entity schemas and field validation.
//!
//! A schema lists the typed fields of an entity type. Inserts must carry
//! every required field; updates only have to type-check the fields they
//! touch. Entity types without a declared schema are accepted as-is.

use crate::{error::Result, EntityType, Error, Fields, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Calendar date as `YYYY-MM-DD`
    Date,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Date => write!(f, "Date"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(Value::String(s)) if self.required && s.trim().is_empty() => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Date => value.as_str().is_some_and(is_iso_date),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn is_iso_date(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    let [year, month, day] = parts.as_slice() else {
        return false;
    };
    let digits = |p: &str, len: usize| p.len() == len && p.bytes().all(|b| b.is_ascii_digit());
    if !(digits(year, 4) && digits(month, 2) && digits(day, 2)) {
        return false;
    }
    matches!(month.parse::<u8>(), Ok(1..=12)) && matches!(day.parse::<u8>(), Ok(1..=31))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub name: EntityType,
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    pub fn new(name: impl Into<EntityType>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Validate the full field set of a new record.
    pub fn validate_fields(&self, fields: &Fields) -> Result<()> {
        for field in &self.fields {
            field.validate(fields.get(&field.name))?;
        }
        Ok(())
    }

    /// Validate only the fields present in `patch`.
    pub fn validate_patch(&self, patch: &Fields) -> Result<()> {
        for field in &self.fields {
            if let Some(value) = patch.get(&field.name) {
                field.validate(Some(value))?;
            }
        }
        Ok(())
    }
}

/// Schemas of all declared entity types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub entities: HashMap<EntityType, EntitySchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity type to the schema.
    pub fn add_entity(&mut self, entity: EntitySchema) -> &mut Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Builder-style method to add an entity type.
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.add_entity(entity);
        self
    }

    pub fn get_entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    /// Validate an operation against the schema of its entity type.
    pub fn validate_operation(&self, entity_type: &str, op: &Operation) -> Result<()> {
        let Some(entity) = self.entities.get(entity_type) else {
            return Ok(());
        };

        match op {
            Operation::Insert { record } => entity.validate_fields(&record.fields),
            Operation::Update { fields, .. } => entity.validate_patch(fields),
            Operation::Delete { .. } => Ok(()),
        }
    }

    /// The entity types of the church administration front end.
    pub fn parish() -> Self {
        use FieldType::*;

        Schema::new()
            .with_entity(EntitySchema::new(
                "members",
                vec![
                    FieldDef::required("first_name", String),
                    FieldDef::required("last_name", String),
                    FieldDef::optional("email", String),
                    FieldDef::optional("phone", String),
                    FieldDef::optional("address", String),
                    FieldDef::optional("birth_date", Date),
                    FieldDef::optional("membership_date", Date),
                    FieldDef::optional("status", String),
                ],
            ))
            .with_entity(EntitySchema::new(
                "tithes",
                vec![
                    FieldDef::optional("member_id", String),
                    FieldDef::required("amount", Float),
                    FieldDef::required("date", Date),
                    FieldDef::optional("category", String),
                    FieldDef::optional("notes", String),
                ],
            ))
            .with_entity(EntitySchema::new(
                "attendance",
                vec![
                    FieldDef::required("date", Date),
                    FieldDef::required("service", String),
                    FieldDef::optional("count", Int),
                    FieldDef::optional("member_id", String),
                    FieldDef::optional("present", Bool),
                ],
            ))
            .with_entity(EntitySchema::new(
                "events",
                vec![
                    FieldDef::required("title", String),
                    FieldDef::required("date", Date),
                    FieldDef::optional("time", String),
                    FieldDef::optional("location", String),
                    FieldDef::optional("description", String),
                ],
            ))
            .with_entity(EntitySchema::new(
                "announcements",
                vec![
                    FieldDef::required("title", String),
                    FieldDef::required("content", String),
                    FieldDef::optional("priority", String),
                    FieldDef::optional("expires_on", Date),
                ],
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityRecord;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn insert(value: Value) -> Operation {
        Operation::insert(EntityRecord::new("r-1", fields(value)))
    }

    #[test]
    fn validate_valid_member() {
        let schema = Schema::parish();
        let op = insert(json!({
            "first_name": "Grace",
            "last_name": "Okafor",
            "birth_date": "1984-03-09",
        }));
        assert!(schema.validate_operation("members", &op).is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = Schema::parish();
        let op = insert(json!({"first_name": "Grace"}));

        let result = schema.validate_operation("members", &op);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "last_name"));
    }

    #[test]
    fn blank_required_string_is_missing() {
        let schema = Schema::parish();
        let op = insert(json!({"first_name": "Grace", "last_name": "   "}));

        assert!(matches!(
            schema.validate_operation("members", &op),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = Schema::parish();
        let op = insert(json!({"amount": "fifty", "date": "2024-01-07"}));

        let result = schema.validate_operation("tithes", &op);
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "amount"));
    }

    #[test]
    fn validate_dates() {
        assert!(is_iso_date("2024-12-31"));
        assert!(!is_iso_date("2024-13-01"));
        assert!(!is_iso_date("24-01-01"));
        assert!(!is_iso_date("2024/01/01"));
        assert!(!is_iso_date("2024-01-01T10:00:00Z"));
    }

    #[test]
    fn update_only_checks_present_fields() {
        let schema = Schema::parish();

        let ok = Operation::update("m-1", fields(json!({"phone": "555-0100"})));
        assert!(schema.validate_operation("members", &ok).is_ok());

        let bad = Operation::update("m-1", fields(json!({"first_name": null})));
        assert!(schema.validate_operation("members", &bad).is_err());

        let delete = Operation::delete("m-1");
        assert!(schema.validate_operation("members", &delete).is_ok());
    }

    #[test]
    fn undeclared_entity_is_accepted() {
        let schema = Schema::parish();
        let op = insert(json!({"anything": [1, 2, 3]}));
        assert!(schema.validate_operation("prayer_requests", &op).is_ok());
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Date.to_string(), "Date");
        assert_eq!(FieldType::Json.to_string(), "Json");
    }

    #[test]
    fn json_field_accepts_any() {
        let entity = EntitySchema::new("logs", vec![FieldDef::required("data", FieldType::Json)]);

        assert!(entity.validate_fields(&fields(json!({"data": "string"}))).is_ok());
        assert!(entity.validate_fields(&fields(json!({"data": [1, 2]}))).is_ok());
        assert!(entity
            .validate_fields(&fields(json!({"data": {"nested": true}})))
            .is_ok());
    }
}
