//! Field values and resolved entity instances.

use std::{convert::Infallible, sync::Arc};

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

use crate::{
    matchstring::MatchString,
    schema::{EntityClass, EntityClassId},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("field '{field}' of {class} entity was not loaded")]
    FieldNotLoaded { class: String, field: String },

    #[error("invalid packed id '{id}': {reason}")]
    InvalidPackedId { id: String, reason: String },

    #[error("invalid match string '{text}': {reason}")]
    InvalidMatchString { text: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coords {
    pub lat: f64,
    pub long: f64,
}

/// A resolved non-entity value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Coords(Coords),
    Match(MatchString),
    List(Vec<Scalar>),
    Object(IndexMap<String, Scalar>),
}

impl Scalar {
    /// Converts raw response JSON without interpretation.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Bool(*flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Self::Int(int),
                None => Self::Decimal(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Self::String(text.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Object(map.iter().map(|(key, item)| (key.clone(), Self::from_json(item))).collect()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(int) => Some(*int),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(text: &str) -> Self {
        Self::String(text.to_string())
    }
}

impl From<String> for Scalar {
    fn from(text: String) -> Self {
        Self::String(text)
    }
}

/// Value of one field, generic over how referenced entities are represented.
///
/// The reactor stores arena handles, the value cache stores ids and callers receive
/// owned [`Entity`] trees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue<E = Entity> {
    /// A variant field the response did not carry.
    Missing,
    Scalar(Scalar),
    Entity(E),
    OptionalEntity(Option<E>),
    EntityList(Vec<E>),
    EntityMap(IndexMap<String, E>),
}

impl<E> FieldValue<E> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Scalar::as_str)
    }

    /// The single referenced entity of an `Entity` or present `OptionalEntity` value.
    pub fn as_entity(&self) -> Option<&E> {
        match self {
            Self::Entity(entity) | Self::OptionalEntity(Some(entity)) => Some(entity),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[E]> {
        match self {
            Self::EntityList(entities) => Some(entities),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, E>> {
        match self {
            Self::EntityMap(entities) => Some(entities),
            _ => None,
        }
    }

    /// All referenced entities, in value order.
    pub fn entities(&self) -> Vec<&E> {
        match self {
            Self::Missing | Self::Scalar(_) | Self::OptionalEntity(None) => Vec::new(),
            Self::Entity(entity) | Self::OptionalEntity(Some(entity)) => vec![entity],
            Self::EntityList(entities) => entities.iter().collect(),
            Self::EntityMap(entities) => entities.values().collect(),
        }
    }

    /// Maps every referenced entity, keeping the value's shape.
    pub fn try_map_entities<T, Err, F>(&self, mut f: F) -> Result<FieldValue<T>, Err>
    where
        F: FnMut(&E) -> Result<T, Err>,
    {
        Ok(match self {
            Self::Missing => FieldValue::Missing,
            Self::Scalar(scalar) => FieldValue::Scalar(scalar.clone()),
            Self::Entity(entity) => FieldValue::Entity(f(entity)?),
            Self::OptionalEntity(entity) => FieldValue::OptionalEntity(entity.as_ref().map(&mut f).transpose()?),
            Self::EntityList(entities) => FieldValue::EntityList(entities.iter().map(&mut f).collect::<Result<_, _>>()?),
            Self::EntityMap(entities) => FieldValue::EntityMap(
                entities
                    .iter()
                    .map(|(key, entity)| Ok((key.clone(), f(entity)?)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    pub fn map_entities<T, F>(&self, mut f: F) -> FieldValue<T>
    where
        F: FnMut(&E) -> T,
    {
        match self.try_map_entities(|entity| Ok::<_, Infallible>(f(entity))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<E> From<Scalar> for FieldValue<E> {
    fn from(scalar: Scalar) -> Self {
        Self::Scalar(scalar)
    }
}

/// An entity instance with the fields resolved so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    class: EntityClassId,
    class_name: Arc<str>,
    id: Option<String>,
    fields: IndexMap<String, FieldValue>,
}

impl Entity {
    pub fn new(class: &EntityClass, id: Option<String>) -> Self {
        Self {
            class: class.id,
            class_name: Arc::from(class.name.as_str()),
            id,
            fields: IndexMap::new(),
        }
    }

    pub fn class(&self) -> EntityClassId {
        self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// False once the entity was proven absent remotely.
    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&FieldValue, ValueError> {
        self.fields.get(name).ok_or_else(|| ValueError::FieldNotLoaded {
            class: self.class_name.to_string(),
            field: name.to_string(),
        })
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn loaded_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl Serialize for Entity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let present = self.fields.iter().filter(|(_, value)| !value.is_missing());
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("class", &*self.class_name)?;
        map.serialize_entry("id", &self.id)?;
        for (name, value) in present {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::{DataType, EntityClassDecl, FieldDecl, Schema};

    fn user_class() -> Schema {
        Schema::builder()
            .class(
                EntityClassDecl::new("User")
                    .field(FieldDecl::scalar("first_name", DataType::String).default())
                    .field(FieldDecl::scalar("email", DataType::optional(DataType::Email)).variant()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn loaded_null_differs_from_unloaded() {
        let schema = user_class();
        let user = Entity::new(schema.class_by_name("User").unwrap(), Some("1".into())).with_field("email", Scalar::Null.into());
        assert!(user.is_loaded("email"));
        assert_eq!(user.get("email").unwrap(), &FieldValue::Scalar(Scalar::Null));
        assert!(!user.is_loaded("first_name"));
        assert_eq!(
            user.get("first_name").unwrap_err(),
            ValueError::FieldNotLoaded {
                class: "User".into(),
                field: "first_name".into()
            }
        );
    }

    #[test]
    fn serializes_without_missing_fields() {
        let schema = user_class();
        let user = Entity::new(schema.class_by_name("User").unwrap(), Some("7".into()))
            .with_field("first_name", Scalar::from("Ada").into())
            .with_field("email", FieldValue::Missing);
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({"class": "User", "id": "7", "first_name": "Ada"})
        );
    }

    #[test]
    fn map_entities_keeps_shape() {
        let value: FieldValue<u32> = FieldValue::EntityMap(IndexMap::from([("a".to_string(), 1), ("b".to_string(), 2)]));
        let mapped = value.map_entities(|n| n.to_string());
        assert_eq!(mapped.as_map().unwrap()["b"], "2");

        let optional: FieldValue<u32> = FieldValue::OptionalEntity(None);
        assert_eq!(optional.map_entities(|n| *n), FieldValue::OptionalEntity(None));
    }

    #[test]
    fn scalar_from_json() {
        assert_eq!(Scalar::from_json(&json!(3)), Scalar::Int(3));
        assert_eq!(Scalar::from_json(&json!(2.5)), Scalar::Decimal(2.5));
        assert_eq!(
            Scalar::from_json(&json!({"pl": "a", "en": null})),
            Scalar::Object(IndexMap::from([("pl".to_string(), Scalar::from("a")), ("en".to_string(), Scalar::Null)]))
        );
    }
}
