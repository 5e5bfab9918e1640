//! Pickers: how a field's value is requested from and read out of an API response.
//!
//! Each picker writes the keys it needs into the API `fields` selector and later turns
//! the matching part of the response into a [`FieldValue`]. Entity-valued pickers spawn
//! the referenced entities into the reactor together with whatever values the response
//! already carried for them.

use std::{borrow::Cow, collections::HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value;
use tal_types::{Coords, EntityClassId, Field, FieldKind, FieldValue, Scalar, Schema, Selector, SubSelector};

use super::id::{IdSpec, id_text};
use crate::{
    error::{EngineError, Result},
    lang::Lang,
    reactor::{EntityHandle, FieldValues, Reactor},
};

/// Shape of the value read by a [`NestedEntityPicker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedShape {
    /// One object, or null.
    Single,
    List,
    /// Object of objects; null members are skipped.
    Map,
    /// Ancestor path, root first; the field takes the last element, or the whole chain
    /// when the field is requested recursively.
    AncestorFromList,
}

/// Entity read from a nested object (or collection of objects) under one response key.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedEntityPicker {
    key: String,
    pickers: EntityPickers,
    shape: NestedShape,
    has_subfield_selector: bool,
    lifted_fields: Vec<(String, String)>,
    unique: bool,
}

impl NestedEntityPicker {
    fn new(key: impl Into<String>, pickers: EntityPickers, shape: NestedShape) -> Self {
        Self {
            key: key.into(),
            pickers,
            shape,
            has_subfield_selector: true,
            lifted_fields: Vec::new(),
            unique: false,
        }
    }

    /// The API does not accept a nested selector for this key.
    pub fn without_subfield_selector(mut self) -> Self {
        self.has_subfield_selector = false;
        self
    }

    /// Copies the parent's `field` into every nested object as `lifted`.
    pub fn lifting(mut self, field: impl Into<String>, lifted: impl Into<String>) -> Self {
        self.lifted_fields.push((field.into(), lifted.into()));
        self
    }

    /// Drops list items whose id was already seen.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub(crate) fn update_api_selector(&self, api: &mut Selector, sub: &Selector) {
        let mut nested = Selector::new();
        self.pickers.update_api_selector(&mut nested, sub, true);
        for (field, lifted) in &self.lifted_fields {
            if let Some(unlifted) = nested.remove(lifted) {
                merge_key(api, field, unlifted);
            }
        }
        if !self.has_subfield_selector {
            nested = Selector::new();
        }
        merge_key(api, &self.key, nested);
    }

    fn lift<'v>(&self, item: &'v Value, parent: &Value) -> Cow<'v, Value> {
        if self.lifted_fields.is_empty() {
            return Cow::Borrowed(item);
        }
        let mut item = item.clone();
        if let Value::Object(object) = &mut item {
            for (field, lifted) in &self.lifted_fields {
                if let Some(value) = parent.get(field) {
                    object.insert(lifted.clone(), value.clone());
                }
            }
        }
        Cow::Owned(item)
    }

    pub(crate) fn load(&self, reactor: &mut Reactor<'_>, path: &str, field: &Field, response: &Value, sub: &Selector) -> Result<FieldValue<EntityHandle>> {
        let Some(value) = response.get(&self.key) else {
            return missing_key(path, field, &self.key);
        };
        let class = referenced_class(path, field)?;

        match self.shape {
            NestedShape::Single => {
                if value.is_null() {
                    return Ok(single_entity(field, None));
                }
                let item = self.lift(value, response);
                let handle = self.pickers.load_entity(reactor, path, class, &item, sub)?;
                Ok(single_entity(field, handle))
            }
            NestedShape::Map => {
                let mut entities = IndexMap::new();
                for (key, item) in objects(path, &self.key, value)? {
                    if item.is_null() {
                        continue;
                    }
                    let item = self.lift(item, response);
                    if let Some(handle) = self.pickers.load_entity(reactor, path, class, &item, sub)? {
                        entities.insert(key.to_string(), handle);
                    }
                }
                Ok(FieldValue::EntityMap(entities))
            }
            NestedShape::List => Ok(FieldValue::EntityList(self.load_list(reactor, path, field, class, response, sub)?)),
            NestedShape::AncestorFromList => {
                let items = array(path, &self.key, value)?;
                if !sub.is_recursive(&field.name) {
                    let Some(last) = items.last() else {
                        return Ok(single_entity(field, None));
                    };
                    let item = self.lift(last, response);
                    let handle = self.pickers.load_entity(reactor, path, class, &item, sub)?;
                    return Ok(single_entity(field, handle));
                }

                let mut ancestor = None;
                for item in items {
                    let item = self.lift(item, response);
                    let Some(id) = self.pickers.load_id(path, &item)? else {
                        continue;
                    };
                    let mut values = self.pickers.fields.load_values(reactor, path, class, &item, sub)?;
                    values.insert(field.name.clone(), single_entity(field, ancestor));
                    ancestor = Some(reactor.spawn_entity(class, id, sub, Some(values), false));
                }
                Ok(single_entity(field, ancestor))
            }
        }
    }

    /// Loads list items; a recursively requested field descends into each item's own list.
    fn load_list(
        &self,
        reactor: &mut Reactor<'_>,
        path: &str,
        field: &Field,
        class: EntityClassId,
        response: &Value,
        sub: &Selector,
    ) -> Result<Vec<EntityHandle>> {
        let Some(value) = response.get(&self.key) else {
            return Ok(Vec::new());
        };
        let recursive = sub.is_recursive(&field.name);
        let mut seen = HashSet::new();
        let mut handles = Vec::new();
        for item in array(path, &self.key, value)? {
            let item = self.lift(item, response);
            let Some(id) = self.pickers.load_id(path, &item)? else {
                continue;
            };
            if self.unique && !seen.insert(id.clone()) {
                continue;
            }
            let mut values = self.pickers.fields.load_values(reactor, path, class, &item, sub)?;
            if recursive && item.get(&self.key).is_some() {
                let children = self.load_list(reactor, path, field, class, &item, sub)?;
                values.insert(field.name.clone(), FieldValue::EntityList(children));
            }
            handles.push(reactor.spawn_entity(class, id, sub, Some(values), false));
        }
        Ok(handles)
    }
}

/// Reads one field out of a response object.
#[derive(Debug, Clone, PartialEq)]
pub enum Picker {
    /// Raw JSON value.
    Simple(String),
    /// `{"pl": …, "en": …}` translated string for the session language.
    LangDict(String),
    /// Falsy values become null.
    Url(String),
    /// Web profile link, tagged with the session language.
    UsoswebUrl(String),
    Decimal(String),
    Date(String),
    DateTime(String),
    Coords(String),
    Mapping {
        key: String,
        pairs: Vec<(Value, Value)>,
        /// Unmapped values pass through instead of failing.
        open: bool,
    },
    /// Reference by id keys of the current object.
    EntityId(IdSpec),
    EntityIdList(String),
    EntityIdMap {
        key: String,
        /// The response maps ids to keys instead of keys to ids.
        flipped: bool,
    },
    /// Referenced entity whose keys live flat in the current object.
    InlineEntity(EntityPickers),
    /// Every member of the current response is one referenced entity.
    InlineEntityList(EntityPickers),
    Nested(NestedEntityPicker),
}

impl Picker {
    pub fn simple(key: impl Into<String>) -> Self {
        Self::Simple(key.into())
    }

    pub fn lang_dict(key: impl Into<String>) -> Self {
        Self::LangDict(key.into())
    }

    pub fn url(key: impl Into<String>) -> Self {
        Self::Url(key.into())
    }

    pub fn usosweb_url(key: impl Into<String>) -> Self {
        Self::UsoswebUrl(key.into())
    }

    pub fn decimal(key: impl Into<String>) -> Self {
        Self::Decimal(key.into())
    }

    pub fn date(key: impl Into<String>) -> Self {
        Self::Date(key.into())
    }

    pub fn date_time(key: impl Into<String>) -> Self {
        Self::DateTime(key.into())
    }

    pub fn coords(key: impl Into<String>) -> Self {
        Self::Coords(key.into())
    }

    pub fn mapping<I, K, V>(key: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::Mapping {
            key: key.into(),
            pairs: pairs.into_iter().map(|(from, to)| (from.into(), to.into())).collect(),
            open: false,
        }
    }

    pub fn open_mapping<I, K, V>(key: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        match Self::mapping(key, pairs) {
            Self::Mapping { key, pairs, .. } => Self::Mapping { key, pairs, open: true },
            other => other,
        }
    }

    pub fn entity_id(key: impl Into<String>) -> Self {
        Self::EntityId(IdSpec::elementary(key))
    }

    pub fn composite_entity_id<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::EntityId(IdSpec::composite(keys))
    }

    pub fn entity_id_list(key: impl Into<String>) -> Self {
        Self::EntityIdList(key.into())
    }

    pub fn entity_id_map(key: impl Into<String>, flipped: bool) -> Self {
        Self::EntityIdMap { key: key.into(), flipped }
    }

    /// Response key of pickers reading exactly one key.
    fn key(&self) -> Option<&str> {
        match self {
            Self::Simple(key)
            | Self::LangDict(key)
            | Self::Url(key)
            | Self::UsoswebUrl(key)
            | Self::Decimal(key)
            | Self::Date(key)
            | Self::DateTime(key)
            | Self::Coords(key)
            | Self::Mapping { key, .. }
            | Self::EntityIdList(key)
            | Self::EntityIdMap { key, .. } => Some(key),
            Self::Nested(nested) => Some(&nested.key),
            Self::EntityId(_) | Self::InlineEntity(_) | Self::InlineEntityList(_) => None,
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Simple(_)
                | Self::LangDict(_)
                | Self::Url(_)
                | Self::UsoswebUrl(_)
                | Self::Decimal(_)
                | Self::Date(_)
                | Self::DateTime(_)
                | Self::Coords(_)
                | Self::Mapping { .. }
        )
    }

    fn accepts(&self, kind: &FieldKind) -> bool {
        match self {
            _ if self.is_scalar() => matches!(kind, FieldKind::Scalar(_)),
            Self::EntityIdList(_) | Self::InlineEntityList(_) => matches!(kind, FieldKind::EntityList(_)),
            Self::EntityIdMap { .. } => matches!(kind, FieldKind::EntityMap(_)),
            Self::Nested(nested) => match nested.shape {
                NestedShape::List => matches!(kind, FieldKind::EntityList(_)),
                NestedShape::Map => matches!(kind, FieldKind::EntityMap(_)),
                NestedShape::Single | NestedShape::AncestorFromList => {
                    matches!(kind, FieldKind::Entity(_) | FieldKind::OptionalEntity(_))
                }
            },
            _ => matches!(kind, FieldKind::Entity(_) | FieldKind::OptionalEntity(_)),
        }
    }

    pub(crate) fn validate(&self, schema: &Schema, field: &Field, method: &str) -> Result<()> {
        if !self.accepts(&field.kind) {
            return Err(EngineError::invalid_catalog(
                method,
                format!("picker of field '{}' does not match its kind {:?}", field.name, field.kind),
            ));
        }
        let nested = match self {
            Self::InlineEntity(pickers) | Self::InlineEntityList(pickers) => pickers,
            Self::Nested(nested) => &nested.pickers,
            _ => return Ok(()),
        };
        let class = referenced_class(method, field)?;
        nested.fields.validate(schema, class, method)
    }

    pub(crate) fn update_api_selector(&self, api: &mut Selector, sub: &Selector) {
        match self {
            Self::EntityId(id) => id.update_api_selector(api),
            Self::InlineEntity(pickers) | Self::InlineEntityList(pickers) => pickers.update_api_selector(api, sub, true),
            Self::Nested(nested) => nested.update_api_selector(api, sub),
            other => {
                if let Some(key) = other.key() {
                    merge_key(api, key, Selector::new());
                }
            }
        }
    }

    pub(crate) fn load(&self, reactor: &mut Reactor<'_>, path: &str, field: &Field, response: &Value, sub: &Selector) -> Result<FieldValue<EntityHandle>> {
        match self {
            Self::EntityId(id) => {
                let class = referenced_class(path, field)?;
                let handle = id
                    .load(path, response)?
                    .map(|id| reactor.spawn_entity(class, id, sub, None, false));
                Ok(single_entity(field, handle))
            }
            Self::InlineEntity(pickers) => {
                let class = referenced_class(path, field)?;
                let handle = pickers.load_entity(reactor, path, class, response, sub)?;
                Ok(single_entity(field, handle))
            }
            Self::InlineEntityList(pickers) => {
                let class = referenced_class(path, field)?;
                let items: Vec<&Value> = match response {
                    Value::Object(object) => object.values().collect(),
                    Value::Array(items) => items.iter().collect(),
                    _ => return Err(EngineError::malformed(path, format!("field '{}' needs an object or a list", field.name))),
                };
                let mut handles = Vec::new();
                for item in items.into_iter().filter(|item| !item.is_null()) {
                    if let Some(handle) = pickers.load_entity(reactor, path, class, item, sub)? {
                        handles.push(handle);
                    }
                }
                Ok(FieldValue::EntityList(handles))
            }
            Self::Nested(nested) => nested.load(reactor, path, field, response, sub),
            Self::EntityIdList(key) => {
                let Some(value) = response.get(key) else {
                    return missing_key(path, field, key);
                };
                let class = referenced_class(path, field)?;
                let handles = array(path, key, value)?
                    .iter()
                    .map(|id| reactor.spawn_entity(class, id_text(id), sub, None, false))
                    .collect();
                Ok(FieldValue::EntityList(handles))
            }
            Self::EntityIdMap { key, flipped } => {
                let Some(value) = response.get(key) else {
                    return missing_key(path, field, key);
                };
                let class = referenced_class(path, field)?;
                let mut entities = IndexMap::new();
                for (name, id) in objects(path, key, value)? {
                    let (entry, id) = if *flipped {
                        (id_text(id), name.to_string())
                    } else {
                        (name.to_string(), id_text(id))
                    };
                    entities.insert(entry, reactor.spawn_entity(class, id, sub, None, false));
                }
                Ok(FieldValue::EntityMap(entities))
            }
            scalar => {
                let Some(key) = scalar.key() else {
                    return Err(EngineError::invalid_catalog(path, format!("picker of field '{}' reads no key", field.name)));
                };
                let Some(value) = response.get(key) else {
                    return missing_key(path, field, key);
                };
                scalar.prep_scalar(path, value, reactor.lang()).map(FieldValue::Scalar)
            }
        }
    }

    /// Converts the raw value of a scalar picker.
    fn prep_scalar(&self, path: &str, value: &Value, lang: Lang) -> Result<Scalar> {
        let malformed = |what: &str| EngineError::malformed(path, format!("{what}: {value}"));
        match self {
            Self::Simple(_) => Ok(Scalar::from_json(value)),
            Self::Url(_) if is_falsy(value) => Ok(Scalar::Null),
            Self::Url(_) => Ok(Scalar::from_json(value)),
            Self::UsoswebUrl(_) => {
                let value = match value {
                    Value::Array(items) => items.first().unwrap_or(&Value::Null),
                    other => other,
                };
                match value {
                    Value::Null => Ok(Scalar::Null),
                    Value::String(url) if url.is_empty() => Ok(Scalar::Null),
                    Value::String(url) => {
                        let separator = if url.contains('?') { '&' } else { '?' };
                        let lang_param = if lang == Lang::En { "lang=2" } else { "lang=1" };
                        Ok(Scalar::String(format!("{url}{separator}{lang_param}")))
                    }
                    _ => Err(malformed("expected a profile url")),
                }
            }
            Self::Decimal(_) => match value {
                Value::Null => Ok(Scalar::Null),
                Value::String(text) if text.is_empty() || text == "None" => Ok(Scalar::Null),
                Value::String(text) => text.trim().parse().map(Scalar::Decimal).map_err(|_| malformed("expected a decimal")),
                Value::Number(number) => number.as_f64().map(Scalar::Decimal).ok_or_else(|| malformed("expected a decimal")),
                _ => Err(malformed("expected a decimal")),
            },
            Self::Date(_) => match value {
                Value::Null => Ok(Scalar::Null),
                Value::String(text) if text.is_empty() => Ok(Scalar::Null),
                Value::String(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map(Scalar::Date)
                    .map_err(|_| malformed("expected a YYYY-MM-DD date")),
                _ => Err(malformed("expected a date")),
            },
            Self::DateTime(_) => match value {
                Value::Null => Ok(Scalar::Null),
                Value::String(text) if text.is_empty() => Ok(Scalar::Null),
                Value::String(text) => parse_date_time(text)
                    .map(Scalar::DateTime)
                    .ok_or_else(|| malformed("expected a YYYY-MM-DD HH:MM:SS date time")),
                _ => Err(malformed("expected a date time")),
            },
            Self::LangDict(_) => match value {
                Value::Null => Ok(Scalar::Null),
                Value::Object(translations) => {
                    let pick = |code: &str| translations.get(code).and_then(Value::as_str).filter(|text| !text.is_empty());
                    let text = pick(lang.code()).or_else(|| pick(Lang::Pl.code())).unwrap_or_default();
                    Ok(Scalar::String(text.to_string()))
                }
                _ => Err(malformed("expected a translated string")),
            },
            Self::Coords(_) => match value {
                Value::Null => Ok(Scalar::Null),
                Value::Object(point) => {
                    let coordinate = |name: &str| point.get(name).and_then(as_f64).ok_or_else(|| malformed("expected coordinates"));
                    Ok(Scalar::Coords(Coords {
                        lat: coordinate("lat")?,
                        long: coordinate("long")?,
                    }))
                }
                _ => Err(malformed("expected coordinates")),
            },
            Self::Mapping { pairs, open, .. } => match pairs.iter().find(|(from, _)| from == value) {
                Some((_, to)) => Ok(Scalar::from_json(to)),
                None if *open => Ok(Scalar::from_json(value)),
                None => Err(malformed("unmapped value")),
            },
            _ => Err(EngineError::invalid_catalog(path, "entity picker used as scalar picker")),
        }
    }
}

impl From<NestedEntityPicker> for Picker {
    fn from(nested: NestedEntityPicker) -> Self {
        Self::Nested(nested)
    }
}

/// Pickers of a set of fields, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPickers {
    pickers: IndexMap<String, Picker>,
}

impl FieldPickers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, picker: impl Into<Picker>) -> Self {
        self.pickers.insert(name.into(), picker.into());
        self
    }

    /// Union of both sets; `other` wins on shared names.
    pub fn merged(mut self, other: FieldPickers) -> Self {
        self.pickers.extend(other.pickers);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Picker> {
        self.pickers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pickers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pickers.is_empty()
    }

    /// Checks names and picker kinds against the fields of `class`.
    pub fn validate(&self, schema: &Schema, class: EntityClassId, method: &str) -> Result<()> {
        for (name, picker) in &self.pickers {
            let field = schema.field(class, name).ok_or_else(|| {
                EngineError::invalid_catalog(method, format!("{} has no field '{name}'", schema.class(class).name))
            })?;
            picker.validate(schema, field, method)?;
        }
        Ok(())
    }

    /// Adds the response keys needed for `selector` to the API fields selector.
    pub fn update_api_selector(&self, api: &mut Selector, selector: &Selector) {
        for (name, sub) in selector.entries() {
            let Some(picker) = self.pickers.get(name) else {
                continue;
            };
            let unrolled;
            let nested = match sub {
                SubSelector::Nested(nested) => nested,
                SubSelector::Recursive => {
                    unrolled = selector.unrolled();
                    &unrolled
                }
            };
            picker.update_api_selector(api, nested);
        }
    }

    /// Reads the values of the selected fields this set has pickers for.
    pub fn load_values(
        &self,
        reactor: &mut Reactor<'_>,
        path: &str,
        class: EntityClassId,
        response: &Value,
        selector: &Selector,
    ) -> Result<FieldValues> {
        let schema = reactor.schema();
        let mut values = FieldValues::new();
        for (name, sub) in selector.iter() {
            let Some(picker) = self.pickers.get(name) else {
                continue;
            };
            let field = schema
                .field(class, name)
                .ok_or_else(|| EngineError::invalid_catalog(path, format!("{} has no field '{name}'", schema.class(class).name)))?;
            values.insert(name.to_string(), picker.load(reactor, path, field, response, sub)?);
        }
        Ok(values)
    }
}

/// Field pickers of an entity together with the keys of its id.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPickers {
    id: IdSpec,
    fields: FieldPickers,
}

impl EntityPickers {
    pub fn new(id: IdSpec) -> Self {
        Self {
            id,
            fields: FieldPickers::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, picker: impl Into<Picker>) -> Self {
        self.fields = self.fields.with(name, picker);
        self
    }

    pub fn merged(mut self, other: FieldPickers) -> Self {
        self.fields = self.fields.merged(other);
        self
    }

    pub fn id(&self) -> &IdSpec {
        &self.id
    }

    pub fn fields(&self) -> &FieldPickers {
        &self.fields
    }

    pub fn into_fields(self) -> FieldPickers {
        self.fields
    }

    pub fn make_picker(&self, key: impl Into<String>) -> NestedEntityPicker {
        NestedEntityPicker::new(key, self.clone(), NestedShape::Single)
    }

    pub fn make_list_picker(&self, key: impl Into<String>) -> NestedEntityPicker {
        NestedEntityPicker::new(key, self.clone(), NestedShape::List)
    }

    pub fn make_map_picker(&self, key: impl Into<String>) -> NestedEntityPicker {
        NestedEntityPicker::new(key, self.clone(), NestedShape::Map)
    }

    pub fn make_ancestor_picker(&self, key: impl Into<String>) -> NestedEntityPicker {
        NestedEntityPicker::new(key, self.clone(), NestedShape::AncestorFromList)
    }

    pub fn make_inline_picker(&self) -> Picker {
        Picker::InlineEntity(self.clone())
    }

    pub fn make_inline_list_picker(&self) -> Picker {
        Picker::InlineEntityList(self.clone())
    }

    pub fn update_api_selector(&self, api: &mut Selector, selector: &Selector, with_id: bool) {
        self.fields.update_api_selector(api, selector);
        if with_id {
            self.id.update_api_selector(api);
        }
    }

    pub fn load_id(&self, path: &str, response: &Value) -> Result<Option<String>> {
        self.id.load(path, response)
    }

    /// Spawns the entity described by `response`; `None` when its id is null.
    pub fn load_entity(
        &self,
        reactor: &mut Reactor<'_>,
        path: &str,
        class: EntityClassId,
        response: &Value,
        selector: &Selector,
    ) -> Result<Option<EntityHandle>> {
        let Some(id) = self.load_id(path, response)? else {
            return Ok(None);
        };
        let values = self.fields.load_values(reactor, path, class, response, selector)?;
        Ok(Some(reactor.spawn_entity(class, id, selector, Some(values), false)))
    }
}

/// Parses the API's `YYYY-MM-DD HH:MM:SS[.ffffff]` local time.
pub(crate) fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let format = if text.contains('.') { "%Y-%m-%d %H:%M:%S%.f" } else { "%Y-%m-%d %H:%M:%S" };
    NaiveDateTime::parse_from_str(text.trim(), format).ok()
}

fn merge_key(api: &mut Selector, key: &str, nested: Selector) {
    api.merge(&Selector::new().with(key, nested));
}

fn missing_key(path: &str, field: &Field, key: &str) -> Result<FieldValue<EntityHandle>> {
    if field.variant {
        return Ok(FieldValue::Missing);
    }
    Err(EngineError::malformed(path, format!("missing key '{key}' for field '{}'", field.name)))
}

fn referenced_class(method: &str, field: &Field) -> Result<EntityClassId> {
    field
        .kind
        .referenced_class()
        .ok_or_else(|| EngineError::invalid_catalog(method, format!("field '{}' is not an entity field", field.name)))
}

fn single_entity(field: &Field, handle: Option<EntityHandle>) -> FieldValue<EntityHandle> {
    match (&field.kind, handle) {
        (FieldKind::Entity(_), Some(handle)) => FieldValue::Entity(handle),
        (_, handle) => FieldValue::OptionalEntity(handle),
    }
}

fn array<'v>(path: &str, key: &str, value: &'v Value) -> Result<&'v [Value]> {
    match value {
        Value::Null => Ok(&[]),
        Value::Array(items) => Ok(items),
        _ => Err(EngineError::malformed(path, format!("key '{key}' should hold a list"))),
    }
}

fn objects<'v>(path: &str, key: &str, value: &'v Value) -> Result<Vec<(&'v str, &'v Value)>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(object) => Ok(object.iter().map(|(name, item)| (name.as_str(), item)).collect()),
        _ => Err(EngineError::malformed(path, format!("key '{key}' should hold an object"))),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(object) => object.is_empty(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tal_types::parse_basic;

    use super::*;

    fn prep(picker: &Picker, value: Value, lang: Lang) -> Result<Scalar> {
        picker.prep_scalar("services/test", &value, lang)
    }

    #[test]
    fn lang_dict_falls_back_to_polish() {
        let picker = Picker::lang_dict("name");
        let both = json!({"pl": "Wydział", "en": "Faculty"});
        assert_eq!(prep(&picker, both, Lang::En).unwrap(), Scalar::from("Faculty"));
        let polish_only = json!({"pl": "Some building name", "en": ""});
        assert_eq!(prep(&picker, polish_only, Lang::En).unwrap(), Scalar::from("Some building name"));
        assert_eq!(prep(&picker, json!({"pl": null, "en": null}), Lang::Pl).unwrap(), Scalar::from(""));
        assert_eq!(prep(&picker, Value::Null, Lang::Pl).unwrap(), Scalar::Null);
    }

    #[test]
    fn usosweb_url_gets_language_parameter() {
        let picker = Picker::usosweb_url("profile_url");
        assert_eq!(
            prep(&picker, json!("https://usosweb.example/kontroler.php?_action=user&id=1"), Lang::En).unwrap(),
            Scalar::from("https://usosweb.example/kontroler.php?_action=user&id=1&lang=2")
        );
        assert_eq!(
            prep(&picker, json!(["https://usosweb.example/unit"]), Lang::Pl).unwrap(),
            Scalar::from("https://usosweb.example/unit?lang=1")
        );
        assert_eq!(prep(&picker, json!(""), Lang::Pl).unwrap(), Scalar::Null);
    }

    #[test]
    fn decimal_treats_none_text_as_null() {
        let picker = Picker::decimal("decimal_value");
        assert_eq!(prep(&picker, json!("None"), Lang::Pl).unwrap(), Scalar::Null);
        assert_eq!(prep(&picker, json!(""), Lang::Pl).unwrap(), Scalar::Null);
        assert_eq!(prep(&picker, json!("4.5"), Lang::Pl).unwrap(), Scalar::Decimal(4.5));
        assert!(prep(&picker, json!("four"), Lang::Pl).is_err());
    }

    #[test]
    fn url_drops_falsy_values() {
        let picker = Picker::url("homepage_url");
        assert_eq!(prep(&picker, json!(""), Lang::Pl).unwrap(), Scalar::Null);
        assert_eq!(prep(&picker, json!("http://a.pl"), Lang::Pl).unwrap(), Scalar::from("http://a.pl"));
    }

    #[test]
    fn mappings_closed_and_open() {
        let sex = Picker::mapping("sex", [("M", "male"), ("F", "female")]);
        assert_eq!(prep(&sex, json!("M"), Lang::Pl).unwrap(), Scalar::from("male"));
        assert!(matches!(prep(&sex, json!("X"), Lang::Pl), Err(EngineError::MalformedResponse { .. })));

        let phones = Picker::open_mapping("phone_numbers", [(Value::Null, json!([]))]);
        assert_eq!(prep(&phones, Value::Null, Lang::Pl).unwrap(), Scalar::List(Vec::new()));
        assert_eq!(prep(&phones, json!(["123"]), Lang::Pl).unwrap(), Scalar::List(vec![Scalar::from("123")]));
    }

    #[test]
    fn dates_and_date_times() {
        let date = Picker::date("start_date");
        assert_eq!(
            prep(&date, json!("2024-10-01"), Lang::Pl).unwrap(),
            Scalar::Date(NaiveDate::from_ymd_opt(2024, 10, 1).unwrap())
        );
        let date_time = Picker::date_time("last_changed");
        let parsed = prep(&date_time, json!("2024-10-01 12:30:00.250000"), Lang::Pl).unwrap();
        let Scalar::DateTime(value) = parsed else {
            panic!("expected a date time, got {parsed:?}");
        };
        assert_eq!(value.to_string(), "2024-10-01 12:30:00.250");
        assert!(prep(&date_time, json!("yesterday"), Lang::Pl).is_err());
    }

    #[test]
    fn coords_accept_numbers_and_strings() {
        let picker = Picker::coords("location");
        assert_eq!(
            prep(&picker, json!({"lat": 52.2, "long": "21.0"}), Lang::Pl).unwrap(),
            Scalar::Coords(Coords { lat: 52.2, long: 21.0 })
        );
    }

    #[test]
    fn nested_picker_builds_api_selector() {
        let room = EntityPickers::new(IdSpec::elementary("id"))
            .with("number", Picker::simple("number"))
            .with(
                "building",
                EntityPickers::new(IdSpec::elementary("building_id"))
                    .with("name", Picker::lang_dict("building_name"))
                    .make_inline_picker(),
            );
        let user = FieldPickers::new().with("room", room.make_picker("room"));

        let selector = parse_basic("room[number|building[name]]").unwrap();
        let mut api = Selector::new();
        user.update_api_selector(&mut api, &selector);
        assert_eq!(api, parse_basic("room[id|number|building_id|building_name]").unwrap());
    }

    #[test]
    fn lifted_fields_move_to_parent_selector() {
        let grade = EntityPickers::new(IdSpec::composite(["grade_type_id", "symbol"])).with("symbol", Picker::simple("symbol"));
        let pickers = FieldPickers::new().with("values", grade.make_list_picker("values").without_subfield_selector().lifting("id", "grade_type_id"));

        let mut api = Selector::new();
        pickers.update_api_selector(&mut api, &parse_basic("values[symbol]").unwrap());
        assert_eq!(api, parse_basic("id|values").unwrap());
    }
}
