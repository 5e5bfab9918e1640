use serde_json::Value;
use tal_api::Params;
use tal_types::{EntityClassId, Field, FieldValue, MATCH_FIELD, MatchString, Scalar, Schema, Selector, stringify};

use super::{FIELDS_PARAM, picker::Picker};
use crate::{
    error::{EngineError, Result},
    reactor::{EntityHandle, FieldValues, Reactor},
};

/// Number of results requested per search.
const SEARCH_LIMIT: &str = "20";

/// How the endpoint takes its `fields` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchFieldsMode {
    /// `items[user[...]|match]`
    #[default]
    Full,
    /// `user[...]|match`
    Partial,
    /// No `fields` parameter.
    None,
}

/// Full-text search over one searchable class, producing search-item entities.
#[derive(Debug, Clone)]
pub struct SearchMethod {
    path: String,
    class: EntityClassId,
    picker: Picker,
    fields_mode: SearchFieldsMode,
    query_param: String,
}

impl SearchMethod {
    /// `picker` reads the found entity out of each result item.
    pub fn new(path: impl Into<String>, class: EntityClassId, picker: impl Into<Picker>) -> Self {
        Self {
            path: path.into(),
            class,
            picker: picker.into(),
            fields_mode: SearchFieldsMode::Full,
            query_param: "query".to_string(),
        }
    }

    pub fn fields_mode(mut self, mode: SearchFieldsMode) -> Self {
        self.fields_mode = mode;
        self
    }

    pub fn query_param(mut self, name: impl Into<String>) -> Self {
        self.query_param = name.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn entity_class(&self) -> EntityClassId {
        self.class
    }

    /// Search-item class and its entity field.
    fn item_field<'s>(&self, schema: &'s Schema) -> Result<(EntityClassId, &'s Field)> {
        let class = schema.class(self.class);
        let item_class = class
            .search_item_class()
            .ok_or_else(|| EngineError::invalid_catalog(&self.path, format!("{class} is not searchable")))?;
        let item = schema.class(item_class);
        let field = item
            .search_entity_field()
            .and_then(|name| item.field(name))
            .ok_or_else(|| EngineError::invalid_catalog(&self.path, format!("{item} has no entity field")))?;
        Ok((item_class, field))
    }

    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let (_, field) = self.item_field(schema)?;
        self.picker.validate(schema, field, &self.path)
    }

    fn params(&self, query: &str, lang: &str, selector: &Selector) -> Params {
        let mut params = Params::new();
        params.insert("lang".to_string(), lang.to_string());
        params.insert(self.query_param.clone(), query.to_string());
        params.insert("num".to_string(), SEARCH_LIMIT.to_string());

        let mut api = Selector::new().with_field(MATCH_FIELD);
        self.picker.update_api_selector(&mut api, selector);
        let fields = stringify(&api);
        match self.fields_mode {
            SearchFieldsMode::Full => {
                params.insert(FIELDS_PARAM.to_string(), format!("items[{fields}]"));
            }
            SearchFieldsMode::Partial => {
                params.insert(FIELDS_PARAM.to_string(), fields);
            }
            SearchFieldsMode::None => {}
        }
        params
    }

    /// Runs the query; each result becomes a search item holding the found entity and the highlighted match.
    pub fn execute(&self, reactor: &mut Reactor<'_>, query: &str, selector: &Selector) -> Result<Vec<EntityHandle>> {
        let (item_class, field) = self.item_field(reactor.schema())?;
        let params = self.params(query, reactor.lang().code(), selector);
        let response = reactor.call_method(&self.path, &params)?;
        let items = response
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::malformed(&self.path, "missing 'items' list"))?;

        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let entity = self.picker.load(reactor, &self.path, field, item, selector)?;
            let html = item
                .get(MATCH_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::malformed(&self.path, "search item without 'match'"))?;
            let highlight = MatchString::from_html(html)?;

            let mut values = FieldValues::new();
            values.insert(field.name.clone(), entity);
            values.insert(MATCH_FIELD.to_string(), FieldValue::Scalar(Scalar::Match(highlight)));
            handles.push(reactor.alloc_entity(item_class, Some(String::new()), values));
        }
        Ok(handles)
    }
}
