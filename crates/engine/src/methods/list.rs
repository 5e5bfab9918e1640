use serde_json::Value;
use tal_api::Params;
use tal_types::{EntityClassId, Schema, Selector, stringify};

use super::{FIELDS_PARAM, picker::EntityPickers};
use crate::{
    error::{EngineError, Result},
    reactor::{EntityHandle, Reactor},
};

/// One step of the walk from a list response to its entity objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStep {
    Key(String),
    /// Every member of an object or list.
    Each,
}

impl ListStep {
    /// Builds a walk from segments, `*` meaning [`ListStep::Each`].
    pub fn path<I, S>(segments: I) -> Vec<ListStep>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .map(|segment| match segment.as_ref() {
                "*" => Self::Each,
                key => Self::Key(key.to_string()),
            })
            .collect()
    }
}

/// Lists the entities of one class within a domain (for instance "courses of the current user").
#[derive(Debug, Clone)]
pub struct ListMethod {
    domain: String,
    path: String,
    class: EntityClassId,
    pickers: EntityPickers,
    steps: Vec<ListStep>,
    extra_params: Params,
    fields_wrapper: Option<String>,
    has_fields_param: bool,
}

impl ListMethod {
    pub fn new(domain: impl Into<String>, path: impl Into<String>, class: EntityClassId, pickers: EntityPickers, steps: Vec<ListStep>) -> Self {
        Self {
            domain: domain.into(),
            path: path.into(),
            class,
            pickers,
            steps,
            extra_params: Params::new(),
            fields_wrapper: None,
            has_fields_param: true,
        }
    }

    pub fn extra_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(name.into(), value.into());
        self
    }

    /// Template wrapping the `fields` value; `{}` stands for the entity selector.
    pub fn fields_wrapper(mut self, template: impl Into<String>) -> Self {
        self.fields_wrapper = Some(template.into());
        self
    }

    pub fn without_fields_param(mut self) -> Self {
        self.has_fields_param = false;
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn entity_class(&self) -> EntityClassId {
        self.class
    }

    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.steps.is_empty() {
            return Err(EngineError::invalid_catalog(&self.path, "empty list path"));
        }
        self.pickers.fields().validate(schema, self.class, &self.path)
    }

    fn params(&self, selector: &Selector) -> Params {
        let mut params = self.extra_params.clone();
        if self.has_fields_param {
            let mut api = Selector::new();
            self.pickers.update_api_selector(&mut api, selector, true);
            let fields = stringify(&api);
            let fields = match &self.fields_wrapper {
                Some(template) => template.replace("{}", &fields),
                None => fields,
            };
            params.insert(FIELDS_PARAM.to_string(), fields);
        }
        params
    }

    /// Calls the endpoint and spawns one entity per listed object.
    pub fn execute(&self, reactor: &mut Reactor<'_>, selector: &Selector) -> Result<Vec<EntityHandle>> {
        let response = reactor.call_method(&self.path, &self.params(selector))?;
        let mut items = Vec::new();
        walk(&self.path, &self.steps, &response, &mut items)?;

        let mut handles = Vec::with_capacity(items.len());
        for item in items.into_iter().filter(|item| !item.is_null()) {
            if let Some(handle) = self.pickers.load_entity(reactor, &self.path, self.class, item, selector)? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }
}

fn walk<'v>(path: &str, steps: &[ListStep], value: &'v Value, items: &mut Vec<&'v Value>) -> Result<()> {
    let Some((step, rest)) = steps.split_first() else {
        items.push(value);
        return Ok(());
    };
    match step {
        ListStep::Key(key) => {
            let nested = value
                .get(key)
                .ok_or_else(|| EngineError::malformed(path, format!("missing list key '{key}'")))?;
            walk(path, rest, nested, items)
        }
        ListStep::Each => {
            let members: Vec<&'v Value> = match value {
                Value::Object(object) => object.values().collect(),
                Value::Array(array) => array.iter().collect(),
                Value::Null => return Ok(()),
                _ => return Err(EngineError::malformed(path, "expected an object or a list")),
            };
            for member in members {
                walk(path, rest, member, items)?;
            }
            Ok(())
        }
    }
}
