use indexmap::IndexSet;
use serde_json::Value;
use tal_api::{Params, TransportError};
use tal_types::{EntityClassId, Schema, Selector, stringify};
use tracing::debug;

use super::{
    FIELDS_PARAM,
    id::IdSpec,
    picker::FieldPickers,
};
use crate::{
    error::Result,
    method::{Candidacy, FetchMethod, FetchOutcome, FetchResults},
    reactor::{Reactor, Target},
};

/// Fetches one entity per call.
#[derive(Debug, Clone)]
pub struct GetMethod {
    path: String,
    class: EntityClassId,
    id: IdSpec,
    pickers: FieldPickers,
    field_names: IndexSet<String>,
    has_fields_param: bool,
    extra_params: Params,
}

impl GetMethod {
    pub fn new(path: impl Into<String>, class: EntityClassId, id: IdSpec, pickers: FieldPickers) -> Self {
        let field_names = pickers.names().map(str::to_string).collect();
        Self {
            path: path.into(),
            class,
            id,
            pickers,
            field_names,
            has_fields_param: true,
            extra_params: Params::new(),
        }
    }

    /// The endpoint takes no `fields` parameter.
    pub fn without_fields_param(mut self) -> Self {
        self.has_fields_param = false;
        self
    }

    pub fn extra_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(name.into(), value.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn params(&self, id: &str, selector: &Selector) -> Result<Params> {
        let mut params = Params::new();
        self.id.update_params(&mut params, id)?;
        if self.has_fields_param {
            let mut api = Selector::new();
            self.pickers.update_api_selector(&mut api, selector);
            params.insert(FIELDS_PARAM.to_string(), stringify(&api));
        }
        params.extend(self.extra_params.iter().map(|(name, value)| (name.clone(), value.clone())));
        Ok(params)
    }

    /// True when a failed call means the entity does not exist.
    fn absence(&self, error: &TransportError) -> bool {
        let TransportError::BadRequest {
            error, message, param_name, ..
        } = error
        else {
            return false;
        };
        match error.as_deref() {
            Some("object_not_found") => true,
            Some("param_invalid") => param_name.as_deref().is_some_and(|name| self.id.contains(name)),
            _ => {
                let message = message.to_lowercase();
                message.contains("does not exist") || message.contains("no such")
            }
        }
    }

    fn fetch(&self, reactor: &mut Reactor<'_>, id: &str, selector: &Selector) -> Result<FetchOutcome> {
        let params = self.params(id, selector)?;
        let response = match reactor.call_method(&self.path, &params) {
            Ok(Value::Null) => return Ok(FetchOutcome::Absent),
            Ok(response) => response,
            Err(error) if self.absence(&error) => {
                debug!(path = %self.path, id, error = %error, "treating failure as absent entity");
                return Ok(FetchOutcome::Absent);
            }
            Err(error) => return Err(error.into()),
        };
        let values = self.pickers.load_values(reactor, &self.path, self.class, &response, selector)?;
        Ok(FetchOutcome::Found(values))
    }
}

impl FetchMethod for GetMethod {
    fn name(&self) -> &str {
        &self.path
    }

    fn entity_class(&self) -> EntityClassId {
        self.class
    }

    fn field_names_supplied(&self) -> &IndexSet<String> {
        &self.field_names
    }

    /// First target sharing any field, scored by the number of shared fields.
    fn make_candidacy(&self, targets: &[Target]) -> Option<Candidacy<'_>> {
        targets.iter().enumerate().find_map(|(index, target)| {
            let common: Vec<&str> = target.unresolved().filter(|name| self.field_names.contains(*name)).collect();
            if common.is_empty() {
                return None;
            }
            let score = common.len();
            let selector = target.field_selector(common);
            Some(Candidacy::new(self, vec![index], vec![target.id().to_string()], selector, score))
        })
    }

    fn execute(&self, candidacy: &Candidacy<'_>, reactor: &mut Reactor<'_>) -> Result<FetchResults> {
        let mut results = FetchResults::new();
        for id in candidacy.ids() {
            let outcome = self.fetch(reactor, id, candidacy.selector())?;
            results.insert(id.clone(), outcome);
        }
        Ok(results)
    }

    fn validate(&self, schema: &Schema) -> Result<()> {
        self.pickers.validate(schema, self.class, &self.path)
    }
}
