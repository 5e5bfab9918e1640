use tal_api::Params;
use tal_types::{EntityClassId, Schema, Selector, stringify};
use tracing::debug;

use super::{FIELDS_PARAM, picker::EntityPickers};
use crate::{
    error::{EngineError, Result},
    reactor::{EntityHandle, Reactor},
};

/// Fetches the user the API credentials belong to; the call takes no id.
#[derive(Debug, Clone)]
pub struct CurrentUserMethod {
    path: String,
    class: EntityClassId,
    pickers: EntityPickers,
}

impl CurrentUserMethod {
    pub fn new(path: impl Into<String>, class: EntityClassId, pickers: EntityPickers) -> Self {
        Self {
            path: path.into(),
            class,
            pickers,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn entity_class(&self) -> EntityClassId {
        self.class
    }

    /// Spawns the current user; fields the call does not supply stay pending for the run.
    pub(crate) fn load(&self, reactor: &mut Reactor<'_>, selector: &Selector) -> Result<EntityHandle> {
        let mut api = Selector::new();
        self.pickers.update_api_selector(&mut api, selector, true);
        let mut params = Params::new();
        params.insert(FIELDS_PARAM.to_string(), stringify(&api));

        let response = reactor.call_method(&self.path, &params)?;
        let handle = self
            .pickers
            .load_entity(reactor, &self.path, self.class, &response, selector)?
            .ok_or_else(|| EngineError::malformed(&self.path, "current user has no id"))?;
        debug!(path = %self.path, id = ?reactor.entity_id(handle), "loaded current user");
        Ok(handle)
    }

    pub(crate) fn validate(&self, schema: &Schema) -> Result<()> {
        self.pickers.fields().validate(schema, self.class, &self.path)
    }
}
