//! User-facing entry point: one resolution run per call.

use std::{cell::Cell, sync::Arc};

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;
use tal_api::{Params, Transport};
use tal_types::{Entity, EntityClassId, FieldValue, MATCH_FIELD, MatchString, Scalar, Selector, parse};
use tracing::debug;

use crate::{
    catalog::Catalog,
    error::{EngineError, Result},
    lang::Lang,
    methods::picker::parse_date_time,
    reactor::{Reactor, RunStats},
};

/// A search hit: the found entity and the highlighted match text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub entity: Entity,
    pub highlight: MatchString,
}

/// Resolves entities of a catalog through one transport.
pub struct Session {
    catalog: Arc<Catalog>,
    transport: Arc<dyn Transport>,
    lang: Lang,
    last_run: Cell<RunStats>,
}

impl Session {
    pub fn new(catalog: Arc<Catalog>, transport: Arc<dyn Transport>) -> Self {
        Self {
            catalog,
            transport,
            lang: Lang::default(),
            last_run: Cell::new(RunStats::default()),
        }
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Statistics of the previous run.
    pub fn last_run_stats(&self) -> RunStats {
        self.last_run.get()
    }

    /// Parses `fields` for `class`; `None` means the class's default selector.
    pub fn selector(&self, class: &str, fields: Option<&str>) -> Result<(EntityClassId, Selector)> {
        let class = self.catalog.schema().class_id(class)?;
        Ok((class, self.class_selector(class, fields)?))
    }

    fn class_selector(&self, class: EntityClassId, fields: Option<&str>) -> Result<Selector> {
        let schema = self.catalog.schema();
        Ok(match fields {
            Some(text) => parse(text, schema, class)?,
            None => schema.default_selector(class).clone(),
        })
    }

    /// Fetches one entity; fails with [`EngineError::EntityNotFound`] when it does not exist.
    pub fn get(&self, class: &str, id: &str, fields: Option<&str>) -> Result<Entity> {
        let (class, selector) = self.selector(class, fields)?;
        self.get_with(class, id, &selector)
    }

    pub fn get_with(&self, class: EntityClassId, id: &str, selector: &Selector) -> Result<Entity> {
        let mut reactor = self.reactor();
        let handle = reactor.spawn_entity(class, id, selector, None, true);
        self.run(&mut reactor)?;
        let entity = reactor.materialize(handle);
        if !entity.exists() {
            return Err(EngineError::EntityNotFound {
                class: entity.class_name().to_string(),
                id: id.to_string(),
            });
        }
        Ok(entity)
    }

    /// Fetches several entities of one class; absent ids are left out.
    pub fn get_many<I, S>(&self, class: &str, ids: I, fields: Option<&str>) -> Result<IndexMap<String, Entity>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (class, selector) = self.selector(class, fields)?;
        self.get_many_with(class, ids, &selector)
    }

    pub fn get_many_with<I, S>(&self, class: EntityClassId, ids: I, selector: &Selector) -> Result<IndexMap<String, Entity>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reactor = self.reactor();
        let mut handles = IndexMap::new();
        for id in ids {
            let id = id.as_ref();
            if !handles.contains_key(id) {
                handles.insert(id.to_string(), reactor.spawn_entity(class, id, selector, None, true));
            }
        }
        self.run(&mut reactor)?;
        Ok(handles
            .into_iter()
            .map(|(id, handle)| (id, reactor.materialize(handle)))
            .filter(|(_, entity)| entity.exists())
            .collect())
    }

    /// Lists the entities of `class` in `domain`.
    pub fn list(&self, class: &str, domain: &str, fields: Option<&str>) -> Result<Vec<Entity>> {
        let (class, selector) = self.selector(class, fields)?;
        self.list_with(class, domain, &selector)
    }

    pub fn list_with(&self, class: EntityClassId, domain: &str, selector: &Selector) -> Result<Vec<Entity>> {
        let mut reactor = self.reactor();
        let slot = reactor.spawn_list(class, domain, selector);
        self.run(&mut reactor)?;
        let handles = reactor.take_output(slot);
        Ok(handles.into_iter().map(|handle| reactor.materialize(handle)).collect())
    }

    /// Full-text search; `fields` selects fields of the found entities.
    pub fn search(&self, class: &str, query: &str, fields: Option<&str>) -> Result<Vec<SearchResult>> {
        let (class, selector) = self.selector(class, fields)?;
        self.search_with(class, query, &selector)
    }

    pub fn search_with(&self, class: EntityClassId, query: &str, selector: &Selector) -> Result<Vec<SearchResult>> {
        let schema = self.catalog.schema();
        let mut reactor = self.reactor();
        let slot = reactor.spawn_search(class, query, selector);
        self.run(&mut reactor)?;

        let item_class = schema.class(schema.class(class).search_item_class().ok_or_else(|| EngineError::NoSuchSearchMethod {
            class: schema.class(class).name.clone(),
        })?);
        let entity_field = item_class.search_entity_field().unwrap_or_default();

        let mut results = Vec::new();
        for handle in reactor.take_output(slot) {
            let item = reactor.materialize(handle);
            let entity = item.get(entity_field).ok().and_then(FieldValue::as_entity).cloned();
            let highlight = match item.get(MATCH_FIELD)?.as_scalar() {
                Some(Scalar::Match(highlight)) => highlight.clone(),
                _ => MatchString::default(),
            };
            match entity {
                Some(entity) => results.push(SearchResult { entity, highlight }),
                None => debug!(class = %item_class, "search item without entity skipped"),
            }
        }
        Ok(results)
    }

    /// Fetches the user the transport's credentials belong to.
    pub fn get_current_user(&self, fields: Option<&str>) -> Result<Entity> {
        let method = self.catalog.current_user_method().ok_or(EngineError::MissingMethod("current user"))?;
        let selector = self.class_selector(method.entity_class(), fields)?;
        let mut reactor = self.reactor();
        let handle = method.load(&mut reactor, &selector)?;
        self.run(&mut reactor)?;
        Ok(reactor.materialize(handle))
    }

    /// Local time of the API server.
    pub fn now(&self) -> Result<NaiveDateTime> {
        let path = self.catalog.server_time_path().ok_or(EngineError::MissingMethod("server time"))?;
        let response = self.transport.call_method(path, &Params::new())?;
        response
            .as_str()
            .and_then(parse_date_time)
            .ok_or_else(|| EngineError::malformed(path, format!("expected a date time: {response}")))
    }

    fn reactor(&self) -> Reactor<'_> {
        Reactor::new(&self.catalog, self.transport.as_ref(), self.lang)
    }

    fn run(&self, reactor: &mut Reactor<'_>) -> Result<()> {
        let stats = reactor.execute()?;
        self.last_run.set(stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tal_api::ScriptedTransport;
    use tal_types::{DataType, EntityClassDecl, FieldDecl, Schema};

    use super::*;
    use crate::methods::{CurrentUserMethod, EntityPickers, IdSpec, Picker};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .class(EntityClassDecl::new("User").field(FieldDecl::scalar("login", DataType::String).default()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn extras_need_registered_methods() {
        let catalog = Arc::new(Catalog::builder(schema()).build());
        let session = Session::new(catalog, Arc::new(ScriptedTransport::new()));

        assert!(matches!(session.now(), Err(EngineError::MissingMethod("server time"))));
        assert!(matches!(session.get_current_user(None), Err(EngineError::MissingMethod("current user"))));
    }

    #[test]
    fn server_time_must_be_a_date_time() {
        let mut builder = Catalog::builder(schema());
        builder.register_server_time("clock/now");
        let transport = Arc::new(ScriptedTransport::new());
        transport.expect("clock/now", std::iter::empty::<(&str, &str)>(), json!(17));
        let session = Session::new(Arc::new(builder.build()), transport);

        assert!(matches!(session.now(), Err(EngineError::MalformedResponse { .. })));
    }

    #[test]
    fn current_user_is_registered_once() {
        let schema = schema();
        let user = schema.class_id("User").unwrap();
        let pickers = EntityPickers::new(IdSpec::elementary("id")).with("login", Picker::simple("login"));
        let mut builder = Catalog::builder(schema);
        builder.register_current_user(CurrentUserMethod::new("me", user, pickers.clone())).unwrap();
        assert!(matches!(
            builder.register_current_user(CurrentUserMethod::new("me", user, pickers)),
            Err(EngineError::InvalidCatalog { .. })
        ));
    }
}
