//! Registry of fetch methods, built once and shared by sessions.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use tal_types::{EntityClassId, Schema};
use tracing::debug;

use crate::{
    error::{EngineError, Result},
    method::FetchMethod,
    methods::{CurrentUserMethod, ListMethod, SearchMethod},
};

/// Fetch methods by entity class: getters in registration order, list methods by domain
/// and at most one search method. The current-user and server-time calls are optional.
pub struct Catalog {
    schema: Arc<Schema>,
    getters: IndexMap<EntityClassId, Vec<Box<dyn FetchMethod>>>,
    lists: IndexMap<(EntityClassId, String), ListMethod>,
    searches: IndexMap<EntityClassId, SearchMethod>,
    current_user: Option<CurrentUserMethod>,
    server_time: Option<String>,
}

impl Catalog {
    pub fn builder(schema: Arc<Schema>) -> CatalogBuilder {
        CatalogBuilder::new(schema)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Getter methods of `class`; earlier registrations win ties.
    pub fn getters(&self, class: EntityClassId) -> &[Box<dyn FetchMethod>] {
        self.getters.get(&class).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn list_method(&self, class: EntityClassId, domain: &str) -> Option<&ListMethod> {
        self.lists.get(&(class, domain.to_string()))
    }

    pub fn search_method(&self, class: EntityClassId) -> Option<&SearchMethod> {
        self.searches.get(&class)
    }

    pub fn current_user_method(&self) -> Option<&CurrentUserMethod> {
        self.current_user.as_ref()
    }

    /// Path of the call answering with the server's local time.
    pub fn server_time_path(&self) -> Option<&str> {
        self.server_time.as_deref()
    }

    /// Domains `class` can be listed in, in registration order.
    pub fn list_domains(&self, class: EntityClassId) -> Vec<&str> {
        self.lists
            .keys()
            .filter(|(owner, _)| *owner == class)
            .map(|(_, domain)| domain.as_str())
            .collect()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("getters", &self.getters.values().map(Vec::len).sum::<usize>())
            .field("lists", &self.lists.len())
            .field("searches", &self.searches.len())
            .finish()
    }
}

/// Validating builder for [`Catalog`].
pub struct CatalogBuilder {
    catalog: Catalog,
}

impl CatalogBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            catalog: Catalog {
                schema,
                getters: IndexMap::new(),
                lists: IndexMap::new(),
                searches: IndexMap::new(),
                current_user: None,
                server_time: None,
            },
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.catalog.schema
    }

    /// Registers a getter after checking its fields against the schema.
    pub fn register_getter(&mut self, method: impl FetchMethod + 'static) -> Result<()> {
        let schema = &self.catalog.schema;
        let class = schema.class(method.entity_class());
        if method.field_names_supplied().is_empty() {
            return Err(EngineError::invalid_catalog(method.name(), "supplies no fields"));
        }
        if let Some(unknown) = method.field_names_supplied().iter().find(|name| class.field(name).is_none()) {
            return Err(EngineError::invalid_catalog(
                method.name(),
                format!("{} has no field '{unknown}'", class.name),
            ));
        }
        method.validate(schema)?;
        debug!(method = method.name(), class = %class, "registered getter");
        self.catalog.getters.entry(class.id).or_default().push(Box::new(method));
        Ok(())
    }

    pub fn register_list(&mut self, method: ListMethod) -> Result<()> {
        method.validate(&self.catalog.schema)?;
        let key = (method.entity_class(), method.domain().to_string());
        if self.catalog.lists.contains_key(&key) {
            return Err(EngineError::invalid_catalog(
                method.path(),
                format!("domain '{}' already has a list method", method.domain()),
            ));
        }
        self.catalog.lists.insert(key, method);
        Ok(())
    }

    pub fn register_search(&mut self, method: SearchMethod) -> Result<()> {
        method.validate(&self.catalog.schema)?;
        if self.catalog.searches.contains_key(&method.entity_class()) {
            return Err(EngineError::invalid_catalog(method.path(), "class already has a search method"));
        }
        self.catalog.searches.insert(method.entity_class(), method);
        Ok(())
    }

    pub fn register_current_user(&mut self, method: CurrentUserMethod) -> Result<()> {
        method.validate(&self.catalog.schema)?;
        if self.catalog.current_user.is_some() {
            return Err(EngineError::invalid_catalog(method.path(), "current user method already registered"));
        }
        self.catalog.current_user = Some(method);
        Ok(())
    }

    pub fn register_server_time(&mut self, path: impl Into<String>) {
        self.catalog.server_time = Some(path.into());
    }

    pub fn build(self) -> Catalog {
        self.catalog
    }
}
