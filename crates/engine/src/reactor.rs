//! Round-based scheduler resolving pending field requests through the catalog.
//!
//! Every requested entity becomes a [`Target`]: the entity, the selector it was spawned
//! with and the top-level field names still unresolved. A run first executes the
//! queued list/search prerequisites, then repeats rounds until no target is active:
//!
//! 1. take the first entity class with active targets
//! 2. ask every getter of that class for a candidacy and keep the best score
//!    (first registered wins ties)
//! 3. execute it and fold the results into the served targets, killing the ones
//!    reported absent
//! 4. merge targets spawned meanwhile, then serve still-unresolved fields from the
//!    per-run value cache
//!
//! Entities live in an arena owned by the reactor and are addressed by [`EntityHandle`]
//! until the run ends and they are materialised into [`Entity`] trees.

use std::{collections::HashMap, mem};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::Value;
use tal_api::{Params, Transport, TransportError};
use tal_types::{DataType, Entity, EntityClassId, FieldKind, FieldValue, Scalar, Schema, Selector};
use tracing::{debug, info, warn};

use crate::{
    catalog::Catalog,
    error::{EngineError, Result},
    lang::Lang,
    method::{Candidacy, FetchOutcome},
};

/// Handle of an entity in the reactor's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(usize);

/// Field values of one entity, keyed by field name.
pub type FieldValues = IndexMap<String, FieldValue<EntityHandle>>;

/// Counters of one resolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub rounds: usize,
    pub remote_calls: usize,
    pub cache_hits: usize,
}

#[derive(Debug)]
struct EntityRecord {
    class: EntityClassId,
    id: Option<String>,
    values: FieldValues,
}

/// Pending request for fields of one entity.
#[derive(Debug, Clone)]
pub struct Target {
    entity: EntityHandle,
    class: EntityClassId,
    id: String,
    selector: Selector,
    unresolved: IndexSet<String>,
    weak: bool,
}

impl Target {
    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    pub fn class(&self) -> EntityClassId {
        self.class
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.unresolved.iter().map(String::as_str)
    }

    pub fn is_unresolved(&self, name: &str) -> bool {
        self.unresolved.contains(name)
    }

    /// Weak targets tolerate the entity being absent.
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn is_active(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// True when both targets were spawned with the same selector and still miss the same fields.
    pub fn has_same_field_selector(&self, other: &Target) -> bool {
        self.unresolved == other.unresolved && self.selector == other.selector
    }

    /// The spawn selector restricted to `names`.
    pub fn field_selector<'n, I>(&self, names: I) -> Selector
    where
        I: IntoIterator<Item = &'n str>,
    {
        self.selector.project(names)
    }
}

#[derive(Debug)]
enum Prerequisite {
    List {
        class: EntityClassId,
        domain: String,
        selector: Selector,
        slot: usize,
    },
    Search {
        class: EntityClassId,
        query: String,
        selector: Selector,
        slot: usize,
    },
}

/// Scheduler state of one resolution run.
pub struct Reactor<'c> {
    catalog: &'c Catalog,
    transport: &'c dyn Transport,
    lang: Lang,
    entities: Vec<EntityRecord>,
    targets: IndexMap<EntityClassId, Vec<Target>>,
    spawned: Vec<Target>,
    prerequisites: Vec<Prerequisite>,
    outputs: Vec<Vec<EntityHandle>>,
    value_cache: HashMap<(EntityClassId, String), IndexMap<String, FieldValue<String>>>,
    stats: RunStats,
}

impl<'c> Reactor<'c> {
    pub fn new(catalog: &'c Catalog, transport: &'c dyn Transport, lang: Lang) -> Self {
        Self {
            catalog,
            transport,
            lang,
            entities: Vec::new(),
            targets: IndexMap::new(),
            spawned: Vec::new(),
            prerequisites: Vec::new(),
            outputs: Vec::new(),
            value_cache: HashMap::new(),
            stats: RunStats::default(),
        }
    }

    pub fn schema(&self) -> &'c Schema {
        self.catalog.schema()
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Performs a remote call through the transport.
    pub fn call_method(&mut self, path: &str, params: &Params) -> std::result::Result<Value, TransportError> {
        self.stats.remote_calls += 1;
        debug!(path, params = ?params, "remote call");
        self.transport.call_method(path, params)
    }

    /// Adds an entity without a target.
    pub fn alloc_entity(&mut self, class: EntityClassId, id: Option<String>, values: FieldValues) -> EntityHandle {
        push_entity(&mut self.entities, class, id, values)
    }

    /// Creates an entity and a target for the fields of `selector` not given in `values`.
    pub fn spawn_entity(
        &mut self,
        class: EntityClassId,
        id: impl Into<String>,
        selector: &Selector,
        values: Option<FieldValues>,
        weak: bool,
    ) -> EntityHandle {
        let id = id.into();
        let entity = self.alloc_entity(class, Some(id.clone()), FieldValues::new());
        let mut target = Target {
            entity,
            class,
            id,
            selector: selector.clone(),
            unresolved: selector.field_names().map(str::to_string).collect(),
            weak,
        };
        if let Some(mut values) = values {
            let names: Vec<String> = target.unresolved.iter().cloned().collect();
            for name in names {
                if let Some(value) = values.shift_remove(&name) {
                    self.resolve_and_cache(&mut target, &name, value);
                }
            }
        }
        if target.is_active() {
            self.spawned.push(target);
        }
        entity
    }

    /// Queues a list prerequisite; its entities are available from [`Reactor::take_output`] after the run.
    pub fn spawn_list(&mut self, class: EntityClassId, domain: impl Into<String>, selector: &Selector) -> usize {
        let slot = self.new_output_slot();
        self.prerequisites.push(Prerequisite::List {
            class,
            domain: domain.into(),
            selector: selector.clone(),
            slot,
        });
        slot
    }

    /// Queues a search prerequisite; its search items are available from [`Reactor::take_output`] after the run.
    pub fn spawn_search(&mut self, class: EntityClassId, query: impl Into<String>, selector: &Selector) -> usize {
        let slot = self.new_output_slot();
        self.prerequisites.push(Prerequisite::Search {
            class,
            query: query.into(),
            selector: selector.clone(),
            slot,
        });
        slot
    }

    fn new_output_slot(&mut self) -> usize {
        self.outputs.push(Vec::new());
        self.outputs.len() - 1
    }

    pub fn take_output(&mut self, slot: usize) -> Vec<EntityHandle> {
        self.outputs.get_mut(slot).map(mem::take).unwrap_or_default()
    }

    /// Id of an entity, `None` once it was proven absent.
    pub fn entity_id(&self, handle: EntityHandle) -> Option<&str> {
        self.entities.get(handle.0).and_then(|record| record.id.as_deref())
    }

    /// Builds an owned entity tree from the arena.
    pub fn materialize(&self, handle: EntityHandle) -> Entity {
        let record = &self.entities[handle.0];
        let mut entity = Entity::new(self.schema().class(record.class), record.id.clone());
        for (name, value) in &record.values {
            entity.set(name.clone(), value.map_entities(|child| self.materialize(*child)));
        }
        entity
    }

    /// Runs prerequisites, then rounds until no target is active.
    pub fn execute(&mut self) -> Result<RunStats> {
        for prerequisite in mem::take(&mut self.prerequisites) {
            self.run_prerequisite(prerequisite)?;
        }
        self.merge_spawned();

        while !self.targets.is_empty() {
            self.stats.rounds += 1;
            self.execute_once()?;
            self.merge_spawned();
            self.resolve_fields_from_cache();
        }

        self.value_cache.clear();
        info!(
            rounds = self.stats.rounds,
            remote_calls = self.stats.remote_calls,
            cache_hits = self.stats.cache_hits,
            "resolution run finished"
        );
        Ok(self.stats)
    }

    fn run_prerequisite(&mut self, prerequisite: Prerequisite) -> Result<()> {
        let catalog = self.catalog;
        match prerequisite {
            Prerequisite::List {
                class,
                domain,
                selector,
                slot,
            } => {
                let method = catalog.list_method(class, &domain).ok_or_else(|| EngineError::NoSuchListMethod {
                    class: self.class_name(class),
                    domain: domain.clone(),
                })?;
                debug!(path = method.path(), domain = %domain, fields = %selector, "running list prerequisite");
                let handles = method.execute(self, &selector)?;
                self.outputs[slot] = handles;
            }
            Prerequisite::Search {
                class,
                query,
                selector,
                slot,
            } => {
                let method = catalog
                    .search_method(class)
                    .ok_or_else(|| EngineError::NoSuchSearchMethod { class: self.class_name(class) })?;
                debug!(path = method.path(), query = %query, fields = %selector, "running search prerequisite");
                let handles = method.execute(self, &query, &selector)?;
                self.outputs[slot] = handles;
            }
        }
        Ok(())
    }

    fn execute_once(&mut self) -> Result<()> {
        let Some((class, mut pool)) = self.targets.shift_remove_index(0) else {
            return Ok(());
        };

        let catalog = self.catalog;
        let mut best: Option<Candidacy<'c>> = None;
        for method in catalog.getters(class) {
            if let Some(candidacy) = method.make_candidacy(&pool)
                && best.as_ref().is_none_or(|current| candidacy.score() > current.score())
            {
                best = Some(candidacy);
            }
        }
        let Some(best) = best else {
            let fields: IndexSet<String> = pool.iter().flat_map(Target::unresolved).map(str::to_string).collect();
            return Err(EngineError::NoApplicableMethod {
                class: self.class_name(class),
                fields: fields.into_iter().collect(),
            });
        };

        debug!(
            class = %self.class_name(class),
            method = best.method().name(),
            targets = best.targets().len(),
            score = best.score(),
            fields = %best.selector(),
            "executing candidacy"
        );
        let results = best.execute(self)?;

        for &index in best.targets() {
            let Some(target) = pool.get_mut(index) else {
                continue;
            };
            match results.get(target.id()) {
                Some(FetchOutcome::Found(values)) => {
                    for name in best.selector().field_names() {
                        if !target.is_unresolved(name) {
                            continue;
                        }
                        let value = values.get(name).cloned().ok_or_else(|| EngineError::MissingFieldValue {
                            method: best.method().name().to_string(),
                            field: name.to_string(),
                            id: target.id().to_string(),
                        })?;
                        self.resolve_and_cache(target, name, value);
                    }
                }
                Some(FetchOutcome::Absent) | None => self.kill(target)?,
            }
        }

        pool.retain(Target::is_active);
        if !pool.is_empty() {
            self.targets.insert(class, pool);
        }
        Ok(())
    }

    fn kill(&mut self, target: &mut Target) -> Result<()> {
        if !target.weak {
            return Err(EngineError::EntityNotFound {
                class: self.class_name(target.class),
                id: target.id.clone(),
            });
        }
        debug!(class = %self.class_name(target.class), id = %target.id, "entity not found, clearing id");
        if let Some(record) = self.entities.get_mut(target.entity.0) {
            record.id = None;
        }
        target.unresolved.clear();
        Ok(())
    }

    fn merge_spawned(&mut self) {
        for target in mem::take(&mut self.spawned) {
            if target.is_active() {
                self.targets.entry(target.class).or_default().push(target);
            }
        }
    }

    fn resolve_and_cache(&mut self, target: &mut Target, name: &str, value: FieldValue<EntityHandle>) {
        self.cache_value(target, name, &value);
        resolve(&mut self.entities, target, name, value);
    }

    /// Records scalar values and referenced entity ids for later targets of the same id.
    fn cache_value(&mut self, target: &Target, name: &str, value: &FieldValue<EntityHandle>) {
        let schema = self.schema();
        let Some(field) = schema.field(target.class, name) else {
            return;
        };
        let cached = match &field.kind {
            FieldKind::Scalar(data_type) => {
                if let FieldValue::Scalar(scalar) = value {
                    check_data_type(schema, target.class, name, data_type, scalar);
                }
                if target.selector.subselector(name).is_some_and(|nested| !nested.is_empty()) {
                    return;
                }
                value.map_entities(|_| String::new())
            }
            _ => {
                let entities = &self.entities;
                match value.try_map_entities(|handle| entities.get(handle.0).and_then(|record| record.id.clone()).ok_or(())) {
                    Ok(ids) => ids,
                    Err(()) => return,
                }
            }
        };
        self.value_cache
            .entry((target.class, target.id.clone()))
            .or_default()
            .insert(name.to_string(), cached);
    }

    /// Serves unresolved fields with an empty nested selector from the value cache.
    ///
    /// Entity fields requested with a nested selector are left to the getters: serving
    /// them would need new targets for the referenced entities.
    fn resolve_fields_from_cache(&mut self) {
        let schema = self.schema();
        let Self {
            targets,
            value_cache,
            entities,
            stats,
            ..
        } = self;

        for (class, pool) in targets.iter_mut() {
            for target in pool.iter_mut() {
                let Some(cached) = value_cache.get(&(*class, target.id.clone())) else {
                    continue;
                };
                let hits: Vec<String> = target
                    .unresolved
                    .iter()
                    .filter(|name| cached.contains_key(name.as_str()))
                    .filter(|name| target.selector.subselector(name).is_none_or(Selector::is_empty))
                    .cloned()
                    .collect();
                for name in hits {
                    let (Some(field), Some(value)) = (schema.field(*class, &name), cached.get(&name)) else {
                        continue;
                    };
                    let referenced = field.kind.referenced_class().unwrap_or(*class);
                    let value = value.map_entities(|id| push_entity(entities, referenced, Some(id.clone()), FieldValues::new()));
                    debug!(class = %schema.class(*class), id = %target.id, field = %name, "served from cache");
                    resolve(entities, target, &name, value);
                    stats.cache_hits += 1;
                }
            }
            pool.retain(Target::is_active);
        }
        targets.retain(|_, pool| !pool.is_empty());
    }

    fn class_name(&self, class: EntityClassId) -> String {
        self.schema().class(class).name.clone()
    }
}

fn push_entity(entities: &mut Vec<EntityRecord>, class: EntityClassId, id: Option<String>, values: FieldValues) -> EntityHandle {
    entities.push(EntityRecord { class, id, values });
    EntityHandle(entities.len() - 1)
}

fn resolve(entities: &mut [EntityRecord], target: &mut Target, name: &str, value: FieldValue<EntityHandle>) {
    if let Some(record) = entities.get_mut(target.entity.0) {
        record.values.insert(name.to_string(), value);
    }
    target.unresolved.shift_remove(name);
    target.weak = false;
}

fn check_data_type(schema: &Schema, class: EntityClassId, name: &str, data_type: &DataType, scalar: &Scalar) {
    if data_type.check(scalar) {
        return;
    }
    if scalar.is_null() {
        debug!(class = %schema.class(class), field = name, "null value for non-optional field");
    } else {
        warn!(class = %schema.class(class), field = name, value = ?scalar, expected = ?data_type, "value does not match declared data type");
    }
}
