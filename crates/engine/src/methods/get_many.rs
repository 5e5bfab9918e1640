use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tal_api::Params;
use tal_types::{EntityClassId, FieldKind, FieldValue, Scalar, Schema, Selector, stringify};

use super::{
    FIELDS_PARAM,
    id::{IdListSpec, IdSpec},
    picker::{EntityPickers, FieldPickers},
};
use crate::{
    error::{EngineError, Result},
    method::{Candidacy, FetchMethod, FetchOutcome, FetchResults},
    reactor::{FieldValues, Reactor, Target},
};

/// How a batch response carries its entities.
#[derive(Debug, Clone, PartialEq)]
enum BatchLayout {
    /// An object keyed by id; a null or missing entry means the entity does not exist.
    Keyed,
    /// A list of records carrying their own id. Requested ids without a record get
    /// null values.
    Listed(IdSpec),
}

/// Fetches a batch of entities requested with the same selector in one call.
#[derive(Debug, Clone)]
pub struct GetManyMethod {
    path: String,
    class: EntityClassId,
    ids: IdListSpec,
    pickers: FieldPickers,
    field_names: IndexSet<String>,
    layout: BatchLayout,
    has_fields_param: bool,
    limit: Option<usize>,
}

impl GetManyMethod {
    pub fn new(path: impl Into<String>, class: EntityClassId, ids: IdListSpec, pickers: FieldPickers) -> Self {
        let field_names = pickers.names().map(str::to_string).collect();
        Self {
            path: path.into(),
            class,
            ids,
            pickers,
            field_names,
            layout: BatchLayout::Keyed,
            has_fields_param: true,
            limit: None,
        }
    }

    /// A batch method answering with a list of records, each identified by `pickers`'s id.
    pub fn listed(path: impl Into<String>, class: EntityClassId, ids: IdListSpec, pickers: EntityPickers) -> Self {
        let id = pickers.id().clone();
        Self {
            layout: BatchLayout::Listed(id),
            ..Self::new(path, class, ids, pickers.into_fields())
        }
    }

    /// Maximum number of ids per call.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn without_fields_param(mut self) -> Self {
        self.has_fields_param = false;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn params(&self, ids: &[String], selector: &Selector) -> Result<Params> {
        let mut params = Params::new();
        self.ids.update_params(&mut params, ids)?;
        if self.has_fields_param {
            let mut api = Selector::new();
            self.pickers.update_api_selector(&mut api, selector);
            if let BatchLayout::Listed(id) = &self.layout {
                id.update_api_selector(&mut api);
            }
            params.insert(FIELDS_PARAM.to_string(), stringify(&api));
        }
        Ok(params)
    }
}

impl FetchMethod for GetManyMethod {
    fn name(&self) -> &str {
        &self.path
    }

    fn entity_class(&self) -> EntityClassId {
        self.class
    }

    fn field_names_supplied(&self) -> &IndexSet<String> {
        &self.field_names
    }

    /// Targets with the same selector and unresolved fields as the first servable one.
    fn make_candidacy(&self, targets: &[Target]) -> Option<Candidacy<'_>> {
        let mut chosen: Vec<usize> = Vec::new();
        let mut common: Vec<&str> = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            let names: Vec<&str> = target.unresolved().filter(|name| self.field_names.contains(*name)).collect();
            if names.is_empty() {
                continue;
            }
            match chosen.first() {
                Some(&first) if !target.has_same_field_selector(&targets[first]) => continue,
                Some(_) => {}
                None => common = names,
            }
            chosen.push(index);
            if self.limit.is_some_and(|limit| chosen.len() >= limit) {
                break;
            }
        }

        let first = targets.get(*chosen.first()?)?;
        let score = chosen.len() * common.len();
        let selector = first.field_selector(common);
        let mut ids: Vec<String> = Vec::with_capacity(chosen.len());
        for &index in &chosen {
            let id = targets[index].id();
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        Some(Candidacy::new(self, chosen, ids, selector, score))
    }

    fn execute(&self, candidacy: &Candidacy<'_>, reactor: &mut Reactor<'_>) -> Result<FetchResults> {
        let params = self.params(candidacy.ids(), candidacy.selector())?;
        let response = reactor.call_method(&self.path, &params)?;
        if let BatchLayout::Listed(id) = &self.layout {
            return self.load_listed(reactor, id, candidacy, &response);
        }
        let Value::Object(entries) = &response else {
            return Err(EngineError::malformed(&self.path, "batch response should be an object keyed by id"));
        };

        let mut results = FetchResults::new();
        for id in candidacy.ids() {
            let outcome = match entries.get(&self.ids.key(id)?) {
                None | Some(Value::Null) => FetchOutcome::Absent,
                Some(entry) => {
                    FetchOutcome::Found(self.pickers.load_values(reactor, &self.path, self.class, entry, candidacy.selector())?)
                }
            };
            results.insert(id.clone(), outcome);
        }
        Ok(results)
    }

    fn validate(&self, schema: &Schema) -> Result<()> {
        self.pickers.validate(schema, self.class, &self.path)
    }
}

impl GetManyMethod {
    fn load_listed(&self, reactor: &mut Reactor<'_>, id: &IdSpec, candidacy: &Candidacy<'_>, response: &Value) -> Result<FetchResults> {
        let records = match response {
            Value::Null => &[][..],
            Value::Array(records) => records.as_slice(),
            _ => return Err(EngineError::malformed(&self.path, "batch response should be a list of records")),
        };

        let mut found: IndexMap<String, FieldValues> = IndexMap::new();
        for record in records.iter().filter(|record| !record.is_null()) {
            let Some(record_id) = id.load(&self.path, record)? else {
                continue;
            };
            if found.contains_key(&record_id) || !candidacy.ids().contains(&record_id) {
                continue;
            }
            let values = self.pickers.load_values(reactor, &self.path, self.class, record, candidacy.selector())?;
            found.insert(record_id, values);
        }

        let schema = reactor.schema();
        Ok(candidacy
            .ids()
            .iter()
            .map(|requested| {
                let values = found
                    .shift_remove(requested)
                    .unwrap_or_else(|| null_values(schema, self.class, candidacy.selector()));
                (requested.clone(), FetchOutcome::Found(values))
            })
            .collect())
    }
}

/// Values of an entity that exists but has no record in a listed response.
fn null_values(schema: &Schema, class: EntityClassId, selector: &Selector) -> FieldValues {
    selector
        .field_names()
        .filter_map(|name| schema.field(class, name))
        .map(|field| {
            let value = match field.kind {
                FieldKind::Scalar(_) => FieldValue::Scalar(Scalar::Null),
                FieldKind::OptionalEntity(_) => FieldValue::OptionalEntity(None),
                FieldKind::EntityList(_) => FieldValue::EntityList(Vec::new()),
                FieldKind::EntityMap(_) => FieldValue::EntityMap(IndexMap::new()),
                FieldKind::Entity(_) => FieldValue::Missing,
            };
            (field.name.clone(), value)
        })
        .collect()
}
