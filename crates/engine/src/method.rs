//! Contract between the reactor and the fetch methods of a catalog.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use tal_types::{EntityClassId, Schema, Selector};

use crate::{
    error::Result,
    reactor::{FieldValues, Reactor, Target},
};

/// Per-id result of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(FieldValues),
    /// The remote entity does not exist.
    Absent,
}

/// Fetch results keyed by entity id.
pub type FetchResults = IndexMap<String, FetchOutcome>;

/// A fetch operation able to supply some fields of one entity class.
pub trait FetchMethod: fmt::Debug + Send + Sync {
    /// Name used in logs and errors, usually the API path.
    fn name(&self) -> &str;

    fn entity_class(&self) -> EntityClassId;

    fn field_names_supplied(&self) -> &IndexSet<String>;

    /// Picks the pending targets this method would serve together, or `None` when it
    /// supplies none of their unresolved fields.
    fn make_candidacy(&self, targets: &[Target]) -> Option<Candidacy<'_>>;

    /// Performs the fetch for a candidacy this method produced.
    fn execute(&self, candidacy: &Candidacy<'_>, reactor: &mut Reactor<'_>) -> Result<FetchResults>;

    /// Checks the method against the schema at registration time.
    fn validate(&self, _schema: &Schema) -> Result<()> {
        Ok(())
    }
}

/// A method's proposal for one round: which targets, which fields, at what score.
pub struct Candidacy<'m> {
    method: &'m dyn FetchMethod,
    targets: Vec<usize>,
    ids: Vec<String>,
    selector: Selector,
    score: usize,
}

impl<'m> Candidacy<'m> {
    /// `targets` are indices into the slice given to [`FetchMethod::make_candidacy`].
    pub fn new(method: &'m dyn FetchMethod, targets: Vec<usize>, ids: Vec<String>, selector: Selector, score: usize) -> Self {
        Self {
            method,
            targets,
            ids,
            selector,
            score,
        }
    }

    pub fn method(&self) -> &'m dyn FetchMethod {
        self.method
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Fields served for every target.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn execute(&self, reactor: &mut Reactor<'_>) -> Result<FetchResults> {
        self.method.execute(self, reactor)
    }
}

impl fmt::Debug for Candidacy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidacy")
            .field("method", &self.method.name())
            .field("ids", &self.ids)
            .field("selector", &self.selector.to_string())
            .field("score", &self.score)
            .finish()
    }
}
