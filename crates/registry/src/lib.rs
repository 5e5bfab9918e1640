//! Catalog of the USOS API: entity classes and the methods that fetch them.
//!
//! The catalog is built once per process and shared by every session.

pub mod entities;
pub mod methods;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tal_api::Transport;
use tal_engine::{Catalog, Result, Session};
use tracing::debug;

pub use tal_api::config::DEFAULT_BASE_URL;

static CATALOG: OnceCell<Arc<Catalog>> = OnceCell::new();

/// Builds a fresh catalog of every registered method.
pub fn build_catalog() -> Result<Catalog> {
    let schema = Arc::new(entities::schema()?);
    let mut builder = Catalog::builder(Arc::clone(&schema));
    methods::register(&mut builder, &schema)?;
    let catalog = builder.build();
    debug!(catalog = ?catalog, "built USOS catalog");
    Ok(catalog)
}

/// Process-wide catalog, built on first use.
pub fn catalog() -> Result<Arc<Catalog>> {
    CATALOG.get_or_try_init(|| build_catalog().map(Arc::new)).cloned()
}

/// Session over the shared catalog.
pub fn session(transport: Arc<dyn Transport>) -> Result<Session> {
    Ok(Session::new(catalog()?, transport))
}
