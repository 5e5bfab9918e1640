//! # Tal Engine
//!
//! Resolves entity graphs from a remote API that exposes partial, overlapping views of the
//! same entities. Callers ask for an entity together with a field selector; the engine
//! works out which remote methods to call, batches compatible requests, deduplicates
//! fields it has already fetched during the run and assembles the result tree.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tal_api::ScriptedTransport;
//! use tal_engine::{
//!     Catalog, Session,
//!     methods::{FieldPickers, GetMethod, IdSpec, Picker},
//! };
//! use tal_types::{DataType, EntityClassDecl, FieldDecl, Schema};
//!
//! let schema = Arc::new(
//!     Schema::builder()
//!         .class(EntityClassDecl::new("Term").field(FieldDecl::scalar("name", DataType::String).default()))
//!         .build()?,
//! );
//! let term = schema.class_id("Term")?;
//! let mut catalog = Catalog::builder(schema);
//! catalog.register_getter(
//!     GetMethod::new("services/terms/term", term, IdSpec::elementary("term_id"), FieldPickers::new().with("name", Picker::simple("name")))
//!         .without_fields_param(),
//! )?;
//!
//! let transport = Arc::new(ScriptedTransport::new());
//! transport.expect("services/terms/term", [("term_id", "2024Z")], json!({"name": "Winter 2024"}));
//!
//! let session = Session::new(Arc::new(catalog.build()), transport);
//! let entity = session.get("Term", "2024Z", None)?;
//! assert_eq!(entity.get("name")?.as_str(), Some("Winter 2024"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`selector`**: field-selector grammar (re-exported from `tal-types`)
//! - **`method`**: the contract between the reactor and fetch methods
//! - **`methods`**: get / get-many / list / search methods built from pickers
//! - **`catalog`**: fetch methods registered per entity class
//! - **`reactor`**: round-based scheduler with a per-run value cache
//! - **`session`**: one resolution run per call

pub mod catalog;
pub mod error;
pub mod lang;
pub mod method;
pub mod methods;
pub mod reactor;
pub mod session;

pub use tal_types::selector;

pub use catalog::{Catalog, CatalogBuilder};
pub use error::{EngineError, Result};
pub use lang::Lang;
pub use method::{Candidacy, FetchMethod, FetchOutcome, FetchResults};
pub use reactor::{EntityHandle, FieldValues, Reactor, RunStats, Target};
pub use session::{SearchResult, Session};
