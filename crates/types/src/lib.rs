//! Entity metamodel shared by the resolution engine, the transport and the catalog.
//!
//! - [`schema`]: entity classes, field declarations and memoised default selectors
//! - [`selector`]: the field-selector grammar
//! - [`value`]: field values and resolved entity instances
//! - [`packid`]: composite id packing
//! - [`matchstring`]: highlighted search matches

pub mod matchstring;
pub mod packid;
pub mod schema;
pub mod selector;
pub mod value;

pub use matchstring::{Escape, MatchPart, MatchString};
pub use packid::{pack_id, unpack_id};
pub use schema::{DataType, EntityClass, EntityClassDecl, EntityClassId, Field, FieldDecl, FieldKind, MATCH_FIELD, Schema, SchemaBuilder, SchemaError};
pub use selector::{Selector, SelectorError, SubSelector, parse, parse_basic, stringify};
pub use value::{Coords, Entity, FieldValue, Scalar, ValueError};
