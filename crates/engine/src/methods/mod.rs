//! Generic fetch methods built from pickers and id codecs.

pub mod current;
pub mod get;
pub mod get_many;
pub mod id;
pub mod list;
pub mod picker;
pub mod search;

pub use current::CurrentUserMethod;
pub use get::GetMethod;
pub use get_many::GetManyMethod;
pub use id::{IdListSpec, IdSpec};
pub use list::{ListMethod, ListStep};
pub use picker::{EntityPickers, FieldPickers, NestedEntityPicker, NestedShape, Picker};
pub use search::{SearchFieldsMode, SearchMethod};

/// Request parameter carrying the API field selector.
pub(crate) const FIELDS_PARAM: &str = "fields";
