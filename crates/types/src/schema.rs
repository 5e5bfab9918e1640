//! Entity/field metamodel.
//!
//! A [`Schema`] is assembled in two passes. [`SchemaBuilder`] first collects every
//! [`EntityClassDecl`] with its fields, where references to other classes are plain
//! names so that self-referential and mutually recursive classes can be declared in
//! any order. [`SchemaBuilder::build`] then resolves those names into
//! [`EntityClassId`] handles, adds the companion search-item class of every
//! searchable class and computes each class's default [`Selector`] once.

use std::{collections::HashMap, fmt};

use heck::ToSnakeCase;
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::{selector::Selector, value::Scalar};

/// Name of the highlighted-match field on search-item classes.
pub const MATCH_FIELD: &str = "match";

/// Errors raised while declaring or querying a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field '{field}' is already bound to entity class '{class}'")]
    DuplicateFieldBinding { class: String, field: String },

    #[error("entity class '{name}' is declared more than once")]
    DuplicateEntityClass { name: String },

    #[error("field '{class}.{field}' references unknown entity class '{target}'")]
    UnknownEntityReference { class: String, field: String, target: String },

    #[error("default fields of entity class '{class}' expand without end")]
    DefaultSelectorCycle { class: String },

    #[error("unknown entity class '{name}'")]
    UnknownEntityClass { name: String },
}

/// Handle of an entity class inside its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityClassId(u32);

impl EntityClassId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Declared data type of a scalar field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    String,
    Int,
    Bool,
    Decimal,
    Date,
    DateTime,
    Url,
    Email,
    PhoneNumber,
    Coords,
    MatchString,
    Enum(Vec<String>),
    /// Enumeration that tolerates members unknown at declaration time.
    OpenEnum(Vec<String>),
    List(Box<DataType>),
    Optional(Box<DataType>),
}

impl DataType {
    pub fn list(item: DataType) -> Self {
        Self::List(Box::new(item))
    }

    pub fn optional(item: DataType) -> Self {
        Self::Optional(Box::new(item))
    }

    pub fn enumeration<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(members.into_iter().map(Into::into).collect())
    }

    pub fn open_enumeration<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OpenEnum(members.into_iter().map(Into::into).collect())
    }

    /// Checks whether a resolved scalar conforms to this type.
    pub fn check(&self, value: &Scalar) -> bool {
        match (self, value) {
            (Self::Optional(_), Scalar::Null) => true,
            (Self::Optional(inner), other) => inner.check(other),
            (Self::List(inner), Scalar::List(items)) => items.iter().all(|item| inner.check(item)),
            (Self::Enum(members), Scalar::String(text)) => members.iter().any(|member| member == text),
            (Self::OpenEnum(_), Scalar::String(_)) => true,
            (Self::String | Self::Url | Self::Email | Self::PhoneNumber, Scalar::String(_)) => true,
            (Self::Int, Scalar::Int(_)) => true,
            (Self::Bool, Scalar::Bool(_)) => true,
            (Self::Decimal, Scalar::Decimal(_) | Scalar::Int(_)) => true,
            (Self::Date, Scalar::Date(_)) => true,
            (Self::DateTime, Scalar::DateTime(_)) => true,
            (Self::Coords, Scalar::Coords(_)) => true,
            (Self::MatchString, Scalar::Match(_)) => true,
            _ => false,
        }
    }
}

/// Field kind as written in a declaration, with class references by name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeclaredKind {
    Scalar(DataType),
    Entity(String),
    OptionalEntity(String),
    EntityList(String),
    EntityMap(String),
}

/// Resolved kind of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(DataType),
    Entity(EntityClassId),
    OptionalEntity(EntityClassId),
    EntityList(EntityClassId),
    EntityMap(EntityClassId),
}

impl FieldKind {
    /// Class referenced by an entity-valued field.
    pub fn referenced_class(&self) -> Option<EntityClassId> {
        match self {
            Self::Scalar(_) => None,
            Self::Entity(class) | Self::OptionalEntity(class) | Self::EntityList(class) | Self::EntityMap(class) => Some(*class),
        }
    }

    pub fn is_entity(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }
}

/// Declaration of a single field, consumed by [`EntityClassDecl::field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    name: String,
    kind: DeclaredKind,
    default: bool,
    variant: bool,
}

impl FieldDecl {
    fn new(name: impl Into<String>, kind: DeclaredKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: false,
            variant: false,
        }
    }

    pub fn scalar(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, DeclaredKind::Scalar(data_type))
    }

    pub fn entity(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::Entity(class.into()))
    }

    pub fn optional_entity(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::OptionalEntity(class.into()))
    }

    pub fn entity_list(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::EntityList(class.into()))
    }

    pub fn entity_map(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self::new(name, DeclaredKind::EntityMap(class.into()))
    }

    /// Include the field when no selector is given.
    pub fn default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Allow the field to be absent from some responses.
    pub fn variant(mut self) -> Self {
        self.variant = true;
        self
    }
}

/// Declaration of an entity class, consumed by [`SchemaBuilder::class`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityClassDecl {
    name: String,
    searchable: bool,
    fields: Vec<FieldDecl>,
}

impl EntityClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            searchable: false,
            fields: Vec::new(),
        }
    }

    /// Declare a companion search-item class for this class.
    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}

/// A resolved field of an entity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub owner: EntityClassId,
    pub kind: FieldKind,
    pub default: bool,
    pub variant: bool,
}

/// A resolved entity class.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityClass {
    pub id: EntityClassId,
    pub name: String,
    fields: IndexMap<String, Field>,
    search_item: Option<EntityClassId>,
    /// Set on companion search-item classes: the field holding the found entity.
    entity_field: Option<String>,
    default_selector: Selector,
}

impl EntityClass {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn is_searchable(&self) -> bool {
        self.search_item.is_some()
    }

    /// Companion class wrapping search results for this class.
    pub fn search_item_class(&self) -> Option<EntityClassId> {
        self.search_item
    }

    /// Name of the field holding the found entity, on a search-item class.
    pub fn search_entity_field(&self) -> Option<&str> {
        self.entity_field.as_deref()
    }

    /// Names of the fields flagged as default.
    pub fn default_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.values().filter(|field| field.default).map(|field| field.name.as_str())
    }

    /// Memoised selector built from the default fields, recursively.
    pub fn default_selector(&self) -> &Selector {
        &self.default_selector
    }
}

/// Registry of entity classes.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    classes: Vec<EntityClass>,
    by_name: HashMap<String, EntityClassId>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn class(&self, id: EntityClassId) -> &EntityClass {
        &self.classes[id.index()]
    }

    pub fn class_id(&self, name: &str) -> Result<EntityClassId, SchemaError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownEntityClass { name: name.to_string() })
    }

    pub fn class_by_name(&self, name: &str) -> Result<&EntityClass, SchemaError> {
        self.class_id(name).map(|id| self.class(id))
    }

    pub fn field(&self, class: EntityClassId, name: &str) -> Option<&Field> {
        self.class(class).field(name)
    }

    pub fn default_selector(&self, class: EntityClassId) -> &Selector {
        self.class(class).default_selector()
    }

    /// Selector a field takes when requested without brackets.
    pub fn default_subselector(&self, field: &Field) -> Selector {
        match field.kind.referenced_class() {
            Some(class) => self.default_selector(class).clone(),
            None => Selector::new(),
        }
    }

    /// All classes in declaration order, companion classes last.
    pub fn classes(&self) -> impl Iterator<Item = &EntityClass> {
        self.classes.iter()
    }
}

/// First pass of schema construction.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    classes: Vec<EntityClassDecl>,
}

impl SchemaBuilder {
    pub fn class(mut self, class: EntityClassDecl) -> Self {
        self.classes.push(class);
        self
    }

    /// Second pass: resolve references, add search-item classes, memoise defaults.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut declarations = self.classes;

        let searchable: Vec<String> = declarations
            .iter()
            .filter(|class| class.searchable)
            .map(|class| class.name.clone())
            .collect();
        for name in &searchable {
            declarations.push(
                EntityClassDecl::new(search_item_class_name(name))
                    .field(FieldDecl::entity(name.to_snake_case(), name.clone()))
                    .field(FieldDecl::scalar(MATCH_FIELD, DataType::MatchString)),
            );
        }

        let mut by_name = HashMap::new();
        for (index, class) in declarations.iter().enumerate() {
            let id = EntityClassId(index as u32);
            if by_name.insert(class.name.clone(), id).is_some() {
                return Err(SchemaError::DuplicateEntityClass { name: class.name.clone() });
            }
        }

        let mut classes = Vec::with_capacity(declarations.len());
        for (index, declaration) in declarations.iter().enumerate() {
            let id = EntityClassId(index as u32);
            let mut fields = IndexMap::new();
            for field in &declaration.fields {
                let kind = resolve_kind(&by_name, declaration, field)?;
                let resolved = Field {
                    name: field.name.clone(),
                    owner: id,
                    kind,
                    default: field.default,
                    variant: field.variant,
                };
                if fields.insert(field.name.clone(), resolved).is_some() {
                    return Err(SchemaError::DuplicateFieldBinding {
                        class: declaration.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            let search_item = declaration
                .searchable
                .then(|| by_name[&search_item_class_name(&declaration.name)]);
            let entity_field = searchable
                .iter()
                .find(|name| search_item_class_name(name) == declaration.name)
                .map(|name| name.to_snake_case());
            classes.push(EntityClass {
                id,
                name: declaration.name.clone(),
                fields,
                search_item,
                entity_field,
                default_selector: Selector::new(),
            });
        }

        let mut schema = Schema { classes, by_name };
        let defaults = DefaultSelectors::compute(&schema)?;
        for (class, selector) in schema.classes.iter_mut().zip(defaults) {
            class.default_selector = selector;
        }
        Ok(schema)
    }
}

fn search_item_class_name(class_name: &str) -> String {
    format!("{class_name}SearchItem")
}

fn resolve_kind(by_name: &HashMap<String, EntityClassId>, class: &EntityClassDecl, field: &FieldDecl) -> Result<FieldKind, SchemaError> {
    let lookup = |target: &str| {
        by_name.get(target).copied().ok_or_else(|| SchemaError::UnknownEntityReference {
            class: class.name.clone(),
            field: field.name.clone(),
            target: target.to_string(),
        })
    };
    Ok(match &field.kind {
        DeclaredKind::Scalar(data_type) => FieldKind::Scalar(data_type.clone()),
        DeclaredKind::Entity(target) => FieldKind::Entity(lookup(target)?),
        DeclaredKind::OptionalEntity(target) => FieldKind::OptionalEntity(lookup(target)?),
        DeclaredKind::EntityList(target) => FieldKind::EntityList(lookup(target)?),
        DeclaredKind::EntityMap(target) => FieldKind::EntityMap(lookup(target)?),
    })
}

/// Depth-first memoised computation of default selectors.
struct DefaultSelectors<'a> {
    schema: &'a Schema,
    done: Vec<Option<Selector>>,
    in_progress: Vec<bool>,
}

impl<'a> DefaultSelectors<'a> {
    fn compute(schema: &'a Schema) -> Result<Vec<Selector>, SchemaError> {
        let mut state = Self {
            schema,
            done: vec![None; schema.classes.len()],
            in_progress: vec![false; schema.classes.len()],
        };
        for class in &schema.classes {
            state.visit(class.id)?;
        }
        Ok(state.done.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn visit(&mut self, class: EntityClassId) -> Result<Selector, SchemaError> {
        if let Some(selector) = &self.done[class.index()] {
            return Ok(selector.clone());
        }
        if self.in_progress[class.index()] {
            return Err(SchemaError::DefaultSelectorCycle {
                class: self.schema.class(class).name.clone(),
            });
        }
        self.in_progress[class.index()] = true;

        let mut selector = Selector::new();
        for field in self.schema.class(class).fields().filter(|field| field.default) {
            let nested = match field.kind.referenced_class() {
                Some(target) => self.visit(target)?,
                None => Selector::new(),
            };
            selector.insert(field.name.clone(), nested);
        }

        self.in_progress[class.index()] = false;
        self.done[class.index()] = Some(selector.clone());
        Ok(selector)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campus_schema() -> Schema {
        Schema::builder()
            .class(
                EntityClassDecl::new("Building")
                    .field(FieldDecl::scalar("name", DataType::String).default())
                    .field(FieldDecl::scalar("location", DataType::optional(DataType::Coords))),
            )
            .class(
                EntityClassDecl::new("Room")
                    .field(FieldDecl::scalar("number", DataType::String).default())
                    .field(FieldDecl::entity("building", "Building").default()),
            )
            .class(
                EntityClassDecl::new("Faculty")
                    .searchable()
                    .field(FieldDecl::scalar("name", DataType::String).default())
                    .field(FieldDecl::optional_entity("parent", "Faculty")),
            )
            .build()
            .expect("schema builds")
    }

    #[test]
    fn default_selector_follows_referenced_defaults() {
        let schema = campus_schema();
        let room = schema.class_id("Room").unwrap();
        let selector = schema.default_selector(room);
        assert_eq!(selector.field_names().collect::<Vec<_>>(), vec!["number", "building"]);
        assert_eq!(
            selector.subselector("building").unwrap().field_names().collect::<Vec<_>>(),
            vec!["name"]
        );
    }

    #[test]
    fn self_reference_resolves_to_own_class() {
        let schema = campus_schema();
        let faculty = schema.class_id("Faculty").unwrap();
        let parent = schema.field(faculty, "parent").unwrap();
        assert_eq!(parent.kind, FieldKind::OptionalEntity(faculty));
        assert_eq!(parent.owner, faculty);
    }

    #[test]
    fn searchable_class_gets_companion() {
        let schema = campus_schema();
        let faculty = schema.class_by_name("Faculty").unwrap();
        let item = schema.class(faculty.search_item_class().unwrap());
        assert_eq!(item.name, "FacultySearchItem");
        assert_eq!(item.search_entity_field(), Some("faculty"));
        assert_eq!(item.field("faculty").unwrap().kind, FieldKind::Entity(faculty.id));
        assert!(item.field(MATCH_FIELD).is_some());
    }

    #[test]
    fn companion_field_name_is_snake_case() {
        let schema = Schema::builder()
            .class(EntityClassDecl::new("CourseTestNode").searchable())
            .build()
            .unwrap();
        let item = schema.class_by_name("CourseTestNodeSearchItem").unwrap();
        assert_eq!(item.search_entity_field(), Some("course_test_node"));
    }

    #[test]
    fn rebinding_a_field_name_is_rejected() {
        let result = Schema::builder()
            .class(
                EntityClassDecl::new("Term")
                    .field(FieldDecl::scalar("name", DataType::String))
                    .field(FieldDecl::scalar("name", DataType::String)),
            )
            .build();
        assert_eq!(
            result.unwrap_err(),
            SchemaError::DuplicateFieldBinding {
                class: "Term".into(),
                field: "name".into()
            }
        );
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let result = Schema::builder()
            .class(EntityClassDecl::new("Room").field(FieldDecl::entity("building", "Building")))
            .build();
        assert!(matches!(result, Err(SchemaError::UnknownEntityReference { .. })));
    }

    #[test]
    fn duplicate_class_is_rejected() {
        let result = Schema::builder()
            .class(EntityClassDecl::new("Term"))
            .class(EntityClassDecl::new("Term"))
            .build();
        assert_eq!(result.unwrap_err(), SchemaError::DuplicateEntityClass { name: "Term".into() });
    }

    #[test]
    fn default_cycle_is_rejected() {
        let result = Schema::builder()
            .class(EntityClassDecl::new("Node").field(FieldDecl::entity("parent", "Node").default()))
            .build();
        assert_eq!(result.unwrap_err(), SchemaError::DefaultSelectorCycle { class: "Node".into() });
    }

    #[test]
    fn data_type_checks_nested_shapes() {
        let phones = DataType::list(DataType::PhoneNumber);
        assert!(phones.check(&Scalar::List(vec![Scalar::String("+48 22".into())])));
        assert!(!phones.check(&Scalar::String("+48 22".into())));

        let sex = DataType::enumeration(["male", "female"]);
        assert!(sex.check(&Scalar::String("female".into())));
        assert!(!sex.check(&Scalar::String("other".into())));

        assert!(DataType::optional(DataType::Int).check(&Scalar::Null));
    }
}
