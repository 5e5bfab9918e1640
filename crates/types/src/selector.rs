//! Field selector: a tree of requested fields.
//!
//! The textual grammar is the wire format of the remote API's `fields` parameter:
//!
//! ```text
//! selector := field ('|' field)* | '*'
//! field    := name ['*'] ['[' selector ']']
//! ```
//!
//! A trailing `*` on a field makes it recursive. Recursion is stored as an explicit
//! [`SubSelector::Recursive`] marker inside the field's nested selector, meaning "the
//! nested selector of this key is the selector containing it".

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::schema::{EntityClass, EntityClassId, Schema};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field selector '{text}': {reason}")]
pub struct SelectorError {
    pub text: String,
    pub reason: String,
}

impl SelectorError {
    fn new(text: &str, reason: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

/// Nested selector of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubSelector {
    Nested(Selector),
    /// The nested selector is the enclosing selector itself.
    Recursive,
}

/// Ordered mapping of field name to nested selector.
///
/// Equality ignores field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    fields: IndexMap<String, SubSelector>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, nested: Selector) {
        self.fields.insert(name.into(), SubSelector::Nested(nested));
    }

    pub fn insert_recursive(&mut self, name: impl Into<String>) {
        self.fields.insert(name.into(), SubSelector::Recursive);
    }

    /// Removes a field and returns its nested selector; a recursive entry yields an empty one.
    pub fn remove(&mut self, name: &str) -> Option<Selector> {
        match self.fields.shift_remove(name)? {
            SubSelector::Nested(nested) => Some(nested),
            SubSelector::Recursive => Some(Selector::new()),
        }
    }

    pub fn with(mut self, name: impl Into<String>, nested: Selector) -> Self {
        self.insert(name, nested);
        self
    }

    pub fn with_field(self, name: impl Into<String>) -> Self {
        self.with(name, Selector::new())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Raw entries, recursion markers included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &SubSelector)> {
        self.fields.iter().map(|(name, sub)| (name.as_str(), sub))
    }

    /// Entries with recursion markers resolved to `self`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selector)> {
        self.fields.iter().map(move |(name, sub)| {
            let nested = match sub {
                SubSelector::Nested(nested) => nested,
                SubSelector::Recursive => self,
            };
            (name.as_str(), nested)
        })
    }

    pub fn subselector(&self, name: &str) -> Option<&Selector> {
        match self.fields.get(name)? {
            SubSelector::Nested(nested) => Some(nested),
            SubSelector::Recursive => Some(self),
        }
    }

    pub fn is_recursive(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(SubSelector::Recursive))
    }

    /// Restricts the selector to `names`, keeping recursive entries pointing at the full selector.
    pub fn project<'n, I>(&self, names: I) -> Selector
    where
        I: IntoIterator<Item = &'n str>,
    {
        let mut projected = Selector::new();
        for name in names {
            if let Some(sub) = self.fields.get(name) {
                projected.fields.insert(name.to_string(), sub.clone());
            }
        }
        if projected.len() == self.len() {
            return projected;
        }
        for sub in projected.fields.values_mut() {
            if matches!(sub, SubSelector::Recursive) {
                *sub = SubSelector::Nested(self.clone());
            }
        }
        projected
    }

    /// Non-recursive expansion: recursion markers are dropped at every level.
    pub fn unrolled(&self) -> Selector {
        let fields = self
            .fields
            .iter()
            .filter_map(|(name, sub)| match sub {
                SubSelector::Nested(nested) => Some((name.clone(), SubSelector::Nested(nested.unrolled()))),
                SubSelector::Recursive => None,
            })
            .collect();
        Selector { fields }
    }

    /// Union of two selectors; nested selectors of shared keys are merged.
    pub fn merge(&mut self, other: &Selector) {
        for (name, sub) in &other.fields {
            match (self.fields.get_mut(name), sub) {
                (Some(SubSelector::Nested(mine)), SubSelector::Nested(theirs)) => mine.merge(theirs),
                (Some(_), _) => {}
                (None, sub) => {
                    self.fields.insert(name.clone(), sub.clone());
                }
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stringify(self))
    }
}

/// Renders the selector in the bracket/pipe grammar, omitting recursive entries.
pub fn stringify(selector: &Selector) -> String {
    let mut parts = Vec::with_capacity(selector.len());
    for (name, sub) in selector.entries() {
        let SubSelector::Nested(nested) = sub else {
            continue;
        };
        let inner = stringify(nested);
        if inner.is_empty() {
            parts.push(name.to_string());
        } else {
            parts.push(format!("{name}[{inner}]"));
        }
    }
    parts.join("|")
}

/// Parses selector text against `class`, expanding defaults and wildcards.
pub fn parse(text: &str, schema: &Schema, class: EntityClassId) -> Result<Selector, SelectorError> {
    let mut parser = Parser::new(text)?;
    let selector = parser.selector(schema, schema.class(class))?;
    parser.expect_end()?;
    Ok(selector)
}

/// Parses selector text without a schema: no defaults, no wildcards, no recursion.
pub fn parse_basic(text: &str) -> Result<Selector, SelectorError> {
    let mut parser = Parser::new(text)?;
    let selector = parser.basic_selector()?;
    parser.expect_end()?;
    Ok(selector)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Pipe,
    Star,
    Name(String),
    End,
}

fn tokenize(text: &str) -> Result<Vec<Token>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let token = match c {
            '[' => Token::Open,
            ']' => Token::Close,
            '|' => Token::Pipe,
            '*' => Token::Star,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some(&(index, next)) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_') {
                        break;
                    }
                    end = index + next.len_utf8();
                    chars.next();
                }
                Token::Name(text[start..end].to_string())
            }
            other => return Err(SelectorError::new(text, format!("unexpected character '{other}'"))),
        };
        tokens.push(token);
    }
    tokens.push(Token::End);
    Ok(tokens)
}

struct Parser<'t> {
    text: &'t str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'t> Parser<'t> {
    fn new(text: &'t str) -> Result<Self, SelectorError> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            position: 0,
        })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::End)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError::new(self.text, reason)
    }

    fn expect_end(&self) -> Result<(), SelectorError> {
        match self.peek() {
            Token::End => Ok(()),
            token => Err(self.error(format!("unexpected {}", describe(token)))),
        }
    }

    fn expect_close(&mut self) -> Result<(), SelectorError> {
        match self.advance() {
            Token::Close => Ok(()),
            token => Err(self.error(format!("expected ']' but found {}", describe(&token)))),
        }
    }

    fn name(&mut self) -> Result<String, SelectorError> {
        match self.advance() {
            Token::Name(name) => Ok(name),
            token => Err(self.error(format!("expected a field name but found {}", describe(&token)))),
        }
    }

    fn selector(&mut self, schema: &Schema, class: &EntityClass) -> Result<Selector, SelectorError> {
        let mut selector = Selector::new();
        match self.peek() {
            Token::Name(_) => loop {
                let (name, nested) = self.field(schema, class)?;
                selector.insert(name, nested);
                if *self.peek() != Token::Pipe {
                    break;
                }
                self.advance();
            },
            Token::Star => {
                self.advance();
                for field in class.fields() {
                    selector.insert(field.name.clone(), schema.default_subselector(field));
                }
            }
            _ => {}
        }
        Ok(selector)
    }

    fn field(&mut self, schema: &Schema, class: &EntityClass) -> Result<(String, Selector), SelectorError> {
        let name = self.name()?;
        let field = class
            .field(&name)
            .ok_or_else(|| self.error(format!("entity class '{class}' has no field '{name}'")))?;

        let recursive = *self.peek() == Token::Star;
        if recursive {
            self.advance();
        }

        let mut nested = if *self.peek() == Token::Open {
            self.advance();
            let Some(referenced) = field.kind.referenced_class() else {
                return Err(self.error(format!("scalar field '{name}' cannot take sub-fields")));
            };
            if *self.peek() == Token::Close {
                return Err(self.error(format!("empty sub-field list after '{name}['")));
            }
            let nested = self.selector(schema, schema.class(referenced))?;
            self.expect_close()?;
            nested
        } else {
            schema.default_subselector(field)
        };

        if recursive {
            let referenced = field
                .kind
                .referenced_class()
                .ok_or_else(|| self.error(format!("scalar field '{name}' cannot be recursive")))?;
            if schema.field(referenced, &name).is_none() {
                return Err(self.error(format!(
                    "field '{name}' cannot be recursive: entity class '{}' has no field '{name}'",
                    schema.class(referenced)
                )));
            }
            nested.insert_recursive(name.clone());
        }

        Ok((name, nested))
    }

    fn basic_selector(&mut self) -> Result<Selector, SelectorError> {
        let mut selector = Selector::new();
        loop {
            let name = self.name()?;
            let nested = if *self.peek() == Token::Open {
                self.advance();
                let nested = self.basic_selector()?;
                self.expect_close()?;
                nested
            } else {
                Selector::new()
            };
            selector.insert(name, nested);
            if *self.peek() != Token::Pipe {
                return Ok(selector);
            }
            self.advance();
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Open => "'['".to_string(),
        Token::Close => "']'".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Name(name) => format!("'{name}'"),
        Token::End => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, EntityClassDecl, FieldDecl};

    fn schema() -> Schema {
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
                    .field(FieldDecl::scalar("name", DataType::String).default())
                    .field(FieldDecl::optional_entity("parent", "Faculty")),
            )
            .build()
            .unwrap()
    }

    fn class(schema: &Schema, name: &str) -> EntityClassId {
        schema.class_id(name).unwrap()
    }

    #[test]
    fn bare_entity_field_takes_defaults() {
        let schema = schema();
        let selector = parse("building", &schema, class(&schema, "Room")).unwrap();
        assert_eq!(selector, Selector::new().with("building", Selector::new().with_field("name")));
    }

    #[test]
    fn brackets_override_defaults() {
        let schema = schema();
        let selector = parse("number|building[location]", &schema, class(&schema, "Room")).unwrap();
        assert_eq!(stringify(&selector), "number|building[location]");
    }

    #[test]
    fn wildcard_expands_all_fields() {
        let schema = schema();
        let selector = parse("*", &schema, class(&schema, "Room")).unwrap();
        assert_eq!(selector, parse("number|building[name]", &schema, class(&schema, "Room")).unwrap());
    }

    #[test]
    fn nested_wildcard() {
        let schema = schema();
        let selector = parse("building[*]", &schema, class(&schema, "Room")).unwrap();
        assert_eq!(stringify(&selector), "building[name|location]");
    }

    #[test]
    fn empty_text_is_empty_selector() {
        let schema = schema();
        assert!(parse("", &schema, class(&schema, "Room")).unwrap().is_empty());
    }

    #[test]
    fn recursive_field_points_back_to_nested_selector() {
        let schema = schema();
        let selector = parse("parent*", &schema, class(&schema, "Faculty")).unwrap();
        let nested = selector.subselector("parent").unwrap();
        assert!(nested.is_recursive("parent"));
        assert!(nested.contains("name"));
        assert_eq!(nested.subselector("parent"), Some(nested));
        assert_eq!(stringify(&selector), "parent[name]");
        assert_eq!(selector.unrolled(), Selector::new().with("parent", Selector::new().with_field("name")));
    }

    #[test]
    fn rejects_malformed_text() {
        let schema = schema();
        let room = class(&schema, "Room");
        for text in ["number|", "building[name", "building]", "building[]", "number name", "num-ber", "|number", "*|number"] {
            assert!(parse(text, &schema, room).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn rejects_unknown_names_and_scalar_subfields() {
        let schema = schema();
        let room = class(&schema, "Room");
        let err = parse("floor", &schema, room).unwrap_err();
        assert!(err.reason.contains("floor"));
        assert!(parse("number[name]", &schema, room).is_err());
        assert!(parse("number*", &schema, room).is_err());
        assert!(parse("building*", &schema, room).is_err());
    }

    #[test]
    fn round_trip_through_stringify() {
        let schema = schema();
        let room = class(&schema, "Room");
        for text in ["", "number", "building", "*", "building[*]|number", "building[location|name]"] {
            let parsed = parse(text, &schema, room).unwrap();
            assert_eq!(parse(&stringify(&parsed), &schema, room).unwrap(), parsed, "{text}");
        }
    }

    #[test]
    fn basic_parse_ignores_order() {
        let left = parse_basic("a|b[c|d]").unwrap();
        let right = parse_basic("b[d|c]|a").unwrap();
        assert_eq!(left, right);
        assert!(parse_basic("").is_err());
        assert!(parse_basic("a*").is_err());
    }

    #[test]
    fn project_keeps_recursion_target() {
        let schema = schema();
        let selector = parse("parent*", &schema, class(&schema, "Faculty")).unwrap();
        let nested = selector.subselector("parent").unwrap();
        let projected = nested.project(["parent"]);
        assert_eq!(projected.subselector("parent"), Some(nested));
        assert_eq!(nested.project(["name", "parent"]), *nested);
    }
}
