//! Composite entity ids.
//!
//! Some entities are keyed by several API parameters (course id + term id, ...). Their
//! ids are packed into one string joined with `|`, escaping `\` and `|` with a backslash.

use crate::value::ValueError;

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

pub fn pack_id<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut packed = String::new();
    for (index, part) in parts.into_iter().enumerate() {
        if index > 0 {
            packed.push(SEPARATOR);
        }
        for c in part.as_ref().chars() {
            if c == SEPARATOR || c == ESCAPE {
                packed.push(ESCAPE);
            }
            packed.push(c);
        }
    }
    packed
}

/// Splits a packed id, checking the part count when `expected` is given.
pub fn unpack_id(id: &str, expected: Option<usize>) -> Result<Vec<String>, ValueError> {
    let invalid = |reason: String| ValueError::InvalidPackedId { id: id.to_string(), reason };

    let mut parts = vec![String::new()];
    let mut chars = id.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(escaped @ (SEPARATOR | ESCAPE)) => push_char(&mut parts, escaped),
                Some(other) => return Err(invalid(format!("invalid escape character '{other}'"))),
                None => return Err(invalid("dangling escape character".to_string())),
            },
            SEPARATOR => parts.push(String::new()),
            other => push_char(&mut parts, other),
        }
    }

    if let Some(expected) = expected
        && parts.len() != expected
    {
        return Err(invalid(format!("expected {expected} parts, found {}", parts.len())));
    }
    Ok(parts)
}

fn push_char(parts: &mut [String], c: char) {
    if let Some(last) = parts.last_mut() {
        last.push(c);
    }
}
