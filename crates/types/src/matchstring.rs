//! Highlighted search matches.
//!
//! The search endpoints return the matched text as HTML fragments where the matching
//! runs are wrapped in `<b>` tags, e.g. `Jan <b>Kowal</b>ski`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::value::ValueError;

static SPLIT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)([^<>]+)|<b\s*>([^<>]*)</b\s*>|<b\s*/>|(.)").expect("match split regex should compile"));
static ENTITY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:(\w+)|#(\d+)|#[xX]([0-9a-fA-F]+));?").expect("html entity regex should compile"));

/// One run of a match string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchPart {
    pub text: String,
    pub highlighted: bool,
}

/// How [`MatchString::format`] escapes text runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    #[default]
    None,
    Html,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MatchString {
    parts: Vec<MatchPart>,
}

impl MatchString {
    pub fn from_html(html: &str) -> Result<Self, ValueError> {
        let mut parts: Vec<MatchPart> = Vec::new();
        for captures in SPLIT_REGEX.captures_iter(html) {
            if captures.get(3).is_some() {
                return Err(ValueError::InvalidMatchString {
                    text: html.to_string(),
                    reason: "unexpected markup".to_string(),
                });
            }
            let (raw, highlighted) = match (captures.get(1), captures.get(2)) {
                (Some(plain), _) => (plain.as_str(), false),
                (None, Some(bold)) => (bold.as_str(), true),
                (None, None) => continue,
            };
            let text = unescape(raw).map_err(|reason| ValueError::InvalidMatchString {
                text: html.to_string(),
                reason,
            })?;
            if text.is_empty() {
                continue;
            }
            match parts.last_mut() {
                Some(last) if last.highlighted == highlighted => last.text.push_str(&text),
                _ => parts.push(MatchPart { text, highlighted }),
            }
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[MatchPart] {
        &self.parts
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.parts.iter().map(|part| (part.text.as_str(), part.highlighted))
    }

    /// Plain text without highlighting.
    pub fn text(&self) -> String {
        self.parts.iter().map(|part| part.text.as_str()).collect()
    }

    /// Renders the string wrapping highlighted runs in `start`/`end`.
    pub fn format(&self, start: &str, end: &str, escape: Escape) -> String {
        let mut out = String::new();
        for part in &self.parts {
            let text = match escape {
                Escape::None => part.text.clone(),
                Escape::Html => escape_html(&part.text),
            };
            if part.highlighted {
                out.push_str(start);
                out.push_str(&text);
                out.push_str(end);
            } else {
                out.push_str(&text);
            }
        }
        out
    }
}

impl fmt::Display for MatchString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format("<b>", "</b>", Escape::Html))
    }
}

fn unescape(text: &str) -> Result<String, String> {
    let mut failure = None;
    let replaced = ENTITY_REGEX.replace_all(text, |captures: &Captures<'_>| {
        let decoded = if let Some(name) = captures.get(1) {
            match name.as_str() {
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                _ => None,
            }
        } else if let Some(decimal) = captures.get(2) {
            decimal.as_str().parse::<u32>().ok().and_then(char::from_u32)
        } else {
            captures
                .get(3)
                .and_then(|hex| u32::from_str_radix(hex.as_str(), 16).ok())
                .and_then(char::from_u32)
        };
        match decoded {
            Some(c) => c.to_string(),
            None => {
                failure.get_or_insert_with(|| format!("unsupported HTML entity '{}'", &captures[0]));
                String::new()
            }
        }
    });
    match failure {
        Some(reason) => Err(reason),
        None => Ok(replaced.into_owned()),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_highlighted_runs() {
        let matched = MatchString::from_html("Jan <b>Kowal</b>ski").unwrap();
        assert_eq!(
            matched.iter().collect::<Vec<_>>(),
            vec![("Jan ", false), ("Kowal", true), ("ski", false)]
        );
        assert_eq!(matched.text(), "Jan Kowalski");
        assert_eq!(matched.format("[", "]", Escape::None), "Jan [Kowal]ski");
    }

    #[test]
    fn unescapes_entities() {
        let matched = MatchString::from_html("R&amp;D <b>&#65;&#x42;</b>").unwrap();
        assert_eq!(matched.text(), "R&D AB");
        assert_eq!(matched.to_string(), "R&amp;D <b>AB</b>");
    }

    #[test]
    fn empty_bold_is_ignored() {
        let matched = MatchString::from_html("a<b/>b<b></b>c").unwrap();
        assert_eq!(matched.iter().collect::<Vec<_>>(), vec![("abc", false)]);
    }

    #[test]
    fn rejects_other_markup() {
        assert!(MatchString::from_html("<i>x</i>").is_err());
        assert!(MatchString::from_html("&nbsp;").is_err());
    }
}
