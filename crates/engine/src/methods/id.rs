//! Id codecs: how an entity id maps onto request parameters and response keys.

use serde_json::Value;
use tal_api::Params;
use tal_types::{Selector, pack_id, unpack_id};

use crate::error::{EngineError, Result};

/// Id of a single entity, as request parameters and response keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSpec {
    /// One key holding the whole id.
    Elementary(String),
    /// Several keys whose values are packed into one id.
    Composite(Vec<String>),
}

impl IdSpec {
    pub fn elementary(name: impl Into<String>) -> Self {
        Self::Elementary(name.into())
    }

    pub fn composite<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Composite(names.into_iter().map(Into::into).collect())
    }

    /// True when `name` is one of the id keys.
    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::Elementary(key) => key == name,
            Self::Composite(keys) => keys.iter().any(|key| key == name),
        }
    }

    pub fn update_params(&self, params: &mut Params, id: &str) -> Result<()> {
        match self {
            Self::Elementary(key) => {
                params.insert(key.clone(), id.to_string());
            }
            Self::Composite(keys) => {
                let parts = unpack_id(id, Some(keys.len()))?;
                for (key, part) in keys.iter().zip(parts) {
                    params.insert(key.clone(), part);
                }
            }
        }
        Ok(())
    }

    /// Adds the id keys to an API fields selector.
    pub fn update_api_selector(&self, api: &mut Selector) {
        match self {
            Self::Elementary(key) => api.insert(key.clone(), Selector::new()),
            Self::Composite(keys) => {
                for key in keys {
                    api.insert(key.clone(), Selector::new());
                }
            }
        }
    }

    /// Reads the id from a response object; `None` for a null elementary id.
    pub fn load(&self, path: &str, response: &Value) -> Result<Option<String>> {
        match self {
            Self::Elementary(key) => match lookup(path, response, key)? {
                Value::Null => Ok(None),
                value => Ok(Some(id_text(value))),
            },
            Self::Composite(keys) => {
                let parts = keys
                    .iter()
                    .map(|key| lookup(path, response, key).map(id_text))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(pack_id(parts)))
            }
        }
    }
}

/// Ids of a batch, as one request parameter and per-id response keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdListSpec {
    /// `a|b|c`, response keyed by id.
    Elementary(String),
    /// `(a,b)|(c,d)`, response keyed by the parenthesised tuple.
    CompositeTuple(String),
}

impl IdListSpec {
    pub fn param_name(&self) -> &str {
        match self {
            Self::Elementary(name) | Self::CompositeTuple(name) => name,
        }
    }

    /// Key of `id` in the batch response.
    pub fn key(&self, id: &str) -> Result<String> {
        match self {
            Self::Elementary(_) => Ok(id.to_string()),
            Self::CompositeTuple(_) => Ok(format!("({})", unpack_id(id, None)?.join(","))),
        }
    }

    pub fn update_params(&self, params: &mut Params, ids: &[String]) -> Result<()> {
        let keys = ids.iter().map(|id| self.key(id)).collect::<Result<Vec<_>>>()?;
        params.insert(self.param_name().to_string(), keys.join("|"));
        Ok(())
    }
}

fn lookup<'v>(path: &str, response: &'v Value, key: &str) -> Result<&'v Value> {
    response
        .get(key)
        .ok_or_else(|| EngineError::malformed(path, format!("missing id key '{key}'")))
}

/// Text form of an id value; numbers lose their JSON quoting.
pub(crate) fn id_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn composite_id_round_trips_through_params() {
        let spec = IdSpec::composite(["course_id", "term_id"]);
        let id = spec.load("x", &json!({"course_id": "1000-M1", "term_id": "2024Z", "name": {}})).unwrap().unwrap();
        assert_eq!(id, "1000-M1|2024Z");

        let mut params = Params::new();
        spec.update_params(&mut params, &id).unwrap();
        assert_eq!(params.get("course_id").map(String::as_str), Some("1000-M1"));
        assert_eq!(params.get("term_id").map(String::as_str), Some("2024Z"));
    }

    #[test]
    fn elementary_id_accepts_numbers_and_null() {
        let spec = IdSpec::elementary("id");
        assert_eq!(spec.load("x", &json!({"id": 169934})).unwrap().as_deref(), Some("169934"));
        assert_eq!(spec.load("x", &json!({"id": null})).unwrap(), None);
        assert!(matches!(spec.load("x", &json!({})), Err(EngineError::MalformedResponse { .. })));
    }

    #[test]
    fn composite_tuple_list_keys() {
        let spec = IdListSpec::CompositeTuple("group_ids".to_string());
        let mut params = Params::new();
        spec.update_params(&mut params, &["12|1".to_string(), "12|2".to_string()]).unwrap();
        assert_eq!(params["group_ids"], "(12,1)|(12,2)");
        assert_eq!(spec.key("12|2").unwrap(), "(12,2)");
    }
}
