// Raw resource -> IpPool. Pure: no I/O, no state.

use crate::models::{IpPool, PoolAddr};
use serde_json::Value;

const POOL_PATH: [&str; 3] = ["spec", "ipv4Config", "pool"];
const POOL_FIELD: &str = "spec.ipv4Config.pool";
const START_FIELD: &str = "spec.ipv4Config.pool.start";
const END_FIELD: &str = "spec.ipv4Config.pool.end";

/// How a missing `end` address is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndPolicy {
    /// Missing `end` fails extraction with `IncompleteResource`.
    #[default]
    Required,
    /// Missing `end` yields an invalid-address sentinel.
    Optional,
}

impl EndPolicy {
    pub fn from_required(required: bool) -> Self {
        if required {
            EndPolicy::Required
        } else {
            EndPolicy::Optional
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("incomplete resource, field {field:?} missing in {name:?}")]
    IncompleteResource { name: String, field: &'static str },
    #[error("invalid resource, field {field:?} in {name:?} has unexpected type")]
    FieldType { name: String, field: &'static str },
}

impl ExtractError {
    pub fn field(&self) -> &'static str {
        match self {
            ExtractError::IncompleteResource { field, .. } | ExtractError::FieldType { field, .. } => {
                *field
            }
        }
    }
}

/// Resource name: `metadata.name`, falling back to a top-level `name`.
pub fn resource_name(obj: &Value) -> &str {
    obj.pointer("/metadata/name")
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Cache key: `namespace/name`, or just `name` for cluster-scoped objects.
pub fn object_key(obj: &Value) -> String {
    let name = resource_name(obj);
    match obj.pointer("/metadata/namespace").and_then(Value::as_str) {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

pub fn extract(obj: &Value, end_policy: EndPolicy) -> Result<IpPool, ExtractError> {
    let name = resource_name(obj).to_string();

    let mut pool = obj;
    for segment in POOL_PATH {
        pool = match pool.get(segment) {
            Some(v) => v,
            None => {
                return Err(ExtractError::IncompleteResource {
                    name,
                    field: POOL_FIELD,
                });
            }
        };
    }
    if !pool.is_object() {
        return Err(ExtractError::FieldType {
            name,
            field: POOL_FIELD,
        });
    }

    let start = match nested_str(pool, "start", &name, START_FIELD)? {
        Some(s) => PoolAddr::parse(s),
        None => {
            return Err(ExtractError::IncompleteResource {
                name,
                field: START_FIELD,
            });
        }
    };

    let end = match (nested_str(pool, "end", &name, END_FIELD)?, end_policy) {
        (Some(s), _) => PoolAddr::parse(s),
        (None, EndPolicy::Optional) => PoolAddr::invalid(),
        (None, EndPolicy::Required) => {
            return Err(ExtractError::IncompleteResource {
                name,
                field: END_FIELD,
            });
        }
    };

    Ok(IpPool { name, start, end })
}

fn nested_str<'a>(
    obj: &'a Value,
    key: &str,
    name: &str,
    field: &'static str,
) -> Result<Option<&'a str>, ExtractError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ExtractError::FieldType {
            name: name.to_string(),
            field,
        }),
    }
}
