//! Structural comparison of serde values.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

use super::{Diff, SnapshotStrategy};

/// Stores values as JSON and compares them field by field.
///
/// Only types that survive a serialize/deserialize round trip unchanged
/// can be stored; [`encode`](SnapshotStrategy::encode) checks this.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactValue;

impl ExactValue {
    fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }
}

impl<T> SnapshotStrategy<T> for ExactValue
where
    T: Serialize + DeserializeOwned,
{
    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let tree = Self::to_value(value)?;
        let payload = serde_json::to_vec_pretty(&tree)?;

        let restored: T = serde_json::from_slice(&payload)
            .map_err(|e| Error::Unrepresentable(e.to_string()))?;
        if Self::to_value(&restored)? != tree {
            return Err(Error::Unrepresentable(
                "value changes when read back from its payload".to_string(),
            ));
        }
        Ok(payload)
    }

    fn compare(&self, stored: &[u8], value: &T) -> Result<Diff> {
        let old: Value = serde_json::from_slice(stored)?;
        let new = Self::to_value(value)?;
        let mut diff = Diff::default();
        walk("", &old, &new, &mut diff);
        Ok(diff)
    }
}

/// Escapes a key for use in a JSON pointer.
fn pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn render(value: &Value) -> String {
    value.to_string()
}

fn walk(location: &str, old: &Value, new: &Value, diff: &mut Diff) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = format!("{}/{}", location, pointer_token(key));
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => walk(&child, x, y, diff),
                    (x, y) => diff.push(child, x.map(render), y.map(render)),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                let child = format!("{}/{}", location, i);
                match (a.get(i), b.get(i)) {
                    (Some(x), Some(y)) => walk(&child, x, y, diff),
                    (x, y) => diff.push(child, x.map(render), y.map(render)),
                }
            }
        }
        (a, b) if a != b => {
            let at = if location.is_empty() { "/" } else { location };
            diff.push(at, Some(render(a)), Some(render(b)));
        }
        _ => {}
    }
}
