//! Partial-override merging for algorithm configuration.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::PipelineError;

/// Deep-merge `overrides` onto the serialized defaults of `C`.
///
/// Absent keys keep their default, present keys replace it, and any key the
/// defaults do not contain fails the merge. `null` is treated as an empty
/// override.
pub fn merge_config<C>(overrides: &Value) -> Result<C, PipelineError>
where
    C: Default + Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(C::default())
        .map_err(|e| PipelineError::InvalidConfiguration(e.to_string()))?;

    match overrides {
        Value::Null => {}
        Value::Object(map) => merge_object(&mut merged, map, "")?,
        other => {
            return Err(PipelineError::InvalidConfiguration(format!(
                "algorithm_config must be an object, got {}",
                json_type(other)
            )))
        }
    }

    serde_json::from_value(merged).map_err(|e| PipelineError::InvalidConfiguration(e.to_string()))
}

fn merge_object(base: &mut Value, overrides: &Map<String, Value>, path: &str) -> Result<(), PipelineError> {
    let Value::Object(target) = base else {
        return Err(PipelineError::InvalidConfiguration(format!(
            "`{}` does not accept nested parameters",
            path
        )));
    };

    let unknown: Vec<String> = overrides
        .keys()
        .filter(|key| !target.contains_key(*key))
        .map(|key| qualified(path, key))
        .collect();
    if !unknown.is_empty() {
        let allowed: Vec<String> = target.keys().map(|key| qualified(path, key)).collect();
        return Err(PipelineError::InvalidConfiguration(format!(
            "unknown parameters [{}]; allowed: [{}]",
            unknown.join(", "),
            allowed.join(", ")
        )));
    }

    for (key, value) in overrides {
        let Some(slot) = target.get_mut(key) else {
            continue;
        };
        match value {
            Value::Object(nested) if slot.is_object() => {
                merge_object(slot, nested, &qualified(path, key))?
            }
            _ => *slot = value.clone(),
        }
    }
    Ok(())
}

fn qualified(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// garde rule: strictly positive and finite.
pub fn positive(value: &f32, _ctx: &()) -> garde::Result {
    if value.is_finite() && *value > 0.0 {
        Ok(())
    } else {
        Err(garde::Error::new(format!("must be greater than zero, got {}", value)))
    }
}
