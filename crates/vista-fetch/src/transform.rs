//! Post-fetch transform pipeline shared by every kind.
//!
//! Steps run in order: path extraction, field mapping, array filtering.
//! Each step is a no-op when absent from the [`Transform`].

use serde_json::{Map, Value};
use vista_core::{CoreError, CoreResult, Transform};

/// Resolve a dot-notation path. `$` and a leading `$.` are accepted;
/// numeric segments index into arrays.
pub fn extract_by_path(data: &Value, path: &str) -> Option<Value> {
    let path = path.trim();
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);

    if path.is_empty() {
        return Some(data.clone());
    }

    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Build `{target: value_at(source_path)}`. Arrays are mapped per element.
pub fn apply_mapping(data: Value, mapping: &Map<String, Value>) -> CoreResult<Value> {
    let mut paths = Vec::with_capacity(mapping.len());
    for (target, source) in mapping {
        let source = source.as_str().ok_or_else(|| {
            CoreError::TransformError(format!("mapping for '{}' must be a path string", target))
        })?;
        paths.push((target.as_str(), source));
    }

    let map_one = |item: &Value| {
        let mut out = Map::new();
        for (target, source) in &paths {
            out.insert(
                target.to_string(),
                extract_by_path(item, source).unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    };

    Ok(match data {
        Value::Array(items) => Value::Array(items.iter().map(&map_one).collect()),
        object @ Value::Object(_) => map_one(&object),
        other => other,
    })
}

/// Keep array elements whose fields equal every filter entry
pub fn apply_filter(data: Value, filter: &Map<String, Value>) -> Value {
    match data {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|item| filter.iter().all(|(key, expected)| item.get(key) == Some(expected)))
                .collect(),
        ),
        other => other,
    }
}

/// Run the whole pipeline
pub fn apply_transform(data: Value, transform: &Transform) -> CoreResult<Value> {
    let mut result = data;

    if let Some(path) = &transform.path {
        result = match extract_by_path(&result, path) {
            Some(value) => value,
            None if transform.required => {
                return Err(CoreError::TransformError(format!("path '{}' not found", path)));
            }
            None => Value::Null,
        };
    }

    if let Some(mapping) = &transform.mapping {
        result = apply_mapping(result, mapping)?;
    }

    if let Some(filter) = &transform.filter {
        result = apply_filter(result, filter);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_extract_by_path() {
        let data = json!({"data": {"items": [{"name": "a"}, {"name": "b"}]}});

        assert_eq!(extract_by_path(&data, "data.items.1.name"), Some(json!("b")));
        assert_eq!(extract_by_path(&data, "$.data.items.0"), Some(json!({"name": "a"})));
        assert_eq!(extract_by_path(&data, "$"), Some(data.clone()));
        assert_eq!(extract_by_path(&data, "data.missing"), None);
        assert_eq!(extract_by_path(&data, "data.items.x"), None);
    }

    #[test]
    fn test_mapping_applies_per_element() {
        let data = json!([{"t": 1, "v": {"x": 10}}, {"t": 2}]);
        let mapping = map(json!({"time": "t", "value": "v.x"}));

        let mapped = apply_mapping(data, &mapping).unwrap();
        assert_eq!(
            mapped,
            json!([{"time": 1, "value": 10}, {"time": 2, "value": null}])
        );
    }

    #[test]
    fn test_mapping_rejects_non_string_paths() {
        let mapping = map(json!({"time": 5}));
        assert!(apply_mapping(json!({}), &mapping).is_err());
    }

    #[test]
    fn test_filter_keeps_matching_elements() {
        let data = json!([{"kind": "a", "on": true}, {"kind": "b", "on": true}, {"kind": "a", "on": false}]);
        let filtered = apply_filter(data, &map(json!({"kind": "a", "on": true})));
        assert_eq!(filtered, json!([{"kind": "a", "on": true}]));

        // non-arrays pass through
        assert_eq!(apply_filter(json!({"kind": "b"}), &map(json!({"kind": "a"}))), json!({"kind": "b"}));
    }

    #[test]
    fn test_pipeline_order_and_required_path() {
        let data = json!({"rows": [{"id": 1, "k": "x"}, {"id": 2, "k": "y"}]});
        let transform = Transform {
            path: Some("rows".to_string()),
            mapping: Some(map(json!({"key": "k"}))),
            filter: Some(map(json!({"key": "y"}))),
            required: false,
        };
        assert_eq!(apply_transform(data.clone(), &transform).unwrap(), json!([{"key": "y"}]));

        let missing = Transform {
            path: Some("nope".to_string()),
            required: true,
            ..Default::default()
        };
        assert!(matches!(apply_transform(data.clone(), &missing), Err(CoreError::TransformError(_))));

        let lenient = Transform::path("nope");
        assert_eq!(apply_transform(data, &lenient).unwrap(), Value::Null);
    }
}
