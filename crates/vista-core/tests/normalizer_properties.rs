//! Totality and idempotence of the format normalizer across every shape it
//! recognises, plus inputs it does not.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use vista_core::{ConfigFormat, FormatNormalizer};

fn sample_inputs() -> Vec<Value> {
    vec![
        json!({}),
        json!([]),
        json!([1, 2, 3]),
        json!("a plain string"),
        json!(null),
        json!(42),
        json!(true),
        json!({"componentId": "", "dataSources": []}),
        json!({
            "componentId": "c1",
            "dataSources": [{
                "sourceId": "a",
                "dataItems": [{"item": {"type": "json", "config": {"jsonContent": "{}"}}, "processing": {"filterPath": "$"}}],
                "mergeStrategy": {"type": "object"}
            }],
            "createdAt": 1,
            "updatedAt": 2
        }),
        // standard-shaped but with a non-string component id
        json!({"componentId": 7, "dataSources": [{"sourceId": "a", "dataItems": []}]}),
        json!({"dataSources": [{"sourceId": "a", "dataItems": [{"type": "http", "config": {"url": "http://x"}}]}, "junk"]}),
        json!({"dataSources": [{"sourceId": 3, "dataItems": "not-an-array"}]}),
        json!({"dataSourceConfig": {"dataItems": [{"type": "static", "config": {"data": 1}}, 5]}}),
        json!({"s": {"type": "static", "data": null, "metadata": {}}, "other": "value"}),
        json!({"type": "websocket", "config": null}),
        json!({"type": 5, "config": {"x": 1}}),
        json!({"nested": {"deeply": {"value": [1, {"a": null}]}}}),
    ]
}

/// Normalization never panics and always yields a valid standard config
#[test]
fn test_normalize_is_total() {
    for raw in sample_inputs() {
        let standard = FormatNormalizer::normalize_to_standard(&raw, "component-1");
        let as_value = serde_json::to_value(&standard).unwrap();

        assert_eq!(
            FormatNormalizer::detect_format(&as_value),
            ConfigFormat::Standard,
            "output of {} is not standard",
            raw
        );
    }
}

/// normalize(normalize(x)) == normalize(x)
#[test]
fn test_normalize_is_idempotent() {
    for raw in sample_inputs() {
        let once = FormatNormalizer::normalize_to_standard(&raw, "component-1");
        let twice = FormatNormalizer::normalize_to_standard(&serde_json::to_value(&once).unwrap(), "component-1");

        assert_eq!(once, twice, "normalization of {} is not idempotent", raw);
    }
}

/// Outputs of the normalizer pass validation whenever a component id is given
#[test]
fn test_normalized_output_validates() {
    for raw in sample_inputs() {
        if FormatNormalizer::detect_format(&raw) == ConfigFormat::Standard {
            continue;
        }
        let standard = FormatNormalizer::normalize_to_standard(&raw, "component-1");
        let errors = FormatNormalizer::validate_standard_format(&serde_json::to_value(&standard).unwrap());
        assert!(errors.is_empty(), "{} produced defects {:?}", raw, errors);
    }
}

#[test]
fn test_normalize_multiple_preserves_order() {
    let inputs = vec![
        ("first".to_string(), json!({"type": "static", "config": {"data": 1}})),
        ("second".to_string(), json!("raw")),
    ];
    let configs = FormatNormalizer::normalize_multiple(&inputs);

    let ids: Vec<&str> = configs.iter().map(|c| c.component_id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
}
