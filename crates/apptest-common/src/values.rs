//! Layering of app values documents

use serde_json::Value;

/// Deep-merge `layer` on top of `base`, returning a new document.
///
/// Mappings present on both sides merge recursively. Everything else
/// (scalars, sequences, type mismatches) takes the layer's value, so
/// sequences are replaced wholesale rather than concatenated. Neither input
/// is modified.
pub fn merge(base: &Value, layer: &Value) -> Value {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            let mut merged = base_map.clone();
            for (key, layer_value) in layer_map {
                let value = match base_map.get(key) {
                    Some(base_value) => merge(base_value, layer_value),
                    None => layer_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (_, layer) => layer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layer_wins_on_scalars() {
        let base = json!({"clusterID": "old", "keep": 1});
        let layer = json!({"clusterID": "new"});
        assert_eq!(merge(&base, &layer), json!({"clusterID": "new", "keep": 1}));
    }

    #[test]
    fn mappings_merge_recursively() {
        let base = json!({
            "apps": {
                "kyvernoPolicies": {"enabled": false, "extra": "x"},
                "other": {"enabled": true}
            }
        });
        let layer = json!({"apps": {"kyvernoPolicies": {"enabled": true, "version": "1.2.3"}}});
        assert_eq!(
            merge(&base, &layer),
            json!({"apps": {
                "kyvernoPolicies": {"enabled": true, "extra": "x", "version": "1.2.3"},
                "other": {"enabled": true}
            }})
        );
    }

    #[test]
    fn sequences_are_replaced() {
        let base = json!({"tolerations": ["a", "b"]});
        let layer = json!({"tolerations": ["c"]});
        assert_eq!(merge(&base, &layer), json!({"tolerations": ["c"]}));
    }

    #[test]
    fn type_mismatch_takes_layer() {
        let base = json!({"apps": "disabled"});
        let layer = json!({"apps": {"x": {"enabled": true}}});
        assert_eq!(merge(&base, &layer), layer);
    }

    #[test]
    fn inputs_are_untouched() {
        let base = json!({"a": {"b": 1}});
        let layer = json!({"a": {"c": 2}});
        let before = (base.clone(), layer.clone());
        let _ = merge(&base, &layer);
        assert_eq!((base, layer), before);
    }

    #[test]
    fn null_base_takes_layer() {
        let layer = json!({"apps": {}});
        assert_eq!(merge(&Value::Null, &layer), layer);
    }
}
