//! YAML handling for config files and app values
//!
//! Parsing goes through yaml-rust2 into `serde_json::Value` so the rest of the
//! crate works on a single document model. Rendering back to YAML uses
//! serde_yaml; object keys come out sorted, which keeps rendered values stable
//! between runs.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a values document, treating empty input as an empty mapping.
pub fn parse_values(input: &str) -> Result<Value, Error> {
    match parse_yaml(input)? {
        Value::Null => Ok(Value::Object(Map::new())),
        v @ Value::Object(_) => Ok(v),
        other => Err(Error::serialization(format!(
            "values must be a mapping, got {}",
            type_name(&other)
        ))),
    }
}

/// Render a value as a YAML document.
pub fn to_yaml(value: &Value) -> Result<String, Error> {
    Ok(serde_yaml::to_string(value)?)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Convert a yaml_rust2::Yaml value to serde_json::Value
fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| Error::serialization(e.to_string()))?;
            Ok(Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(Error::serialization("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::serialization("YAML aliases not supported")),
        Yaml::BadValue => Err(Error::serialization("bad YAML value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_nested() {
        let yaml = r#"
apps:
  kyvernoPolicies:
    enabled: true
    version: 1.2.3
clusterID: wc1
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["apps"]["kyvernoPolicies"]["enabled"], true);
        assert_eq!(result["apps"]["kyvernoPolicies"]["version"], "1.2.3");
        assert_eq!(result["clusterID"], "wc1");
    }

    #[test]
    fn test_parse_yaml_empty() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_yaml_invalid() {
        assert!(parse_yaml("not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_parse_values_empty_is_mapping() {
        assert_eq!(parse_values("").unwrap(), serde_json::json!({}));
        assert_eq!(parse_values("# only a comment\n").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_parse_values_rejects_scalars() {
        let err = parse_values("just-a-string").unwrap_err();
        assert!(err.to_string().contains("a string"));

        let err = parse_values("- a\n- b").unwrap_err();
        assert!(err.to_string().contains("a sequence"));
    }

    #[test]
    fn test_parse_yaml_float_and_null() {
        let result = parse_yaml("ratio: 1.5\nunset: null").unwrap();
        assert!((result["ratio"].as_f64().unwrap() - 1.5).abs() < 0.0001);
        assert!(result["unset"].is_null());
    }

    #[test]
    fn test_to_yaml_sorts_keys() {
        let value = serde_json::json!({"zeta": 1, "alpha": {"b": true, "a": "x"}});
        let rendered = to_yaml(&value).unwrap();
        assert_eq!(rendered, "alpha:\n  a: x\n  b: true\nzeta: 1\n");
    }

    #[test]
    fn test_to_yaml_parses_back() {
        let value = serde_json::json!({"clusterID": "wc1", "apps": {"new-app": {"enabled": true}}});
        let rendered = to_yaml(&value).unwrap();
        assert_eq!(parse_yaml(&rendered).unwrap(), value);
    }
}
