use serde_json::{Map, Value};

/// Keywords whose value is a map of name → subschema.
const SCHEMA_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];

/// Keywords whose value is a single subschema.
const SCHEMA_SINGLES: [&str; 11] = [
    "propertyNames",
    "additionalProperties",
    "unevaluatedProperties",
    "items",
    "contains",
    "additionalItems",
    "unevaluatedItems",
    "not",
    "if",
    "then",
    "else",
];

/// Keywords whose value is an array of subschemas.
const SCHEMA_ARRAYS: [&str; 4] = ["prefixItems", "allOf", "anyOf", "oneOf"];

const OBJECT_KEYWORDS: [&str; 8] = [
    "properties",
    "patternProperties",
    "additionalProperties",
    "unevaluatedProperties",
    "required",
    "dependentRequired",
    "dependentSchemas",
    "propertyNames",
];

/// Close every object schema that doesn't say otherwise with
/// `additionalProperties: false`, recursing through subschemas.
pub(crate) fn apply_strict_mode(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if describes_object(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for (key, child) in map.iter_mut() {
                let key = key.as_str();
                if SCHEMA_MAPS.contains(&key) {
                    if let Value::Object(children) = child {
                        children.values_mut().for_each(apply_strict_mode);
                    }
                } else if SCHEMA_SINGLES.contains(&key) || SCHEMA_ARRAYS.contains(&key) {
                    apply_strict_mode(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(apply_strict_mode),
        _ => {}
    }
}

fn describes_object(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|kind| kind == "object"),
        _ => OBJECT_KEYWORDS.iter().any(|keyword| map.contains_key(*keyword)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn closes_nested_object_schemas() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "inner": { "properties": { "x": { "type": "number" } } },
                "list": { "type": "array", "items": { "type": "object" } }
            }
        });
        apply_strict_mode(&mut schema);

        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["inner"]["additionalProperties"],
            json!(false)
        );
        assert_eq!(
            schema["properties"]["list"]["items"]["additionalProperties"],
            json!(false)
        );
        assert!(schema["properties"]["list"]
            .get("additionalProperties")
            .is_none());
    }

    #[test]
    fn keeps_explicit_additional_properties() {
        let mut schema = json!({ "type": "object", "additionalProperties": true });
        apply_strict_mode(&mut schema);
        assert_eq!(schema["additionalProperties"], json!(true));
    }
}
