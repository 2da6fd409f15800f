use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;

use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::SchemaConfig;
use crate::error::{Result, SchemaError};
use crate::strict::apply_strict_mode;
use crate::validation::{Issue, Validation};
use crate::validator::{deserialize_input, InputValidator};

/// Validates input against a compiled JSON Schema, then deserializes it into `T`.
pub struct JsonSchemaValidator<T> {
    validator: Validator,
    config: SchemaConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchemaValidator<T> {
    /// Compile a schema with default config.
    pub fn new(schema: &Value) -> Result<Self> {
        Self::with_config(schema, SchemaConfig::default())
    }

    /// Compile a schema with explicit config.
    pub fn with_config(schema: &Value, config: SchemaConfig) -> Result<Self> {
        let mut schema_to_compile = schema.clone();
        if config.strict_mode {
            apply_strict_mode(&mut schema_to_compile);
        }

        let validator = jsonschema::validator_for(&schema_to_compile)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;

        Ok(Self {
            validator,
            config,
            _marker: PhantomData,
        })
    }

    /// Compile a schema from a JSON string.
    pub fn from_json_str(schema_json: &str, config: SchemaConfig) -> Result<Self> {
        let schema: Value = serde_json::from_str(schema_json)?;
        Self::with_config(&schema, config)
    }

    /// Load and compile a schema file, refusing files over the configured size.
    pub fn from_file(path: &Path, config: SchemaConfig) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|err| {
            SchemaError::LoadFailed(format!("failed opening schema {}: {err}", path.display()))
        })?;
        let metadata = file
            .metadata()
            .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
        if !metadata.is_file() {
            return Err(SchemaError::LoadFailed(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let max_bytes = config.max_schema_file_size;
        if metadata.len() > max_bytes as u64 {
            return Err(SchemaError::LoadFailed(format!(
                "schema file too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }

        let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| {
                SchemaError::LoadFailed(format!("failed reading schema {}: {err}", path.display()))
            })?;
        if content.len() > max_bytes {
            return Err(SchemaError::LoadFailed(format!(
                "schema file too large while reading: {}",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), bytes = content.len(), "loaded input schema");
        Self::from_json_str(&content, config)
    }

    /// Validator configuration.
    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    fn issues(&self, raw: &Value) -> Vec<Issue> {
        self.validator
            .iter_errors(raw)
            .take(self.config.max_issues.max(1))
            .map(|err| Issue::new(err.to_string()))
            .collect()
    }
}

impl<T> fmt::Debug for JsonSchemaValidator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator")
            .field("config", &self.config)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> InputValidator for JsonSchemaValidator<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Input = T;

    fn safe_parse(&self, raw: &Value) -> Validation<T> {
        let issues = self.issues(raw);
        if !issues.is_empty() {
            return Validation::Failure(issues);
        }
        deserialize_input(raw)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::validator::InputValidatorExt;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Countdown {
        count: i64,
    }

    fn countdown_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "count": { "type": "integer", "minimum": 1 } },
            "required": ["count"]
        })
    }

    #[test]
    fn accepts_valid_input() {
        let validator = JsonSchemaValidator::<Countdown>::new(&countdown_schema()).unwrap();
        assert_eq!(
            validator.safe_parse(&json!({"count": 5})),
            Validation::Success(Countdown { count: 5 })
        );
    }

    #[test]
    fn reports_minimum_violation() {
        let validator = JsonSchemaValidator::<Countdown>::new(&countdown_schema()).unwrap();
        let message = validator
            .safe_parse(&json!({"count": -1}))
            .message()
            .expect("negative count should fail");
        assert!(message.contains("minimum"), "{message}");
    }

    #[test]
    fn joins_multiple_issues() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "string" },
                "b": { "type": "string" }
            }
        });
        let validator = JsonSchemaValidator::<Value>::new(&schema).unwrap();
        let message = validator
            .safe_parse(&json!({"a": 1, "b": 2}))
            .message()
            .expect("both fields should fail");
        assert_eq!(message.matches("; ").count(), 1, "{message}");
    }

    #[test]
    fn caps_issue_count() {
        let schema = json!({
            "type": "array",
            "items": { "type": "string" }
        });
        let validator = JsonSchemaValidator::<Value>::with_config(
            &schema,
            SchemaConfig {
                max_issues: 2,
                ..SchemaConfig::default()
            },
        )
        .unwrap();
        match validator.safe_parse(&json!([1, 2, 3, 4, 5])) {
            Validation::Failure(issues) => assert_eq!(issues.len(), 2),
            Validation::Success(_) => panic!("array of numbers should fail"),
        }
    }

    #[test]
    fn strict_mode_rejects_unknown_fields() {
        let lenient = JsonSchemaValidator::<Value>::new(&countdown_schema()).unwrap();
        let strict = JsonSchemaValidator::<Value>::with_config(
            &countdown_schema(),
            SchemaConfig {
                strict_mode: true,
                ..SchemaConfig::default()
            },
        )
        .unwrap();

        let input = json!({"count": 2, "extra": true});
        assert!(lenient.safe_parse(&input).is_success());
        assert!(!strict.safe_parse(&input).is_success());
    }

    #[test]
    fn default_is_validated_too() {
        let validator = JsonSchemaValidator::<i64>::new(&json!({"type": "integer", "minimum": 1}))
            .unwrap()
            .with_default(json!(10));
        assert_eq!(validator.safe_parse(&Value::Null), Validation::Success(10));
        assert!(!validator.safe_parse(&json!(0)).is_success());
    }

    #[test]
    fn invalid_schema_fails_to_compile() {
        let result = JsonSchemaValidator::<Value>::new(&json!({"type": 12}));
        assert!(matches!(result, Err(SchemaError::CompileFailed(_))));
    }

    #[test]
    fn from_file_enforces_size_limit() {
        let dir = std::env::temp_dir().join(format!(
            "sseprims-schema-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let path = dir.join("input.schema.json");
        std::fs::write(&path, countdown_schema().to_string()).expect("schema should write");

        let loaded = JsonSchemaValidator::<Countdown>::from_file(&path, SchemaConfig::default());
        assert!(loaded.is_ok());

        let tiny = SchemaConfig {
            max_schema_file_size: 8,
            ..SchemaConfig::default()
        };
        let rejected = JsonSchemaValidator::<Countdown>::from_file(&path, tiny);
        assert!(matches!(rejected, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
