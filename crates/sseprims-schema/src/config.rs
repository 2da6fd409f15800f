/// Controls JSON Schema validation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaConfig {
    /// When true, object schemas reject properties they don't declare.
    pub strict_mode: bool,
    /// Maximum number of issues collected for one input.
    pub max_issues: usize,
    /// Maximum bytes allowed for a schema file.
    pub max_schema_file_size: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_issues: 4,
            max_schema_file_size: 256 * 1024,
        }
    }
}
