pub mod mcp;
pub mod provisioner;
pub mod working_memory;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use serde_json::Value;

pub use provisioner::{ToolProvisioner, ToolSource};

/// A capability the agent may call during generation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value) -> Result<String>;
}

/// Tools attached to an agent. Fixed once built; cloning shares the tools.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Arc<[Arc<dyn Tool>]>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            tools: tools.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

/// Per-generation dispatch table: the agent's tool set plus call-scoped tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn from_set(set: &ToolSet) -> Self {
        let mut registry = Self::new();
        for tool in set.iter() {
            registry.register(tool.clone());
        }
        registry
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions offered to the model, sorted by name for stable requests.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run a tool. Schema violations come back as an error string for the
    /// model to correct, not as an `Err`.
    pub async fn execute(&self, name: &str, params: Value) -> Result<String> {
        let Some(tool) = self.tools.get(name) else {
            anyhow::bail!("unknown tool: {name}");
        };
        let violations = schema_violations(&params, &tool.parameters_schema());
        if !violations.is_empty() {
            return Ok(format!(
                "Error: Invalid parameters for tool '{name}': {}",
                violations.join("; ")
            ));
        }
        tool.execute(params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `value` against the subset of JSON Schema tools use in practice.
fn schema_violations(value: &Value, schema: &Value) -> Vec<String> {
    let mut out = Vec::new();
    check(value, schema, "", &mut out);
    out
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<String>) {
    let at = if path.is_empty() { "root" } else { path };

    if let Some(ty) = schema.get("type").and_then(Value::as_str) {
        let matches = match ty {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            out.push(format!("{at}: expected type '{ty}'"));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            out.push(format!("{at}: value not in allowed enum"));
        }
    }

    match value {
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or_default();
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    out.push(format!("{at}: value {n} < minimum {min}"));
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    out.push(format!("{at}: value {n} > maximum {max}"));
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    out.push(format!("{at}: string length {len} < minLength {min}"));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    out.push(format!("{at}: string length {len} > maxLength {max}"));
                }
            }
        }
        Value::Object(obj) => {
            let child = |key: &str| {
                if path.is_empty() {
                    key.to_string()
                } else {
                    format!("{path}.{key}")
                }
            };
            for field in schema
                .get("required")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                if !obj.contains_key(field) {
                    out.push(format!("{}: required field missing", child(field)));
                }
            }
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (key, prop_schema) in props {
                    if let Some(v) = obj.get(key) {
                        check(v, prop_schema, &child(key), out);
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item, item_schema, &format!("{at}[{i}]"), out);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text back"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string", "minLength": 1 } },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: Value) -> Result<String> {
            Ok(params["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn test_execute_valid_call() {
        let registry = ToolRegistry::from_set(&ToolSet::new(vec![Arc::new(Echo)]));
        let out = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_execute_reports_violations_as_text() {
        let registry = ToolRegistry::from_set(&ToolSet::new(vec![Arc::new(Echo)]));
        let out = registry.execute("echo", json!({})).await.unwrap();
        assert!(out.starts_with("Error: Invalid parameters for tool 'echo'"));
        assert!(out.contains("text: required field missing"));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.execute("nope", json!({})).await.is_err());
    }

    #[test]
    fn test_definitions_sorted() {
        struct Named(&'static str);
        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                ""
            }
            fn parameters_schema(&self) -> Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _: Value) -> Result<String> {
                Ok(String::new())
            }
        }
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_nested_and_array_violations() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": { "grade": { "type": "integer", "minimum": 1, "maximum": 12 } },
                    "required": ["grade"]
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        });
        let errors = schema_violations(&json!({"filter": {"grade": 13}, "tags": ["a", 2]}), &schema);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("filter.grade") || errors[1].contains("filter.grade"));
        assert!(errors.iter().any(|e| e.contains("tags[1]: expected type 'string'")));
    }

    #[test]
    fn test_enum_and_type_mismatch() {
        let schema = json!({
            "type": "object",
            "properties": { "mode": { "type": "string", "enum": ["quiz", "explain"] } },
            "required": ["mode"]
        });
        let errors = schema_violations(&json!({"mode": "cheat"}), &schema);
        assert_eq!(errors, vec!["mode: value not in allowed enum".to_string()]);

        let errors = schema_violations(&json!("not an object"), &schema);
        assert_eq!(errors, vec!["root: expected type 'object'".to_string()]);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let schema = json!({ "type": "object", "properties": { "q": { "type": "string" } } });
        assert!(schema_violations(&json!({"q": "x", "extra": 1}), &schema).is_empty());
    }
}
