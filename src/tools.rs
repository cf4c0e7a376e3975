//! Tool registry served over `POST /tools/{name}` and the MCP endpoint.
//!
//! Each [`Tool`] declares a JSON Schema for its parameters. Calls are
//! checked against it by [`validate_params`] (required keys, primitive
//! types, enums, defaults) before `execute` runs, so tools can read their
//! parameters without re-validating them.
//!
//! Built-ins:
//!
//! | Tool | Does |
//! |------|------|
//! | `search`   | chunk retrieval |
//! | `chat`     | answer a question with sources |
//! | `timeline` | chronological entries in a year range |
//! | `status`   | index counts |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::llm::{answer_question, Answer};
use crate::models::ContextChunk;
use crate::search::{retrieve_context, SearchMode};
use crate::stats::{collect_stats, IndexSummary};
use crate::timeline::{fetch_timeline, TimelineEntry};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema (`type: object`) of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool may reach: the knowledge base behind one config.
pub struct ToolContext {
    config: Arc<Config>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: Option<usize>,
    ) -> Result<Vec<ContextChunk>> {
        retrieve_context(&self.config, query, mode, limit).await
    }

    pub async fn ask(&self, question: &str, top_k: Option<usize>) -> Result<Answer> {
        answer_question(&self.config, question, top_k).await
    }

    pub async fn timeline(
        &self,
        start_year: Option<i64>,
        end_year: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<TimelineEntry>> {
        fetch_timeline(&self.config, start_year, end_year, limit).await
    }

    pub async fn status(&self) -> Result<IndexSummary> {
        collect_stats(&self.config).await
    }
}

/// Listing entry for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

fn non_empty_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    let value = params[key].as_str().unwrap_or("");
    if value.trim().is_empty() {
        bail!("{} must not be empty", key);
    }
    Ok(value)
}

fn opt_usize(params: &Value, key: &str) -> Option<usize> {
    params[key].as_u64().map(|n| n as usize)
}

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Retrieve the most relevant chunks for a query"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "mode": { "type": "string", "enum": ["keyword", "semantic", "hybrid"], "default": "keyword" },
                "limit": { "type": "integer", "description": "Max chunks", "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = non_empty_str(&params, "query")?;
        let mode: SearchMode = params["mode"].as_str().unwrap_or("keyword").parse()?;
        let results = ctx.search(query, mode, opt_usize(&params, "limit")).await?;
        Ok(json!({ "results": results }))
    }
}

pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Answer a question from the knowledge base, with sources"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "top_k": { "type": "integer", "description": "Chunks of context", "default": 5 }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let question = non_empty_str(&params, "question")?;
        let answer = ctx.ask(question, opt_usize(&params, "top_k")).await?;
        Ok(serde_json::to_value(answer)?)
    }
}

pub struct TimelineTool;

#[async_trait]
impl Tool for TimelineTool {
    fn name(&self) -> &str {
        "timeline"
    }

    fn description(&self) -> &str {
        "List dated passages in chronological order"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_year": { "type": "integer", "description": "Inclusive lower bound" },
                "end_year": { "type": "integer", "description": "Inclusive upper bound" },
                "limit": { "type": "integer", "description": "Max entries" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let limit = opt_usize(&params, "limit");
        if limit == Some(0) {
            bail!("limit must be at least 1");
        }
        let entries = ctx
            .timeline(
                params["start_year"].as_i64(),
                params["end_year"].as_i64(),
                limit,
            )
            .await?;
        Ok(json!({ "entries": entries }))
    }
}

pub struct StatusTool;

#[async_trait]
impl Tool for StatusTool {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Index counts and embedding coverage"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let summary = ctx.status().await?;
        Ok(json!({
            "index": summary,
            "embeddings": ctx.config().embedding.provider,
            "llm": ctx.config().llm.provider,
        }))
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(ChatTool));
        registry.register(Box::new(TimelineTool));
        registry.register(Box::new(StatusTool));
        registry
    }

    /// Lookups by name return the first registered match.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                builtin: t.is_builtin(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Check `params` against `schema` and fill in declared defaults.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !params_obj.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name) else {
            if let Some(default) = prop_schema.get("default") {
                result.insert(prop_name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
            let type_ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    prop_name,
                    expected,
                    json_type_name(value)
                );
            }
        }

        if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                let allowed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                bail!(
                    "parameter '{}' must be one of [{}], got {}",
                    prop_name,
                    allowed.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
