//! Question answering over retrieved chunks.
//!
//! Two ways to answer:
//!
//! - [`answer_question`] retrieves once, stitches the chunks into a QA
//!   prompt and sends it as a single user message.
//! - [`chat_with_tools`] hands the model a `search_knowledge_base` function
//!   and lets it search as many times as it needs, up to
//!   [`MAX_TOOL_ITERATIONS`] rounds, before it answers.
//!
//! Both talk to an OpenAI-compatible `/chat/completions` endpoint or to
//! Ollama's `/api/chat`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, LlmConfig};
use crate::models::ContextChunk;
use crate::search::{retrieve_context, SearchMode};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Rounds of model calls a tool-calling chat may take.
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// Function name offered to the model in [`chat_with_tools`].
pub const SEARCH_TOOL_NAME: &str = "search_knowledge_base";

/// Reply when the model is still calling tools after the last round.
pub const ITERATIONS_EXHAUSTED: &str = "Maximum tool call iterations reached.";

const DEFAULT_TOOL_SEARCH_LIMIT: usize = 5;

const TOOL_INSTRUCTIONS: &str = "You have access to a knowledge base. \
     Use the search_knowledge_base tool to find relevant information when needed.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm provider is disabled; set [llm] provider in config")]
    Disabled,
    #[error("{provider} returned no answer text")]
    EmptyResponse { provider: &'static str },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnswerSource {
    pub path: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<AnswerSource>,
}

/// One message of a chat conversation, in OpenAI wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// The result of tool call `id`.
    pub fn tool(id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(id.to_string()),
            ..Self::new("tool", content)
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

/// `arguments` is a JSON object encoded as a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

/// The assistant message of one model call and why generation stopped.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Result of [`chat_with_tools`].
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub answer: String,
    pub finish_reason: String,
    /// Search calls executed on behalf of the model.
    pub tool_calls_made: usize,
    /// Distinct documents the searches returned, first hit first.
    pub sources: Vec<AnswerSource>,
}

/// A chat-completion client for one configured backend.
pub enum LlmClient {
    OpenAi {
        client: reqwest::Client,
        url: String,
        model: String,
        api_key: String,
        temperature: f32,
        max_tokens: u32,
    },
    Ollama {
        client: reqwest::Client,
        url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
    },
}

impl LlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if !config.is_enabled() {
            return Err(LlmError::Disabled.into());
        }
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model must be specified"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        match config.provider.as_str() {
            "openai" => Ok(LlmClient::OpenAi {
                client,
                url: config
                    .url
                    .clone()
                    .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
                model,
                api_key: std::env::var("OPENAI_API_KEY")
                    .context("OPENAI_API_KEY environment variable not set")?,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            }),
            "ollama" => Ok(LlmClient::Ollama {
                client,
                url: config
                    .url
                    .clone()
                    .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
                model,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            }),
            other => anyhow::bail!("Unknown llm provider: {}", other),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmClient::OpenAi { model, .. } | LlmClient::Ollama { model, .. } => model,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            LlmClient::OpenAi { .. } => "openai",
            LlmClient::Ollama { .. } => "ollama",
        }
    }

    /// Send `prompt` as a single user message and return the reply text.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let turn = self.chat(&[ChatMessage::user(prompt)], &[]).await?;
        turn.message.content.ok_or_else(|| {
            LlmError::EmptyResponse {
                provider: self.provider_name(),
            }
            .into()
        })
    }

    /// One model call over `messages`, offering `tools` (OpenAI function
    /// definitions) when non-empty.
    pub async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatTurn> {
        let turn = match self {
            LlmClient::OpenAi {
                client,
                url,
                model,
                api_key,
                temperature,
                max_tokens,
            } => {
                let mut body = json!({
                    "model": model,
                    "messages": messages,
                    "temperature": temperature,
                    "max_tokens": max_tokens,
                });
                if !tools.is_empty() {
                    body["tools"] = json!(tools);
                    body["tool_choice"] = json!("auto");
                }
                let json = post(client, &format!("{}/chat/completions", url.trim_end_matches('/')), Some(api_key), &body).await?;
                parse_openai_turn(&json)
            }
            LlmClient::Ollama {
                client,
                url,
                model,
                temperature,
                max_tokens,
            } => {
                let mut body = json!({
                    "model": model,
                    "messages": messages.iter().map(ollama_message).collect::<Vec<_>>(),
                    "stream": false,
                    "options": { "temperature": temperature, "num_predict": max_tokens },
                });
                if !tools.is_empty() {
                    body["tools"] = json!(tools);
                }
                let json = post(client, &format!("{}/api/chat", url.trim_end_matches('/')), None, &body).await?;
                parse_ollama_turn(&json)
            }
        };

        turn.ok_or_else(|| {
            LlmError::EmptyResponse {
                provider: self.provider_name(),
            }
            .into()
        })
    }
}

/// Read `choices[0]` of an OpenAI chat-completion response.
pub fn parse_openai_turn(json: &Value) -> Option<ChatTurn> {
    let choice = json.pointer("/choices/0")?;
    let message: ChatMessage = serde_json::from_value(choice.get("message")?.clone()).ok()?;
    Some(ChatTurn {
        message,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}

/// Read an Ollama `/api/chat` response.
///
/// Ollama sends tool arguments as an object and may omit call ids; both
/// are normalised to the OpenAI shape.
pub fn parse_ollama_turn(json: &Value) -> Option<ChatTurn> {
    let message = json.get("message")?;
    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, call)| {
                    let function = call.get("function")?;
                    let arguments = match &function["arguments"] {
                        Value::String(s) => s.clone(),
                        Value::Null => "{}".to_string(),
                        other => other.to_string(),
                    };
                    Some(ToolCall {
                        id: call["id"]
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("call_{}", i)),
                        kind: function_kind(),
                        function: FunctionCall {
                            name: function["name"].as_str()?.to_string(),
                            arguments,
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ChatTurn {
        message: ChatMessage {
            role: message["role"].as_str().unwrap_or("assistant").to_string(),
            content: message["content"].as_str().map(str::to_string),
            tool_calls,
            tool_call_id: None,
        },
        finish_reason: json["done_reason"].as_str().map(str::to_string),
    })
}

fn ollama_message(message: &ChatMessage) -> Value {
    let mut out = json!({ "role": message.role, "content": message.text() });
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                let arguments: Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
                json!({ "function": { "name": call.function.name, "arguments": arguments } })
            })
            .collect();
    }
    out
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("LLM request to {} failed", url))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("LLM API error {}: {}", status, text);
    }
    Ok(response.json().await?)
}

/// Fill the QA template with the retrieved chunks and the question.
pub fn build_prompt(system_prompt: &str, contexts: &[ContextChunk], question: &str) -> String {
    let context_str = contexts
        .iter()
        .map(|c| format!("source_path: {}\n\n{}", c.source_path, c.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = String::new();
    if !system_prompt.trim().is_empty() {
        prompt.push_str(system_prompt.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Context information is below.\n");
    prompt.push_str("---------------------\n");
    prompt.push_str(&context_str);
    prompt.push_str("\n---------------------\n");
    prompt.push_str("Given the context information and not prior knowledge, answer the query.\n");
    prompt.push_str(&format!("Query: {}\n", question));
    prompt.push_str("Answer: ");
    prompt
}

/// Retrieve context for `question` and ask the configured model.
pub async fn answer_question(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
) -> Result<Answer> {
    let client = LlmClient::from_config(&config.llm)?;

    let contexts = retrieve_context(config, question, answer_mode(config), top_k).await?;
    let prompt = build_prompt(&config.llm.system_prompt, &contexts, question);

    tracing::debug!(model = client.model(), contexts = contexts.len(), "asking llm");
    let answer = client.complete(&prompt).await?;

    Ok(Answer {
        answer: answer.trim().to_string(),
        sources: contexts
            .iter()
            .map(|c| AnswerSource {
                path: c.source_path.clone(),
                score: c.score,
            })
            .collect(),
    })
}

/// Hybrid when embeddings are configured, keyword otherwise.
fn answer_mode(config: &Config) -> SearchMode {
    if config.embedding.is_enabled() {
        SearchMode::Hybrid
    } else {
        SearchMode::Keyword
    }
}

/// The `search_knowledge_base` function definition offered to the model.
pub fn search_tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": SEARCH_TOOL_NAME,
            "description": "Search the indexed documents for relevant information. \
                Use this when you need specific information from the knowledge base to answer a question.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to find relevant passages"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results to return (default: 5)",
                        "default": DEFAULT_TOOL_SEARCH_LIMIT
                    }
                },
                "required": ["query"]
            }
        }
    })
}

/// Answer the conversation in `history`, letting the model search the
/// knowledge base through function calls.
///
/// Each round sends the conversation so far. A reply without tool calls is
/// the answer. Otherwise every call is executed, its result appended as a
/// `tool` message, and the model is asked again. After
/// [`MAX_TOOL_ITERATIONS`] rounds the chat ends with
/// [`ITERATIONS_EXHAUSTED`] and finish reason `length`.
pub async fn chat_with_tools(config: &Config, history: &[ChatMessage]) -> Result<ChatOutcome> {
    let client = LlmClient::from_config(&config.llm)?;
    let tools = [search_tool_definition()];

    let system = if config.llm.system_prompt.trim().is_empty() {
        TOOL_INSTRUCTIONS.to_string()
    } else {
        format!("{}\n\n{}", config.llm.system_prompt.trim(), TOOL_INSTRUCTIONS)
    };
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().cloned());

    let mut sources: Vec<AnswerSource> = Vec::new();
    let mut tool_calls_made = 0;

    for round in 0..MAX_TOOL_ITERATIONS {
        let turn = client.chat(&messages, &tools).await?;
        if turn.message.tool_calls.is_empty() {
            return Ok(ChatOutcome {
                answer: turn.message.text().trim().to_string(),
                finish_reason: turn.finish_reason.unwrap_or_else(|| "stop".to_string()),
                tool_calls_made,
                sources,
            });
        }

        tracing::debug!(round, calls = turn.message.tool_calls.len(), "model requested tools");
        let calls = turn.message.tool_calls.clone();
        messages.push(turn.message);
        for call in &calls {
            let result = run_tool_call(config, call, &mut sources).await;
            tool_calls_made += 1;
            messages.push(ChatMessage::tool(&call.id, result.to_string()));
        }
    }

    Ok(ChatOutcome {
        answer: ITERATIONS_EXHAUSTED.to_string(),
        finish_reason: "length".to_string(),
        tool_calls_made,
        sources,
    })
}

/// Execute one model-requested call. Failures go back to the model as an
/// `error` object rather than ending the chat.
async fn run_tool_call(config: &Config, call: &ToolCall, sources: &mut Vec<AnswerSource>) -> Value {
    if call.function.name != SEARCH_TOOL_NAME {
        return json!({ "error": format!("unknown tool: {}", call.function.name) });
    }
    let args: Value = match serde_json::from_str(&call.function.arguments) {
        Ok(args) => args,
        Err(e) => return json!({ "error": format!("arguments are not valid JSON: {}", e) }),
    };
    let query = args["query"].as_str().unwrap_or("").trim();
    if query.is_empty() {
        return json!({ "error": "query must not be empty" });
    }
    let limit = args["limit"]
        .as_u64()
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_TOOL_SEARCH_LIMIT)
        .max(1);

    match retrieve_context(config, query, answer_mode(config), Some(limit)).await {
        Ok(contexts) => {
            for c in &contexts {
                if !sources.iter().any(|s| s.path == c.source_path) {
                    sources.push(AnswerSource {
                        path: c.source_path.clone(),
                        score: c.score,
                    });
                }
            }
            let results: Vec<Value> = contexts
                .iter()
                .map(|c| json!({ "content": c.content, "source": c.source_path, "score": c.score }))
                .collect();
            json!(results)
        }
        Err(e) => {
            tracing::warn!(error = %e, query, "search tool call failed");
            json!({ "error": format!("{:#}", e) })
        }
    }
}

/// CLI entry point for `lore ask`.
pub async fn run_ask(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let answer = answer_question(config, question, top_k).await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!("  {}. {} ({:.2})", i + 1, source.path, source.score);
        }
    }
    Ok(())
}
