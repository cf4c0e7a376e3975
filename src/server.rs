//! HTTP API over the knowledge base.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Landing page listing the endpoints |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/models` | OpenAI-style model list |
//! | `POST` | `/search` | Retrieve context chunks for a query |
//! | `POST` | `/answer` | Answer the last user message from one retrieval |
//! | `POST` | `/chat` | Multi-step chat; the model searches through tool calls |
//! | `POST` | `/timeline` | Chronological entries in a year range |
//! | `GET`  | `/tools/list` | Registered tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a registered tool by name |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint over the same tools |
//!
//! MCP clients connect with:
//!
//! ```json
//! { "mcpServers": { "lorekeeper": { "url": "http://127.0.0.1:7331/mcp" } } }
//! ```
//!
//! Errors share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `llm_disabled` (400), `tool_error` (500), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::llm::{answer_question, chat_with_tools, ChatMessage, LlmError};
use crate::mcp::mcp_service;
use crate::search::{retrieve_context, SearchMode};
use crate::timeline::fetch_timeline;
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};

/// Model id reported by `/models` and `/search`.
pub const INDEX_MODEL_ID: &str = "lorekeeper-index-retrieval";

const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
}

/// Build the application router with the built-in tools registered.
pub fn build_router(config: Arc<Config>) -> Router {
    build_router_with_tools(config, ToolRegistry::with_builtins())
}

/// Like [`build_router`], serving the given registry instead of the built-ins.
pub fn build_router_with_tools(config: Arc<Config>, tools: ToolRegistry) -> Router {
    let tools = Arc::new(tools);
    let mcp = mcp_service(config.clone(), tools.clone());
    let state = AppState { config, tools };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/models", get(handle_models))
        .route("/search", post(handle_search))
        .route("/answer", post(handle_answer))
        .route("/chat", post(handle_chat))
        .route("/timeline", post(handle_timeline))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp)
        .layer(cors)
        .with_state(state)
}

/// Serve on an already bound listener until the process stops.
pub async fn serve_on(listener: tokio::net::TcpListener, config: Arc<Config>) -> anyhow::Result<()> {
    axum::serve(listener, build_router(config)).await?;
    Ok(())
}

/// Bind `[server] bind` and serve. Entry point for `lore serve mcp`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "lorekeeper server listening");
    println!("Listening on http://{}", bind_addr);
    serve_on(listener, Arc::new(config.clone())).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

/// Map a failure from the core functions onto an HTTP error.
///
/// `fallback` is the code used when nothing more specific applies.
fn classify_error(err: anyhow::Error, fallback: &'static str) -> AppError {
    if let Some(LlmError::Disabled) = err.downcast_ref::<LlmError>() {
        return AppError {
            status: StatusCode::BAD_REQUEST,
            code: "llm_disabled",
            message: err.to_string(),
        };
    }

    let message = format!("{:#}", err);
    if message.contains("requires embeddings") {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled",
            message,
        }
    } else if message.contains("not found") {
        not_found(message)
    } else if message.contains("must not be empty")
        || message.contains("must be at least")
        || message.contains("Unknown search mode")
    {
        bad_request(message)
    } else {
        tracing::warn!(error = %message, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: fallback,
            message,
        }
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ GET / ============

async fn handle_index() -> Json<Value> {
    Json(json!({
        "name": "Lorekeeper API Server",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Retrieval over a worldbuilding knowledge base",
        "endpoints": [
            { "path": "/health", "method": "GET", "description": "Health check" },
            { "path": "/models", "method": "GET", "description": "List available models" },
            {
                "path": "/search",
                "method": "POST",
                "description": "Context chunks matching a query",
                "parameters": {
                    "query": "The search query string",
                    "limit": "Number of results to return (default: 5)",
                    "mode": "keyword, semantic or hybrid (optional)"
                }
            },
            {
                "path": "/answer",
                "method": "POST",
                "description": "Answer the last user message from a single retrieval",
                "parameters": {
                    "messages": "Array of chat messages with role and content",
                    "top_k": "Chunks of context (optional)"
                }
            },
            {
                "path": "/chat",
                "method": "POST",
                "description": "Chat that searches the knowledge base as often as it needs",
                "parameters": {
                    "messages": "Array of chat messages with role and content"
                }
            },
            {
                "path": "/timeline",
                "method": "POST",
                "description": "Dated passages in chronological order",
                "parameters": {
                    "start_year": "Inclusive lower bound (optional)",
                    "end_year": "Inclusive upper bound (optional)",
                    "limit": "Max entries (optional)"
                }
            },
            { "path": "/tools/list", "method": "GET", "description": "Registered tools" },
            { "path": "/tools/{name}", "method": "POST", "description": "Call a tool" },
            { "path": "/mcp", "method": "POST", "description": "MCP Streamable HTTP endpoint" }
        ]
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /models ============

async fn handle_models() -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": INDEX_MODEL_ID,
            "object": "model",
            "created": unix_now(),
            "owned_by": "lorekeeper",
        }]
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    mode: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Value>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let mode: SearchMode = match req.mode.as_deref() {
        Some(m) => m.parse().map_err(|e: anyhow::Error| bad_request(e.to_string()))?,
        None => SearchMode::Keyword,
    };
    let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);

    let contexts = retrieve_context(&state.config, &req.query, mode, Some(limit))
        .await
        .map_err(|e| classify_error(e, "internal"))?;

    let data: Vec<Value> = contexts
        .iter()
        .map(|c| {
            json!({
                "id": c.chunk_id,
                "content": c.content,
                "metadata": {
                    "source_path": c.source_path,
                    "document_id": c.document_id,
                    "score": c.score,
                }
            })
        })
        .collect();

    Ok(Json(json!({
        "object": "list",
        "data": data,
        "model": INDEX_MODEL_ID,
        "usage": { "total_tokens": 0 },
    })))
}

// ============ POST /answer ============

#[derive(Deserialize)]
struct AnswerRequest {
    messages: Vec<ChatMessage>,
    top_k: Option<usize>,
}

fn last_user_message(messages: &[ChatMessage]) -> Result<&str, AppError> {
    let question = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.text())
        .ok_or_else(|| bad_request("No user message found in the chat history"))?;
    if question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(question)
}

fn answer_model(config: &Config) -> String {
    config
        .llm
        .model
        .clone()
        .unwrap_or_else(|| INDEX_MODEL_ID.to_string())
}

async fn handle_answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<Value>, AppError> {
    let question = last_user_message(&req.messages)?;

    let answer = answer_question(&state.config, question, req.top_k)
        .await
        .map_err(|e| classify_error(e, "internal"))?;

    let created = unix_now();
    Ok(Json(json!({
        "id": format!("chatcmpl-{}", created),
        "object": "chat.completion",
        "created": created,
        "model": answer_model(&state.config),
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": answer.answer },
            "finish_reason": "stop",
        }],
        "sources": answer.sources,
        "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
    })))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, AppError> {
    last_user_message(&req.messages)?;

    let outcome = chat_with_tools(&state.config, &req.messages)
        .await
        .map_err(|e| classify_error(e, "internal"))?;

    let created = unix_now();
    Ok(Json(json!({
        "id": format!("chatcmpl-{}", created),
        "object": "chat.completion",
        "created": created,
        "model": answer_model(&state.config),
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": outcome.answer },
            "finish_reason": outcome.finish_reason,
        }],
        "tool_calls_made": outcome.tool_calls_made,
        "sources": outcome.sources,
        "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
    })))
}

// ============ POST /timeline ============

#[derive(Deserialize, Default)]
struct TimelineRequest {
    start_year: Option<i64>,
    end_year: Option<i64>,
    limit: Option<usize>,
}

async fn handle_timeline(
    State(state): State<AppState>,
    Json(req): Json<TimelineRequest>,
) -> Result<Json<Value>, AppError> {
    if req.limit == Some(0) {
        return Err(bad_request("limit must be at least 1"));
    }
    let entries = fetch_timeline(&state.config, req.start_year, req.end_year, req.limit)
        .await
        .map_err(|e| classify_error(e, "internal"))?;
    Ok(Json(json!({ "entries": entries })))
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let validated = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let ctx = ToolContext::new(state.config.clone());
    let result = tool.execute(validated, &ctx).await.map_err(|e| {
        let mut err = classify_error(e, "tool_error");
        err.message = format!("{}: {}", name, err.message);
        err
    })?;

    Ok(Json(json!({ "result": result })))
}
