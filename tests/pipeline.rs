//! End-to-end tests through the library API and the HTTP server.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use lorekeeper::breadcrumb;
use lorekeeper::config::{load_config, Config};
use lorekeeper::ingest::{build_index, index_documents};
use lorekeeper::migrate;
use lorekeeper::models::SourceItem;
use lorekeeper::search::{retrieve_context, SearchMode};
use lorekeeper::server::{build_router_with_tools, run_server};
use lorekeeper::timeline::fetch_timeline;
use lorekeeper::tools::{Tool, ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(tmp: &TempDir, port: u16) -> Config {
    let root = tmp.path();
    let files = root.join("files");
    fs::create_dir_all(&files).unwrap();
    fs::write(
        files.join("chronicle.md"),
        "# Chronicle\n\n## 6050\nVaros is founded on the river delta.\n\n## 6120\nThe great flood drowns the lower markets.\n",
    )
    .unwrap();
    fs::write(
        files.join("guilds.md"),
        "# Guilds\n\n## Cartographers\nThe cartographers chart the northern reaches.\n",
    )
    .unwrap();

    let config_path = root.join("lore.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/lore.sqlite"

[server]
bind = "127.0.0.1:{}"

[connectors.filesystem]
root = "{}"
"#,
            root.display(),
            port,
            files.display()
        ),
    )
    .unwrap();

    load_config(&config_path).unwrap()
}

async fn indexed_config(tmp: &TempDir, port: u16) -> Config {
    let cfg = test_config(tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();
    build_index(&cfg, false, None).await.unwrap();
    cfg
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn spawn_server(cfg: &Config, port: u16) -> tokio::task::JoinHandle<()> {
    let cfg = cfg.clone();
    let handle = tokio::spawn(async move {
        run_server(&cfg).await.unwrap();
    });
    wait_for_server(port).await;
    handle
}

// ─── Library pipeline ───────────────────────────────────────────────

#[tokio::test]
async fn test_index_then_timeline() {
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, 0).await;

    let entries = fetch_timeline(&cfg, None, None, None).await.unwrap();
    let years: Vec<i64> = entries.iter().map(|e| e.year).collect();
    assert_eq!(years, vec![6050, 6120]);
    assert!(entries.iter().all(|e| e.source_path == "chronicle.md"));
    assert!(entries[0].content.contains("[Chronicle > Year 6050]"));

    let later = fetch_timeline(&cfg, Some(6100), None, Some(5)).await.unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].year, 6120);
}

#[tokio::test]
async fn test_incremental_index_skips_unchanged() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();

    let first = build_index(&cfg, false, None).await.unwrap();
    assert_eq!(first.documents_ingested, 2);
    assert_eq!(first.embeddings_pending, 0);

    let second = build_index(&cfg, false, None).await.unwrap();
    assert_eq!(second.documents_ingested, 0);

    let full = build_index(&cfg, true, None).await.unwrap();
    assert_eq!(full.documents_ingested, 2);
}

#[tokio::test]
async fn test_keyword_search_returns_context() {
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, 0).await;

    let results = retrieve_context(&cfg, "flood", SearchMode::Keyword, Some(3))
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].source_path, "chronicle.md");
    assert!(results[0].content.contains("[Chronicle > Year 6120]"));

    let empty = retrieve_context(&cfg, "   ", SearchMode::Keyword, None)
        .await
        .unwrap();
    assert!(empty.is_empty());

    let err = retrieve_context(&cfg, "flood", SearchMode::Hybrid, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("requires embeddings"));
}

#[tokio::test]
async fn test_annotated_items_from_other_loaders() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();

    let now = Utc::now();
    let item = SourceItem {
        source: "notes".into(),
        source_id: "wars.md".into(),
        source_url: None,
        title: Some("Wars".into()),
        author: None,
        created_at: now,
        updated_at: now,
        content_type: "text/markdown".into(),
        body: "# Wars\n## c. 5990\nThe border skirmishes begin.".into(),
        metadata_json: json!({ "source_path": "wars.md" }).to_string(),
        raw_json: None,
    };

    let pool = lorekeeper::db::connect(&cfg).await.unwrap();
    let stats = index_documents(&cfg, &pool, &breadcrumb::annotate(vec![item]))
        .await
        .unwrap();
    pool.close().await;
    assert_eq!(stats.documents_ingested, 1);

    let entries = fetch_timeline(&cfg, None, Some(6000), None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].year, 5990);
    assert_eq!(entries[0].source_path, "wars.md");
    assert!(entries[0].content.contains("[Wars > circa Year 5990]"));
}

// ─── HTTP server ────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_read_endpoints() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, port).await;
    let handle = spawn_server(&cfg, port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let models: Value = client
        .get(format!("{}/models", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["object"], "list");
    assert_eq!(models["data"][0]["id"], "lorekeeper-index-retrieval");

    let landing: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    let paths: Vec<&str> = landing["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"/search"));
    assert!(paths.contains(&"/timeline"));

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "flood" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["model"], "lorekeeper-index-retrieval");
    assert_eq!(body["data"][0]["metadata"]["source_path"], "chronicle.md");

    let resp = client
        .post(format!("{}/timeline", base))
        .json(&json!({ "start_year": 6000, "end_year": 6100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["year"], 6050);

    handle.abort();
}

#[tokio::test]
async fn test_http_error_contract() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, port).await;
    let handle = spawn_server(&cfg, port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({ "query": "flood", "mode": "hybrid" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "embeddings_disabled");

    for path in ["answer", "chat"] {
        let resp = client
            .post(format!("{}/{}", base, path))
            .json(&json!({ "messages": [{ "role": "user", "content": "When was Varos founded?" }] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "/{}", path);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "llm_disabled", "/{}", path);
    }

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "messages": [{ "role": "system", "content": "hi" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/timeline", base))
        .json(&json!({ "limit": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handle.abort();
}

#[tokio::test]
async fn test_http_tools() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, port).await;
    let handle = spawn_server(&cfg, port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let body: Value = client
        .get(format!("{}/tools/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["search", "chat", "timeline", "status"]);

    let resp = client
        .post(format!("{}/tools/timeline", base))
        .json(&json!({ "start_year": 6100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["entries"][0]["year"], 6120);

    let resp = client
        .post(format!("{}/tools/status", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["index"]["documents"], 2);
    assert_eq!(body["result"]["index"]["temporal_chunks"], 2);

    let resp = client
        .post(format!("{}/tools/search", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/tools/nonexistent", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    handle.abort();
}

// ─── Custom tool ────────────────────────────────────────────────────

/// Counts timeline entries in a range.
struct EraSizeTool;

#[async_trait]
impl Tool for EraSizeTool {
    fn name(&self) -> &str {
        "era_size"
    }

    fn description(&self) -> &str {
        "Number of dated passages in a year range"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_year": { "type": "integer" },
                "end_year": { "type": "integer" }
            },
            "required": ["start_year", "end_year"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let entries = ctx
            .timeline(params["start_year"].as_i64(), params["end_year"].as_i64(), None)
            .await?;
        Ok(json!({ "count": entries.len() }))
    }
}

#[tokio::test]
async fn test_custom_tool_served() {
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, 0).await;

    let mut tools = ToolRegistry::with_builtins();
    tools.register(Box::new(EraSizeTool));
    let app = build_router_with_tools(Arc::new(cfg), tools);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    wait_for_server(addr.port()).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("http://{}/tools/list", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let custom = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "era_size")
        .expect("custom tool listed");
    assert_eq!(custom["builtin"], false);

    let resp = client
        .post(format!("http://{}/tools/era_size", addr))
        .json(&json!({ "start_year": 6000, "end_year": 7000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["count"], 2);

    let resp = client
        .post(format!("http://{}/tools/era_size", addr))
        .json(&json!({ "start_year": 6000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handle.abort();
}

// ─── Answer and chat against a stub model ───────────────────────────

async fn spawn_stub(stub: axum::Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, stub).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_answer_with_stub_model() {
    use axum::{routing::post, Json, Router};

    let stub = Router::new().route(
        "/api/chat",
        post(|Json(body): Json<Value>| async move {
            let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
            let answer = if prompt.contains("Varos is founded") {
                "Varos was founded in 6050."
            } else {
                "I do not know."
            };
            Json(json!({ "message": { "role": "assistant", "content": answer } }))
        }),
    );
    let (stub_url, stub_handle) = spawn_stub(stub).await;

    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let mut cfg = indexed_config(&tmp, port).await;
    cfg.llm.provider = "ollama".into();
    cfg.llm.model = Some("stub".into());
    cfg.llm.url = Some(stub_url);
    let handle = spawn_server(&cfg, port).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/answer", port))
        .json(&json!({
            "messages": [
                { "role": "user", "content": "Tell me about the delta" },
                { "role": "assistant", "content": "Which part?" },
                { "role": "user", "content": "Varos founded" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "stub");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "Varos was founded in 6050."
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["sources"][0]["path"], "chronicle.md");

    handle.abort();
    stub_handle.abort();
}

#[tokio::test]
async fn test_chat_searches_through_tool_calls() {
    use axum::{routing::post, Json, Router};

    // First round asks for a search; once a tool result is present, answer from it.
    let stub = Router::new().route(
        "/api/chat",
        post(|Json(body): Json<Value>| async move {
            let messages = body["messages"].as_array().cloned().unwrap_or_default();
            let offered = body["tools"][0]["function"]["name"] == "search_knowledge_base";
            let tool_result = messages
                .iter()
                .find(|m| m["role"] == "tool")
                .and_then(|m| m["content"].as_str())
                .map(str::to_string);
            match tool_result {
                None if offered => Json(json!({
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [{
                            "function": {
                                "name": "search_knowledge_base",
                                "arguments": { "query": "flood", "limit": 3 }
                            }
                        }]
                    }
                })),
                Some(result) if result.contains("great flood") => Json(json!({
                    "message": { "role": "assistant", "content": "The flood came in 6120." },
                    "done_reason": "stop"
                })),
                _ => Json(json!({
                    "message": { "role": "assistant", "content": "I do not know." },
                    "done_reason": "stop"
                })),
            }
        }),
    );
    let (stub_url, stub_handle) = spawn_stub(stub).await;

    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let mut cfg = indexed_config(&tmp, port).await;
    cfg.llm.provider = "ollama".into();
    cfg.llm.model = Some("stub".into());
    cfg.llm.url = Some(stub_url);
    let handle = spawn_server(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({ "messages": [{ "role": "user", "content": "When did the flood happen?" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "The flood came in 6120."
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["tool_calls_made"], 1);
    assert_eq!(body["sources"][0]["path"], "chronicle.md");

    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handle.abort();
    stub_handle.abort();
}

// ─── MCP endpoint ───────────────────────────────────────────────────

#[tokio::test]
async fn test_mcp_endpoint_accepts_initialize() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = indexed_config(&tmp, port).await;
    let handle = spawn_server(&cfg, port).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/mcp", port))
        .header("Accept", "application/json, text/event-stream")
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "pipeline-test", "version": "0.0.0" }
            }
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "status {}", resp.status());
    assert!(resp.headers().contains_key("mcp-session-id"));

    handle.abort();
}
