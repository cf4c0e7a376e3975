//! # Lorekeeper
//!
//! A local-first retrieval-augmented knowledge base for long-form
//! worldbuilding notes.
//!
//! Markdown files are annotated before chunking: every section gets a
//! breadcrumb line naming its heading path (`[History > Founding > Year
//! 6050]`), so each chunk carries its place in the document and, where a
//! heading names a date, its year. Keyword (FTS5), semantic and hybrid
//! search run over the chunks, and the timeline answers "what happened
//! between these years" straight from the breadcrumbs.
//!
//! ```text
//! ┌─────────────┐   ┌─────────────────┐   ┌──────────┐
//! │ Filesystem  │──▶│ Breadcrumbs     │──▶│  SQLite   │
//! │ (.md, .pdf) │   │ Chunk + Embed   │   │ FTS5+Vec  │
//! └─────────────┘   └─────────────────┘   └────┬─────┘
//!                                              │
//!                   ┌──────────────┬───────────┤
//!                   ▼              ▼           ▼
//!              ┌─────────┐   ┌──────────┐ ┌──────────┐
//!              │ Search  │   │ Timeline │ │   Ask    │
//!              └─────────┘   └──────────┘ └──────────┘
//!             CLI (`lore`), HTTP server and MCP endpoint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`heading`] | Markdown ATX heading recognition |
//! | [`temporal`] | Date-like heading titles to `Year N` |
//! | [`breadcrumb`] | Heading-path annotation of documents |
//! | [`timeline`] | Year extraction and chronological retrieval |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`connector_fs`] | Filesystem connector |
//! | [`extract`] | PDF text extraction |
//! | [`convert`] | PDF to Markdown conversion |
//! | [`chunk`] | Heading-aware text chunking |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`ingest`] | Index build pipeline |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Embedding backfill and rebuild |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`llm`] | Question answering and tool-calling chat |
//! | [`tools`] | Tool registry shared by HTTP and MCP |
//! | [`mcp`] | Model Context Protocol bridge |
//! | [`server`] | HTTP server |
//! | [`get`] | Stored document lookup |
//! | [`stats`] | Index overview |

pub mod breadcrumb;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod convert;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod heading;
pub mod ingest;
pub mod llm;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod stats;
pub mod temporal;
pub mod timeline;
pub mod tools;
