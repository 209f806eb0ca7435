//! # MCP Adaptive Assessment Server
//!
//! A Model Context Protocol (MCP) server that runs adaptive diagnostic math
//! assessments. A session has two phases:
//!
//! - **Screener**: computerized adaptive testing under the 2PL IRT model.
//!   Ability is re-estimated after every answer (Bayesian MAP), the next item
//!   is the most informative one near the estimate, and a multi-criterion
//!   stopping rule decides when the estimate is good enough.
//! - **Interview**: a few free-text questions on the skills at the learner's
//!   frontier, graded by an external grader (a Langbase pipe by default).
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → AssessmentEngine → Grader (Langbase Pipes, HTTP)
//!                                        ↓
//!                                  SQLite (sessions)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_adaptive_assessment::assessment::{AssessmentCore, LangbaseGrader};
//! use mcp_adaptive_assessment::item_bank::InMemoryItemBank;
//! use mcp_adaptive_assessment::langbase::LangbaseClient;
//! use mcp_adaptive_assessment::storage::SqliteStorage;
//! use mcp_adaptive_assessment::{AppState, Config, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let grader = LangbaseGrader::new(langbase, &config);
//!     let bank = InMemoryItemBank::from_json_file(&config.assessment.item_bank_path)?;
//!     let core = AssessmentCore::new(Arc::new(storage), Arc::new(grader), Arc::new(bank));
//!     McpServer::new(Arc::new(AppState::new(config, core))).run().await?;
//!     Ok(())
//! }
//! ```

/// Session lifecycle, interview and turn engine.
pub mod assessment;
/// Psychometric core: estimation, selection, stopping rules, frontier.
pub mod cat;
/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Read-only item catalog.
pub mod item_bank;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// Prompts and templates for interview questions and grading.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
