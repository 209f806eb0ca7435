//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::assessment::{AssessmentCore, AssessmentEngine};
use crate::config::Config;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Assessment turn engine.
    pub engine: AssessmentEngine,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, core: AssessmentCore) -> Self {
        tracing::info!(
            grader_pipe = %config.pipes.grader,
            items = core.item_bank().len(),
            ttl_hours = config.assessment.session_ttl_hours,
            "AppState initializing"
        );

        let engine = AssessmentEngine::new(core, config.assessment.clone());
        Self { config, engine }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
