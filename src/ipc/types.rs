use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::grading::GradingSystem;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub grading: GradingSystem,
    /// Startup system; active for any workspace that pins none of its own.
    pub default_grading: GradingSystem,
}

impl AppState {
    pub fn new(grading: GradingSystem) -> Self {
        Self {
            workspace: None,
            db: None,
            default_grading: grading.clone(),
            grading,
        }
    }
}
