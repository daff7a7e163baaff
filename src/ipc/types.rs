use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::clock::Clock;
use crate::config::Config;

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
    /// Replaced on `workspace.select` with the workspace's `attendanced.toml`.
    pub config: Config,
    pub clock: Box<dyn Clock>,
}

impl AppState {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            workspace: None,
            db: None,
            config: Config::default(),
            clock,
        }
    }
}
