use std::path::PathBuf;

use serde::Deserialize;

use crate::roster::RosterService;
use crate::session::SessionRegistry;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub max_tree_depth: usize,
    pub sessions: SessionRegistry,
    pub roster: RosterService,
}

impl AppState {
    pub fn new(max_tree_depth: usize) -> Self {
        AppState {
            workspace: None,
            max_tree_depth,
            sessions: SessionRegistry::default(),
            roster: RosterService::default(),
        }
    }
}
