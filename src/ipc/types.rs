use std::path::PathBuf;

use serde::Deserialize;

use crate::config::PortalConfig;
use crate::portal::Portal;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub portal: Option<Portal>,
    pub config: PortalConfig,
}

impl AppState {
    pub fn new(config: PortalConfig) -> Self {
        Self {
            workspace: None,
            portal: None,
            config,
        }
    }
}
