use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::calendar::Calendar;
use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
}

impl AppState {
    pub fn calendar(&self, year: i32) -> Calendar {
        let source = self.config.holiday_source(self.workspace.as_deref());
        Calendar::load(year, source.as_ref(), self.config.poya_anchor())
    }
}
