use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Deserialize;

use crate::model::Actor;
use crate::scope::ScopeContext;
use crate::screen::Screen;
use crate::store::SqliteGateway;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The acting user and the gateway bound to them.
pub struct Session {
    pub actor: Actor,
    pub scope: ScopeContext,
    pub gateway: SqliteGateway,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Arc<Mutex<Connection>>>,
    pub session: Option<Session>,
    /// Open screens keyed by the host-chosen screen id.
    pub screens: HashMap<String, Screen>,
}
