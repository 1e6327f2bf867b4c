use serde::de::DeserializeOwned;
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::{Request, Session};
use crate::model::Role;

pub const DEFAULT_SCREEN: &str = "main";

pub fn require_session<'a>(
    session: &'a Option<Session>,
    req: &Request,
) -> Result<&'a Session, serde_json::Value> {
    session
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_session", "start a session first", None))
}

pub fn require_admin(session: &Session, req: &Request) -> Result<(), serde_json::Value> {
    if session.actor.role == Role::Admin {
        return Ok(());
    }
    Err(err(
        &req.id,
        "scope_denied",
        format!("{} is reserved to administrators", req.method),
        None,
    ))
}

pub fn str_param(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing params.{key}"), None)),
    }
}

/// Absent, null and blank all read as `None`.
pub fn opt_str_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_param<T: DeserializeOwned>(req: &Request, key: &str) -> Result<T, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing params.{key}"), None));
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid params.{key}: {e}"),
            Some(json!({ "param": key })),
        )
    })
}

pub fn screen_id(req: &Request) -> String {
    opt_str_param(req, "screenId").unwrap_or_else(|| DEFAULT_SCREEN.to_string())
}
