use serde_json::json;

use crate::error::{GatewayError, HierarchyError};

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn hierarchy_err(id: &str, e: &HierarchyError) -> serde_json::Value {
    err(id, e.code(), e.user_message(), e.details())
}

/// Direct record calls that bypass the form controller.
pub fn gateway_err(id: &str, e: &GatewayError) -> serde_json::Value {
    match e {
        GatewayError::Conflict { kind, id: record, dependents } => err(
            id,
            "conflict",
            e.to_string(),
            Some(json!({ "kind": kind, "id": record, "dependents": dependents })),
        ),
        GatewayError::NotFound { kind, id: record } => err(
            id,
            "not_found",
            e.to_string(),
            Some(json!({ "kind": kind, "id": record })),
        ),
        GatewayError::Forbidden(_) => err(id, "scope_denied", e.to_string(), None),
        GatewayError::Failed(_) => err(id, "save_failed", e.to_string(), None),
    }
}
