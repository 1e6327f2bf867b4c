use serde_json::json;

use crate::ipc::error::{err, hierarchy_err, ok};
use crate::ipc::helpers::{parse_param, require_session};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::Actor;
use crate::scope::resolve_scope;
use crate::store::SqliteGateway;

fn handle_session_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor: Actor = match parse_param(req, "actor") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scope = match resolve_scope(&actor) {
        Ok(s) => s,
        Err(e) => return hierarchy_err(&req.id, &e),
    };

    let gateway = SqliteGateway::new(conn.clone()).for_actor(&actor);
    state.screens.clear();
    let result = json!({ "actor": &actor, "scope": &scope });
    state.session = Some(Session {
        actor,
        scope,
        gateway,
    });
    ok(&req.id, result)
}

fn handle_session_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match require_session(&state.session, req) {
        Ok(s) => ok(
            &req.id,
            json!({
                "actor": &s.actor,
                "scope": &s.scope,
                "screens": state.screens.keys().collect::<Vec<_>>(),
            }),
        ),
        Err(resp) => resp,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.start" => Some(handle_session_start(state, req)),
        "session.get" => Some(handle_session_get(state, req)),
        _ => None,
    }
}
