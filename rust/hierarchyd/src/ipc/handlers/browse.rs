use serde_json::json;

use crate::ipc::error::{err, hierarchy_err, ok};
use crate::ipc::helpers::{opt_str_param, require_session, screen_id, str_param};
use crate::ipc::types::{AppState, Request};
use crate::path::{Depth, ListKind};
use crate::projection::ProjectionFilter;
use crate::screen::Screen;

fn view_response(req: &Request, screen_id: &str, screen: &Screen) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "screenId": screen_id,
            "view": screen.projection(&ProjectionFilter::default()),
        }),
    )
}

fn no_screen(req: &Request, screen_id: &str) -> serde_json::Value {
    err(
        &req.id,
        "no_screen",
        format!("screen {screen_id} is not open"),
        None,
    )
}

async fn handle_screen_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let mut screen = Screen::new(session.scope.clone());
    screen.mount(&session.gateway).await;
    let resp = view_response(req, &id, &screen);
    state.screens.insert(id, screen);
    resp
}

fn handle_screen_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = screen_id(req);
    let closed = state.screens.remove(&id).is_some();
    ok(&req.id, json!({ "screenId": id, "closed": closed }))
}

async fn handle_screen_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let depth = match str_param(req, "depth") {
        Ok(raw) => match Depth::parse(&raw) {
            Some(d) => d,
            None => return err(&req.id, "bad_params", format!("unknown depth: {raw}"), None),
        },
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };

    match screen
        .select(&session.gateway, depth, opt_str_param(req, "id"))
        .await
    {
        Ok(()) => view_response(req, &id, screen),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

fn handle_screen_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let params = if req.params.is_null() {
        json!({})
    } else {
        req.params.clone()
    };
    let filter: ProjectionFilter = match serde_json::from_value(params) {
        Ok(f) => f,
        Err(e) => return err(&req.id, "bad_params", format!("invalid filter: {e}"), None),
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get(&id) else {
        return no_screen(req, &id);
    };
    ok(
        &req.id,
        json!({ "screenId": id, "view": screen.projection(&filter) }),
    )
}

async fn handle_screen_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let list = match str_param(req, "list") {
        Ok(raw) => match ListKind::parse(&raw) {
            Some(l) => l,
            None => return err(&req.id, "bad_params", format!("unknown list: {raw}"), None),
        },
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    screen.reload(&session.gateway, list).await;
    view_response(req, &id, screen)
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "screen.open" => Some(handle_screen_open(state, req).await),
        "screen.close" => Some(handle_screen_close(state, req)),
        "screen.select" => Some(handle_screen_select(state, req).await),
        "screen.view" => Some(handle_screen_view(state, req)),
        "screen.refresh" => Some(handle_screen_refresh(state, req).await),
        _ => None,
    }
}
