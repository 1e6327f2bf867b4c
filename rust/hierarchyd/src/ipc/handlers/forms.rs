use serde_json::json;

use crate::form::{FieldsPatch, FormKind};
use crate::ipc::error::{err, hierarchy_err, ok};
use crate::ipc::helpers::{opt_str_param, parse_param, require_session, screen_id, str_param};
use crate::ipc::types::{AppState, Request};
use crate::path::Depth;
use crate::projection::ProjectionFilter;
use crate::screen::Screen;

fn form_response(req: &Request, screen_id: &str, screen: &Screen) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "screenId": screen_id,
            "form": screen.form().session(),
        }),
    )
}

fn kind_param(req: &Request) -> Result<FormKind, serde_json::Value> {
    let raw = str_param(req, "kind")?;
    FormKind::parse(&raw)
        .ok_or_else(|| err(&req.id, "bad_params", format!("unknown kind: {raw}"), None))
}

fn no_screen(req: &Request, screen_id: &str) -> serde_json::Value {
    err(
        &req.id,
        "no_screen",
        format!("screen {screen_id} is not open"),
        None,
    )
}

async fn handle_open_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let kind = match kind_param(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    screen.open_create(&session.gateway, kind).await;
    form_response(req, &id, screen)
}

async fn handle_open_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let kind = match kind_param(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let record_id = match str_param(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    match screen.open_edit(&session.gateway, kind, &record_id).await {
        Ok(()) => form_response(req, &id, screen),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

async fn handle_change_ancestor(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        .change_ancestor(&session.gateway, depth, opt_str_param(req, "id"))
        .await
    {
        Ok(()) => form_response(req, &id, screen),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

fn handle_patch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let patch: FieldsPatch = match parse_param(req, "fields") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    match screen.patch_form(patch) {
        Ok(()) => form_response(req, &id, screen),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

async fn handle_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    screen.reset_form(&session.gateway).await;
    form_response(req, &id, screen)
}

fn handle_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = screen_id(req);
    let Some(screen) = state.screens.get(&id) else {
        return no_screen(req, &id);
    };
    let form = screen.form().session();
    ok(
        &req.id,
        json!({
            "screenId": id,
            "form": form,
            "dirty": form.map(|f| f.is_dirty()).unwrap_or(false),
        }),
    )
}

async fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    match screen.submit_form(&session.gateway).await {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "screenId": id,
                "outcome": outcome,
                "view": screen.projection(&ProjectionFilter::default()),
            }),
        ),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = screen_id(req);
    let Some(screen) = state.screens.get_mut(&id) else {
        return no_screen(req, &id);
    };
    screen.close_form();
    form_response(req, &id, screen)
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "form.openCreate" => Some(handle_open_create(state, req).await),
        "form.openEdit" => Some(handle_open_edit(state, req).await),
        "form.changeAncestor" => Some(handle_change_ancestor(state, req).await),
        "form.patch" => Some(handle_patch(state, req)),
        "form.reset" => Some(handle_reset(state, req).await),
        "form.state" => Some(handle_state(state, req)),
        "form.submit" => Some(handle_submit(state, req).await),
        "form.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
