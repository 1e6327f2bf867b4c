use serde_json::json;

use crate::form::FormKind;
use crate::gateway::{CourseCatalog, HierarchyWriter};
use crate::ipc::error::{err, gateway_err, hierarchy_err, ok};
use crate::ipc::helpers::{parse_param, require_admin, require_session, screen_id, str_param};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::{CourseAssignmentDraft, CourseDraft, Role, UserDraft};
use crate::projection::ProjectionFilter;
use crate::scope::ScopedWriter;

fn require_chief(session: &Session, req: &Request) -> Result<(), serde_json::Value> {
    if session.actor.role == Role::Chief {
        return Ok(());
    }
    Err(err(
        &req.id,
        "scope_denied",
        format!("{} is only available to department chiefs", req.method),
        None,
    ))
}

async fn handle_entities_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let kind = match str_param(req, "kind") {
        Ok(raw) => match FormKind::parse(&raw) {
            Some(k) => k,
            None => return err(&req.id, "bad_params", format!("unknown kind: {raw}"), None),
        },
        Err(resp) => return resp,
    };
    let record_id = match str_param(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sid = screen_id(req);
    if let Some(screen) = state.screens.get_mut(&sid) {
        return match screen.delete(&session.gateway, kind, &record_id).await {
            Ok(list) => ok(
                &req.id,
                json!({
                    "deleted": { "kind": kind, "id": record_id },
                    "refreshed": list,
                    "view": screen.projection(&ProjectionFilter::default()),
                }),
            ),
            Err(e) => hierarchy_err(&req.id, &e),
        };
    }

    match ScopedWriter::new(&session.gateway, &session.scope)
        .delete(kind.entity(), &record_id)
        .await
    {
        Ok(()) => ok(&req.id, json!({ "deleted": { "kind": kind, "id": record_id } })),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

async fn handle_roster_remove_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let class_id = match str_param(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_ids: Vec<String> = match parse_param(req, "studentIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sid = screen_id(req);
    if let Some(screen) = state.screens.get_mut(&sid) {
        return match screen
            .remove_students(&session.gateway, &class_id, &student_ids)
            .await
        {
            Ok(removed) => ok(
                &req.id,
                json!({
                    "removed": removed,
                    "view": screen.projection(&ProjectionFilter::default()),
                }),
            ),
            Err(e) => hierarchy_err(&req.id, &e),
        };
    }

    if student_ids.is_empty() {
        return err(&req.id, "bad_params", "studentIds must not be empty", None);
    }
    match ScopedWriter::new(&session.gateway, &session.scope)
        .remove_students(&class_id, &student_ids)
        .await
    {
        Ok(removed) => ok(&req.id, json!({ "removed": removed })),
        Err(e) => hierarchy_err(&req.id, &e),
    }
}

async fn handle_users_list(session: &Session, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_admin(session, req) {
        return resp;
    }
    let role: Role = match parse_param(req, "role") {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match session.gateway.list_users_by_role(role).await {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => gateway_err(&req.id, &e),
    }
}

async fn handle_users_create(session: &Session, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_admin(session, req) {
        return resp;
    }
    let draft: UserDraft = match parse_param(req, "user") {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match session.gateway.create_user(&draft).await {
        Ok(user) => ok(&req.id, json!({ "user": user })),
        Err(e) => gateway_err(&req.id, &e),
    }
}

async fn handle_assign_chief(session: &Session, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_admin(session, req) {
        return resp;
    }
    let (department_id, user_id) = match (str_param(req, "departmentId"), str_param(req, "userId")) {
        (Ok(d), Ok(u)) => (d, u),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match session.gateway.assign_chief(&department_id, &user_id).await {
        Ok(()) => ok(&req.id, json!({ "departmentId": department_id, "chiefId": user_id })),
        Err(e) => gateway_err(&req.id, &e),
    }
}

async fn handle_remove_chief(session: &Session, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_admin(session, req) {
        return resp;
    }
    let department_id = match str_param(req, "departmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.gateway.remove_chief(&department_id).await {
        Ok(()) => ok(&req.id, json!({ "departmentId": department_id })),
        Err(e) => gateway_err(&req.id, &e),
    }
}

async fn handle_assign_teacher(session: &Session, req: &Request) -> serde_json::Value {
    let (class_id, teacher_id) = match (str_param(req, "classId"), str_param(req, "teacherId")) {
        (Ok(c), Ok(t)) => (c, t),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match session.gateway.assign_teacher(&class_id, &teacher_id).await {
        Ok(()) => ok(&req.id, json!({ "classId": class_id, "teacherId": teacher_id })),
        Err(e) => gateway_err(&req.id, &e),
    }
}

async fn handle_chief_listing(session: &Session, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_chief(session, req) {
        return resp;
    }
    let gw = &session.gateway;
    let result = match req.method.as_str() {
        "chief.students" => gw.my_students().await.map(|v| json!({ "students": v })),
        "chief.teachers" => gw.my_teachers().await.map(|v| json!({ "teachers": v })),
        _ => gw
            .my_notifications()
            .await
            .map(|v| json!({ "notifications": v })),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => gateway_err(&req.id, &e),
    }
}

async fn handle_courses(session: &Session, req: &Request) -> serde_json::Value {
    let gw = &session.gateway;
    let result = match req.method.as_str() {
        "courses.list" => match str_param(req, "levelId") {
            Ok(level_id) => gw.list_courses(&level_id).await.map(|v| json!({ "courses": v })),
            Err(resp) => return resp,
        },
        "courses.create" => match parse_param::<CourseDraft>(req, "course") {
            Ok(draft) => gw.create_course(&draft).await.map(|c| json!({ "course": c })),
            Err(resp) => return resp,
        },
        "courses.update" => match (str_param(req, "id"), parse_param::<CourseDraft>(req, "course")) {
            (Ok(id), Ok(draft)) => gw
                .update_course(&id, &draft)
                .await
                .map(|c| json!({ "course": c })),
            (Err(resp), _) | (_, Err(resp)) => return resp,
        },
        "courses.delete" => match str_param(req, "id") {
            Ok(id) => gw.delete_course(&id).await.map(|()| json!({ "deleted": id })),
            Err(resp) => return resp,
        },
        "courseAssignments.list" => match str_param(req, "levelId") {
            Ok(level_id) => gw
                .list_course_assignments(&level_id)
                .await
                .map(|v| json!({ "assignments": v })),
            Err(resp) => return resp,
        },
        "courseAssignments.create" => {
            match parse_param::<CourseAssignmentDraft>(req, "assignment") {
                Ok(draft) => gw
                    .create_course_assignment(&draft)
                    .await
                    .map(|a| json!({ "assignment": a })),
                Err(resp) => return resp,
            }
        }
        _ => match str_param(req, "id") {
            Ok(id) => gw
                .delete_course_assignment(&id)
                .await
                .map(|()| json!({ "deleted": id })),
            Err(resp) => return resp,
        },
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => gateway_err(&req.id, &e),
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "entities.delete" => return Some(handle_entities_delete(state, req).await),
        "roster.removeStudents" => return Some(handle_roster_remove_students(state, req).await),
        _ => {}
    }

    let known = matches!(
        req.method.as_str(),
        "users.list"
            | "users.create"
            | "departments.assignChief"
            | "departments.removeChief"
            | "classes.assignTeacher"
            | "chief.students"
            | "chief.teachers"
            | "notifications.list"
            | "courses.list"
            | "courses.create"
            | "courses.update"
            | "courses.delete"
            | "courseAssignments.list"
            | "courseAssignments.create"
            | "courseAssignments.delete"
    );
    if !known {
        return None;
    }
    let session = match require_session(&state.session, req) {
        Ok(s) => s,
        Err(resp) => return Some(resp),
    };
    let resp = match req.method.as_str() {
        "users.list" => handle_users_list(session, req).await,
        "users.create" => handle_users_create(session, req).await,
        "departments.assignChief" => handle_assign_chief(session, req).await,
        "departments.removeChief" => handle_remove_chief(session, req).await,
        "classes.assignTeacher" => handle_assign_teacher(session, req).await,
        "chief.students" | "chief.teachers" | "notifications.list" => {
            handle_chief_listing(session, req).await
        }
        _ => handle_courses(session, req).await,
    };
    Some(resp)
}
