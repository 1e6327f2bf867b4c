use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_hierarchyd");
    let mut child = Command::new(exe)
        .env_remove("HIERARCHYD_WORKSPACE")
        .env("HIERARCHYD_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn hierarchyd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

/// Creates a record through the bound form and returns the new id.
fn create_via_form(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    kind: &str,
    fields: serde_json::Value,
) -> String {
    let _ = request_ok(stdin, reader, "f1", "form.openCreate", json!({ "kind": kind }));
    let _ = request_ok(stdin, reader, "f2", "form.patch", json!({ "fields": fields }));
    let res = request_ok(stdin, reader, "f3", "form.submit", json!({}));
    assert_eq!(res["outcome"]["created"], json!(true));
    res["outcome"]["id"].as_str().expect("created id").to_string()
}

#[test]
fn chief_session_is_bound_to_its_department() {
    let workspace = temp_dir("hierarchyd-chief");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.start",
        json!({ "actor": { "id": "admin-1", "role": "ADMIN" } }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "3", "screen.open", json!({}));
    let cs = create_via_form(
        &mut stdin,
        &mut reader,
        "department",
        json!({ "name": "CS101", "code": "CS101" }),
    );
    let ee = create_via_form(
        &mut stdin,
        &mut reader,
        "department",
        json!({ "name": "EE200", "code": "EE200" }),
    );
    let _ = create_via_form(
        &mut stdin,
        &mut reader,
        "level",
        json!({ "name": "L1", "code": "CS-L1", "year": 1 }),
    );

    let chief = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({ "user": { "firstName": "Alan", "lastName": "Turing", "email": "alan@school.test", "role": "CHIEF" } }),
    );
    let chief_id = chief["user"]["id"].as_str().expect("chief id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "departments.assignChief",
        json!({ "departmentId": cs, "userId": chief_id }),
    );
    let chiefs = request_ok(&mut stdin, &mut reader, "6", "users.list", json!({ "role": "CHIEF" }));
    assert_eq!(chiefs["users"][0]["departmentId"], json!(cs));

    // A chief profile without a department cannot start a session.
    let unbound = request(
        &mut stdin,
        &mut reader,
        "7",
        "session.start",
        json!({ "actor": { "id": "chief-x", "role": "CHIEF" } }),
    );
    assert_eq!(unbound["ok"], json!(false));
    assert_eq!(unbound["error"]["code"], json!("missing_department"));

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "session.start",
        json!({ "actor": { "id": chief_id, "role": "CHIEF", "departmentId": cs } }),
    );
    assert_eq!(started["scope"]["boundDepartmentId"], json!(cs));

    let opened = request_ok(&mut stdin, &mut reader, "9", "screen.open", json!({}));
    let v = &opened["view"];
    assert_eq!(v["totals"]["totalDepartments"], json!(1));
    assert_eq!(v["departments"][0]["id"], json!(cs));
    assert_eq!(v["departments"][0]["chiefName"], json!("Alan Turing"));
    assert_eq!(v["path"]["departmentId"], json!(cs));
    assert_eq!(v["totals"]["totalLevels"], json!(1));

    let foreign = request(
        &mut stdin,
        &mut reader,
        "10",
        "screen.select",
        json!({ "depth": "department", "id": ee }),
    );
    assert_eq!(foreign["ok"], json!(false));
    assert_eq!(foreign["error"]["code"], json!("scope_denied"));

    let still = request_ok(&mut stdin, &mut reader, "11", "screen.view", json!({}));
    assert_eq!(still["view"]["path"]["departmentId"], json!(cs));

    let union = request(
        &mut stdin,
        &mut reader,
        "12",
        "screen.select",
        json!({ "depth": "department", "id": null }),
    );
    assert_eq!(union["error"]["code"], json!("scope_denied"));

    // The create form is pinned to the bound department.
    let form = request_ok(&mut stdin, &mut reader, "13", "form.openCreate", json!({ "kind": "level" }));
    assert_eq!(form["form"]["fields"]["departmentId"], json!(cs));
    let moved = request(
        &mut stdin,
        &mut reader,
        "14",
        "form.changeAncestor",
        json!({ "depth": "department", "id": ee }),
    );
    assert_eq!(moved["error"]["code"], json!("scope_denied"));
    let _ = request_ok(&mut stdin, &mut reader, "15", "form.close", json!({}));

    let notifications = request_ok(&mut stdin, &mut reader, "16", "notifications.list", json!({}));
    let messages: Vec<String> = notifications["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .filter_map(|n| n["message"].as_str().map(str::to_string))
        .collect();
    assert!(messages.iter().any(|m| m.contains("is now head of CS101")));
    assert!(messages.iter().any(|m| m.contains("Level L1")));

    let admin_only = request(&mut stdin, &mut reader, "17", "users.list", json!({ "role": "TEACHER" }));
    assert_eq!(admin_only["error"]["code"], json!("scope_denied"));

    let delete_department = request(
        &mut stdin,
        &mut reader,
        "18",
        "entities.delete",
        json!({ "kind": "department", "id": cs }),
    );
    assert_eq!(delete_department["error"]["code"], json!("scope_denied"));

    drop(stdin);
    let _ = child.wait();
}
