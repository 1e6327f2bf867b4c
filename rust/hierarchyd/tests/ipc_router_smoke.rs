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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("hierarchyd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "session.start",
        json!({ "actor": { "id": "admin-1", "role": "ADMIN" } }),
    );
    let _ = request(&mut stdin, &mut reader, "4", "session.get", json!({}));
    let _ = request(&mut stdin, &mut reader, "5", "screen.open", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "screen.select",
        json!({ "depth": "department", "id": null }),
    );
    let _ = request(&mut stdin, &mut reader, "7", "screen.view", json!({ "activeOnly": true }));
    let _ = request(&mut stdin, &mut reader, "8", "screen.refresh", json!({ "list": "departments" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "form.openCreate",
        json!({ "kind": "department" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "form.patch",
        json!({ "fields": { "name": "Smoke" } }),
    );
    let _ = request(&mut stdin, &mut reader, "11", "form.state", json!({}));
    let _ = request(&mut stdin, &mut reader, "12", "form.reset", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "form.changeAncestor",
        json!({ "depth": "department", "id": null }),
    );
    let _ = request(&mut stdin, &mut reader, "14", "form.submit", json!({}));
    let _ = request(&mut stdin, &mut reader, "15", "form.close", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "form.openEdit",
        json!({ "kind": "department", "id": "missing" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "entities.delete",
        json!({ "kind": "class", "id": "missing" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "roster.removeStudents",
        json!({ "classId": "missing", "studentIds": ["x"] }),
    );
    let _ = request(&mut stdin, &mut reader, "19", "users.list", json!({ "role": "CHIEF" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "users.create",
        json!({ "user": { "firstName": "Grace", "lastName": "Hopper", "role": "TEACHER" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "departments.assignChief",
        json!({ "departmentId": "missing", "userId": "missing" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "departments.removeChief",
        json!({ "departmentId": "missing" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "classes.assignTeacher",
        json!({ "classId": "missing", "teacherId": "missing" }),
    );
    let _ = request(&mut stdin, &mut reader, "24", "chief.students", json!({}));
    let _ = request(&mut stdin, &mut reader, "25", "chief.teachers", json!({}));
    let _ = request(&mut stdin, &mut reader, "26", "notifications.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "27", "courses.list", json!({ "levelId": "missing" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "28",
        "courses.create",
        json!({ "course": { "name": "Algebra", "code": "ALG", "levelId": "missing" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "29",
        "courses.update",
        json!({ "id": "missing", "course": { "name": "Algebra", "code": "ALG", "levelId": "missing" } }),
    );
    let _ = request(&mut stdin, &mut reader, "30", "courses.delete", json!({ "id": "missing" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "31",
        "courseAssignments.list",
        json!({ "levelId": "missing" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "32",
        "courseAssignments.create",
        json!({ "assignment": { "courseId": "missing", "teacherId": "missing", "levelId": "missing" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "33",
        "courseAssignments.delete",
        json!({ "id": "missing" }),
    );
    let _ = request(&mut stdin, &mut reader, "34", "screen.close", json!({}));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_methods_and_bad_json_get_error_responses() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    writeln!(
        stdin,
        "{}",
        json!({ "id": "u1", "method": "nope.nothing", "params": {} })
    )
    .expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["id"], json!("u1"));
    assert_eq!(value["error"]["code"], json!("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}
