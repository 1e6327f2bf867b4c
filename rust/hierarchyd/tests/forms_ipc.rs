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
fn form_validation_and_roster_removal_over_the_sidecar() {
    let workspace = temp_dir("hierarchyd-forms");
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

    // Empty name is refused locally and the form keeps what was typed.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "form.openCreate",
        json!({ "kind": "department" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "form.patch",
        json!({ "fields": { "name": "   ", "code": "PHY" } }),
    );
    let refused = request(&mut stdin, &mut reader, "6", "form.submit", json!({}));
    assert_eq!(refused["ok"], json!(false));
    assert_eq!(refused["error"]["code"], json!("validation_failed"));
    assert_eq!(refused["error"]["details"]["field"], json!("name"));
    let state = request_ok(&mut stdin, &mut reader, "7", "form.state", json!({}));
    assert_eq!(state["form"]["fields"]["code"], json!("PHY"));
    assert_eq!(state["dirty"], json!(true));
    assert!(state["form"]["error"].is_string());

    // Ancestors only move through form.changeAncestor.
    let sneaky = request(
        &mut stdin,
        &mut reader,
        "8",
        "form.patch",
        json!({ "fields": { "departmentId": "elsewhere" } }),
    );
    assert_eq!(sneaky["error"]["code"], json!("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "form.patch",
        json!({ "fields": { "name": "Physics" } }),
    );
    let created = request_ok(&mut stdin, &mut reader, "10", "form.submit", json!({}));
    let physics = created["outcome"]["id"].as_str().expect("id").to_string();
    assert_eq!(created["outcome"]["refresh"], json!("departments"));
    assert_eq!(created["view"]["path"]["departmentId"], json!(physics));
    let closed = request_ok(&mut stdin, &mut reader, "11", "form.state", json!({}));
    assert_eq!(closed["form"], json!(null));

    let level = create_via_form(
        &mut stdin,
        &mut reader,
        "level",
        json!({ "name": "P1", "code": "P1", "year": 1 }),
    );
    let bad_year = {
        let _ = request_ok(&mut stdin, &mut reader, "12", "form.openCreate", json!({ "kind": "level" }));
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "13",
            "form.patch",
            json!({ "fields": { "name": "P9", "year": 9 } }),
        );
        request(&mut stdin, &mut reader, "14", "form.submit", json!({}))
    };
    assert_eq!(bad_year["error"]["details"]["field"], json!("year"));
    let _ = request_ok(&mut stdin, &mut reader, "15", "form.close", json!({}));

    let class = create_via_form(
        &mut stdin,
        &mut reader,
        "class",
        json!({ "name": "P1-A", "code": "P1-A", "capacity": 2 }),
    );

    // Edit forms open on the record without moving the browse path.
    let edit = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "form.openEdit",
        json!({ "kind": "level", "id": level }),
    );
    assert_eq!(edit["form"]["mode"], json!("edit"));
    assert_eq!(edit["form"]["fields"]["year"], json!(1));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "form.patch",
        json!({ "fields": { "name": "Physics Year 1" } }),
    );
    let updated = request_ok(&mut stdin, &mut reader, "18", "form.submit", json!({}));
    assert_eq!(updated["outcome"]["created"], json!(false));
    assert_eq!(updated["view"]["levels"][0]["name"], json!("Physics Year 1"));
    assert_eq!(updated["view"]["path"]["classId"], json!(class));

    let mut student_ids = Vec::new();
    for (first, last) in [("Ada", "Lovelace"), ("Emmy", "Noether")] {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            "19",
            "users.create",
            json!({ "user": { "firstName": first, "lastName": last, "role": "STUDENT", "classId": class } }),
        );
        student_ids.push(res["user"]["id"].as_str().expect("student id").to_string());
    }
    let roster = request_ok(&mut stdin, &mut reader, "20", "screen.refresh", json!({ "list": "roster" }));
    assert_eq!(roster["view"]["students"].as_array().map(|a| a.len()), Some(2));
    let found = request_ok(&mut stdin, &mut reader, "21", "screen.view", json!({ "search": "noether" }));
    assert_eq!(found["view"]["students"][0]["name"], json!("Emmy Noether"));

    let blocked = request(
        &mut stdin,
        &mut reader,
        "22",
        "entities.delete",
        json!({ "kind": "class", "id": class }),
    );
    assert_eq!(blocked["error"]["code"], json!("conflict"));

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "roster.removeStudents",
        json!({ "classId": class, "studentIds": student_ids }),
    );
    assert_eq!(removed["removed"], json!(2));
    assert_eq!(removed["view"]["students"], json!([]));
    assert_eq!(removed["view"]["classes"][0]["studentCount"], json!(0));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "24",
        "entities.delete",
        json!({ "kind": "class", "id": class }),
    );
    assert_eq!(deleted["view"]["path"]["classId"], json!(null));
    assert_eq!(deleted["view"]["stage"], json!("D2"));

    drop(stdin);
    let _ = child.wait();
}
