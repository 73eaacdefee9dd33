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
    spawn_sidecar_with(&[])
}

fn spawn_sidecar_with(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_clarad");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("CLARAD_WORKSPACE")
        .env_remove("CLARAD_MAX_TREE_DEPTH")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn clarad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader);
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn seed(workspace: &std::path::Path) {
    let conn = rusqlite::Connection::open(workspace.join("clara.sqlite3")).expect("open store");
    conn.execute_batch(
        "INSERT INTO users(id, user_type, enrollment_code) VALUES
           (7, 'Student', 'NET-2024'),
           (8, 'Teacher', NULL);
         INSERT INTO classes(id, name, enrollment_code) VALUES (3, 'Networks', 'NET-2024');
         INSERT INTO modules(id, name, creator_user_id, created_at) VALUES
           (1, 'My revision', 7, '2025-03-01 09:00:00'),
           (2, 'Routing', 7, '2025-03-02 09:00:00'),
           (10, 'Routing', 8, '2024-10-01 09:00:00'),
           (11, 'Switching', 8, '2024-10-02 09:00:00');
         INSERT INTO class_modules(class_id, module_id) VALUES (3, 10), (3, 11), (3, 2);",
    )
    .expect("seed store");
}

#[test]
fn refresh_merges_owned_and_imported_modules() {
    let workspace = temp_dir("clarad-roster-refresh");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let idle = request_ok(&mut stdin, &mut reader, "0", "roster.state", json!({}));
    assert_eq!(idle["phase"], "idle");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed(&workspace);

    let refreshed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.refresh",
        json!({ "creatorUserId": 7, "studentId": "7" }),
    );
    assert_eq!(refreshed["phase"], "displayed");
    assert_eq!(refreshed["changed"], true);
    assert_eq!(
        refreshed["modules"],
        json!([
            { "moduleId": 2, "name": "Routing", "isImported": false },
            { "moduleId": 1, "name": "My revision", "isImported": false },
            { "moduleId": 10, "name": "Routing", "isImported": true },
            { "moduleId": 11, "name": "Switching", "isImported": true }
        ])
    );

    let same = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.refresh",
        json!({ "creatorUserId": 7, "studentId": 7 }),
    );
    assert_eq!(same["changed"], false);

    let by_name = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "roster.refresh",
        json!({ "creatorUserId": 7, "studentId": 7, "dedup": "name" }),
    );
    let names: Vec<&str> = by_name["modules"]
        .as_array()
        .expect("modules")
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert_eq!(names, ["Routing", "My revision", "Switching"]);
    assert_eq!(by_name["changed"], true);

    let state = request_ok(&mut stdin, &mut reader, "5", "roster.state", json!({}));
    assert_eq!(state["phase"], "displayed");
    assert_eq!(state["fetching"], false);
    assert_eq!(state["modules"], by_name["modules"]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn refresh_without_workspace_or_users_shows_empty_roster() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.refresh",
        json!({ "creatorUserId": 7, "studentId": 7 }),
    );
    assert_eq!(empty["phase"], "emptyDisplayed");
    assert_eq!(empty["modules"], json!([]));

    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "roster.refresh",
        json!({ "dedup": "title" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn missing_store_degrades_to_empty_sources() {
    let workspace = temp_dir("clarad-roster-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    std::fs::remove_file(workspace.join("clara.sqlite3")).expect("remove store");

    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.refresh",
        json!({ "creatorUserId": 7, "studentId": 7 }),
    );
    assert_eq!(resp["phase"], "emptyDisplayed");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn reconcile_accepts_envelopes_and_bare_arrays() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.reconcile",
        json!({
            "owned": {
                "success": true,
                "modules": [
                    { "ModuleID": 1, "ModuleName": "Algebra" },
                    { "ModuleID": 2, "ModuleName": "" },
                    { "ModuleName": "No id" }
                ]
            },
            "imported": [
                { "moduleId": "1", "name": "Algebra (teacher copy)" },
                { "moduleId": 5, "name": "Algebra" },
                { "moduleId": 6, "name": "Geometry" }
            ]
        }),
    );
    assert_eq!(result["dropped"], 2);
    assert_eq!(
        result["modules"],
        json!([
            { "moduleId": 1, "name": "Algebra", "isImported": false },
            { "moduleId": 5, "name": "Algebra", "isImported": true },
            { "moduleId": 6, "name": "Geometry", "isImported": true }
        ])
    );

    let legacy = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.reconcile",
        json!({
            "owned": [{ "moduleId": 1, "name": "Algebra" }],
            "imported": [
                { "moduleId": 5, "name": "Algebra" },
                { "moduleId": 1, "name": "Renamed" }
            ],
            "dedup": "name"
        }),
    );
    assert_eq!(
        legacy["modules"],
        json!([{ "moduleId": 1, "name": "Algebra", "isImported": false }])
    );

    let failed_source = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.reconcile",
        json!({
            "owned": { "success": false, "error": "Database error" },
            "imported": { "success": true, "modules": [{ "moduleId": 9, "name": "Only" }] }
        }),
    );
    assert_eq!(
        failed_source["modules"],
        json!([{ "moduleId": 9, "name": "Only", "isImported": true }])
    );

    let nothing = request_ok(&mut stdin, &mut reader, "4", "roster.reconcile", json!({}));
    assert_eq!(nothing["modules"], json!([]));

    drop(stdin);
    let _ = child.wait();
}
