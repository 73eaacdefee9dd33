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
    let exe = env!("CARGO_BIN_EXE_clarad");
    let mut child = Command::new(exe)
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
    let workspace = temp_dir("clarad-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["result"]["workspacePath"], serde_json::Value::Null);
    assert_eq!(health["result"]["maxTreeDepth"], 64);

    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert!(workspace.join("clara.sqlite3").is_file());

    let sheets = json!([{ "title": "Smoke", "key_concepts": ["one"] }]);
    let _ = request(&mut stdin, &mut reader, "3", "revision.classify", json!({ "data": sheets }));
    let _ = request(&mut stdin, &mut reader, "4", "revision.normalize", json!({ "data": sheets }));
    let _ = request(&mut stdin, &mut reader, "5", "revision.render", json!({ "data": sheets }));
    let _ = request(&mut stdin, &mut reader, "6", "revision.sheetsToTree", json!({ "sheets": sheets }));

    let opened = request(&mut stdin, &mut reader, "7", "mindmap.open", json!({ "data": sheets }));
    let session_id = opened["result"]["sessionId"]
        .as_str()
        .expect("sessionId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "mindmap.update",
        json!({ "sessionId": session_id, "data": sheets }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "mindmap.select",
        json!({ "sessionId": session_id, "nodeId": "concept-1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "mindmap.selection",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "mindmap.close",
        json!({ "sessionId": session_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "roster.reconcile",
        json!({ "owned": [], "imported": [] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "roster.refresh",
        json!({ "creatorUserId": 1, "studentId": 1 }),
    );
    let _ = request(&mut stdin, &mut reader, "14", "roster.state", json!({}));

    let unknown = {
        writeln!(stdin, "{}", json!({ "id": "15", "method": "nope.nothing" })).expect("write");
        stdin.flush().expect("flush");
        read_response(&mut reader)
    };
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"]["code"], "not_implemented");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_continues() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "this is not json").expect("write");
    writeln!(stdin).expect("write blank");
    writeln!(stdin, "{}", json!({ "method": "health" })).expect("write");
    stdin.flush().expect("flush");

    let first = read_response(&mut reader);
    assert_eq!(first["ok"], false);
    assert_eq!(first["error"]["code"], "bad_json");
    let second = read_response(&mut reader);
    assert_eq!(second["error"]["code"], "bad_json");

    let health = request(&mut stdin, &mut reader, "after", "health", json!({}));
    assert_eq!(health["ok"], true);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_select_requires_a_path() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", "workspace.select", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_params");
    drop(stdin);
    let _ = child.wait();
}
