use crate::ipc::error::{err, normalize_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::MindmapSession;
use serde_json::json;
use tracing::debug;

fn str_param<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
}

/// `params.path` as sent back from a render node; `None` when absent.
fn path_param(req: &Request) -> Option<Result<Vec<usize>, serde_json::Value>> {
    let raw = req.params.get("path")?;
    let path = raw.as_array().and_then(|items| {
        items
            .iter()
            .map(|v| v.as_u64().and_then(|n| usize::try_from(n).ok()))
            .collect::<Option<Vec<_>>>()
    });
    Some(path.ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "path must be an array of child indices",
            None,
        )
    }))
}

fn session_not_found(req: &Request, session_id: &str) -> serde_json::Value {
    err(
        &req.id,
        "not_found",
        "mindmap session not found",
        Some(json!({ "sessionId": session_id })),
    )
}

fn render_result(
    req: &Request,
    session_id: &str,
    session: &MindmapSession,
    max_depth: usize,
) -> serde_json::Value {
    match session.render(max_depth) {
        Ok(tree) => ok(&req.id, json!({ "sessionId": session_id, "tree": tree })),
        Err(e) => normalize_err(&req.id, &e),
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(data) = req.params.get("data") else {
        return err(&req.id, "bad_params", "missing params.data", None);
    };
    let session_id = match state.sessions.open(data, state.max_tree_depth) {
        Ok(id) => id,
        Err(e) => return normalize_err(&req.id, &e),
    };
    debug!(session = %session_id, "mindmap opened");
    match state.sessions.get(&session_id) {
        Some(session) => render_result(req, &session_id, session, state.max_tree_depth),
        None => session_not_found(req, &session_id),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match str_param(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(data) = req.params.get("data") else {
        return err(&req.id, "bad_params", "missing params.data", None);
    };
    let max_depth = state.max_tree_depth;
    let Some(session) = state.sessions.get_mut(session_id) else {
        return session_not_found(req, session_id);
    };
    if let Err(e) = session.update(data, max_depth) {
        return normalize_err(&req.id, &e);
    }
    render_result(req, session_id, session, max_depth)
}

fn handle_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match str_param(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let path = match path_param(req).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let node_id = req.params.get("nodeId").and_then(|v| v.as_str());
    if path.is_none() && node_id.is_none() {
        return err(&req.id, "bad_params", "missing path or nodeId", None);
    }
    let Some(session) = state.sessions.get_mut(session_id) else {
        return session_not_found(req, session_id);
    };
    let selection = match (&path, node_id) {
        (Some(path), _) => session.select(path),
        (None, Some(node_id)) => session.select_id(node_id),
        (None, None) => None,
    };
    match selection {
        Some(selection) => ok(
            &req.id,
            json!({
                "path": selection.path,
                "nodeId": selection.node_id,
                "title": selection.details.title,
                "body": selection.details.body,
                "deselected": selection.deselected
            }),
        ),
        None => err(
            &req.id,
            "not_found",
            "node not found",
            Some(json!({ "sessionId": session_id, "path": path, "nodeId": node_id })),
        ),
    }
}

fn handle_selection(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match str_param(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.sessions.get(session_id) {
        Some(session) => ok(
            &req.id,
            json!({ "path": session.selected(), "nodeId": session.selected_id() }),
        ),
        None => session_not_found(req, session_id),
    }
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session_id = match str_param(req, "sessionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !state.sessions.close(session_id) {
        return session_not_found(req, session_id);
    }
    debug!(session = %session_id, "mindmap closed");
    ok(&req.id, json!({ "closed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "mindmap.open" => Some(handle_open(state, req)),
        "mindmap.update" => Some(handle_update(state, req)),
        "mindmap.select" => Some(handle_select(state, req)),
        "mindmap.selection" => Some(handle_selection(state, req)),
        "mindmap.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
