use crate::ipc::error::{err, normalize_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::normalize::{classify, normalize, sheets_to_tree, ContentShape};
use crate::render::to_render_tree;
use serde_json::json;
use tracing::debug;

fn data_param(req: &Request) -> Result<&serde_json::Value, serde_json::Value> {
    req.params
        .get("data")
        .ok_or_else(|| err(&req.id, "bad_params", "missing params.data", None))
}

fn handle_classify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let data = match data_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match classify(data) {
        Ok(shape) => {
            let mut result = json!({ "shape": shape.tag() });
            match shape {
                ContentShape::ContentTree(_) => {}
                ContentShape::SheetList(sheets) => {
                    result["sheetCount"] = json!(sheets.len());
                }
                ContentShape::WrappedSheetList { key, sheets } => {
                    result["key"] = json!(key);
                    result["sheetCount"] = json!(sheets.len());
                }
            }
            ok(&req.id, result)
        }
        Err(e) => normalize_err(&req.id, &e),
    }
}

fn handle_normalize(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let data = match data_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match normalize(data) {
        Ok(tree) => {
            debug!(passthrough = tree.passthrough_value().is_some(), "normalized");
            ok(&req.id, json!(tree))
        }
        Err(e) => normalize_err(&req.id, &e),
    }
}

fn handle_sheets(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sheets) = req.params.get("sheets") else {
        return err(&req.id, "bad_params", "missing params.sheets", None);
    };
    match sheets_to_tree(sheets) {
        Ok(root) => ok(&req.id, json!(root)),
        Err(e) => normalize_err(&req.id, &e),
    }
}

fn handle_render(state: &mut AppState, req: &Request) -> serde_json::Value {
    let data = match data_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tree = match normalize(data) {
        Ok(t) => t,
        Err(e) => return normalize_err(&req.id, &e),
    };
    match to_render_tree(&tree, state.max_tree_depth) {
        Ok(render) => ok(&req.id, json!(render)),
        Err(e) => normalize_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "revision.classify" => Some(handle_classify(state, req)),
        "revision.normalize" => Some(handle_normalize(state, req)),
        "revision.render" => Some(handle_render(state, req)),
        "revision.sheetsToTree" => Some(handle_sheets(state, req)),
        _ => None,
    }
}
