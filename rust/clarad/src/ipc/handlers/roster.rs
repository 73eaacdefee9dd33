use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roster::{
    materialize, parse_source, reconcile, DedupKey, EmptySource, ModuleSource, Origin,
    RefreshOutcome,
};
use crate::sources::{ImportedModules, OwnedModules};
use serde_json::json;

fn dedup_param(req: &Request) -> Result<DedupKey, serde_json::Value> {
    match req.params.get("dedup") {
        None | Some(serde_json::Value::Null) => Ok(DedupKey::default()),
        Some(v) => v.as_str().and_then(DedupKey::parse).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "dedup must be \"moduleId\" or \"name\"",
                None,
            )
        }),
    }
}

/// User ids arrive as numbers or numeric strings; zero means "not given".
fn user_id_param(req: &Request, key: &str) -> Option<i64> {
    let v = req.params.get(key)?;
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|id| *id != 0)
}

fn handle_reconcile(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match dedup_param(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let empty = json!([]);
    let owned = parse_source(req.params.get("owned").unwrap_or(&empty), Origin::Owned);
    let imported = parse_source(
        req.params.get("imported").unwrap_or(&empty),
        Origin::Imported,
    );
    let modules = materialize(reconcile(&owned.records, &imported.records, key));
    ok(
        &req.id,
        json!({
            "modules": modules,
            "dropped": owned.dropped + imported.dropped
        }),
    )
}

fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match dedup_param(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let db_path = state.workspace.as_deref().map(db::db_path);
    let owned: Box<dyn ModuleSource> = match (&db_path, user_id_param(req, "creatorUserId")) {
        (Some(path), Some(user)) => Box::new(OwnedModules::new(path.clone(), user)),
        _ => Box::new(EmptySource),
    };
    let imported: Box<dyn ModuleSource> = match (&db_path, user_id_param(req, "studentId")) {
        (Some(path), Some(student)) => Box::new(ImportedModules::new(path.clone(), student)),
        _ => Box::new(EmptySource),
    };

    match state.roster.refresh(owned.as_ref(), imported.as_ref(), key) {
        RefreshOutcome::Completed(update) => ok(
            &req.id,
            json!({
                "phase": update.phase,
                "modules": update.modules,
                "changed": update.changed,
                "dropped": update.dropped
            }),
        ),
        RefreshOutcome::Skipped => err(
            &req.id,
            "busy",
            "a roster refresh is already in progress",
            None,
        ),
    }
}

fn handle_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = state.roster.snapshot();
    ok(
        &req.id,
        json!({
            "phase": snapshot.phase,
            "modules": snapshot.modules,
            "fetching": state.roster.is_fetching()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.reconcile" => Some(handle_reconcile(state, req)),
        "roster.refresh" => Some(handle_refresh(state, req)),
        "roster.state" => Some(handle_state(state, req)),
        _ => None,
    }
}
