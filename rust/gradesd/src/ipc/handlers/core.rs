use crate::config;
use crate::db;
use crate::env::Environment;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Store;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    // A broken configuration keeps the previous workspace open.
    let grade_config = match config::load_config(&path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "config_load_failed", format!("{e:#}"), None),
    };

    let occasions: Vec<&str> = grade_config
        .occasions
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    let result = json!({
        "workspacePath": path.to_string_lossy(),
        "schoolyear": grade_config.schoolyear,
        "occasions": occasions,
    });
    tracing::info!(workspace = %path.display(), "workspace selected");
    state.workspace = Some(path);
    state.env = Some(Environment::new(grade_config, Store::new(conn)));
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
