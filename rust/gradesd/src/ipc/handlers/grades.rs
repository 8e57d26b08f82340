use crate::env::Environment;
use crate::ipc::helpers::{get_required_str, table_key, with_env, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{delete_pupil_grades, update_pupil_grades, update_table_info};
use crate::table::{ensure_table_info, full_grade_table, read_stored_rows};
use serde_json::json;

fn table(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = table_key(params)?;
    let table = full_grade_table(env, &key)?;
    Ok(serde_json::to_value(&table)?)
}

fn update_pupil(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = table_key(params)?;
    let pid = get_required_str(params, "pid")?;
    let Some(grades) = params.get("grades").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing grades"));
    };
    let mut edits = Vec::with_capacity(grades.len());
    for (sid, v) in grades {
        let Some(value) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!("grades.{} must be a string", sid)));
        };
        edits.push((sid.clone(), value.to_string()));
    }

    let mut table = full_grade_table(env, &key)?;
    let saved = update_pupil_grades(env, &mut table, &pid, &edits)?;
    let mut v = serde_json::to_value(&saved)?;
    if let Some(row) = table.row(&pid) {
        v["grades"] = serde_json::to_value(&row.grades)?;
    }
    Ok(v)
}

fn update_info(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = table_key(params)?;
    let field = get_required_str(params, "field")?;
    let value = get_required_str(params, "value")?;
    env.config.occasion_group(&key.occasion, &key.class_group)?;
    let stored = read_stored_rows(env, &key)?;
    ensure_table_info(env, &key, !stored.is_empty())?;
    let modified = update_table_info(env, &key, &field, &value)?;
    Ok(json!({ "modified": modified }))
}

fn delete_pupil(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = table_key(params)?;
    let pid = get_required_str(params, "pid")?;
    let modified = delete_pupil_grades(env, &key, &pid)?;
    Ok(json!({ "deleted": modified.is_some(), "modified": modified }))
}

/// Report view of every pupil's grades.
fn print(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = table_key(params)?;
    let table = full_grade_table(env, &key)?;
    let pupils: Vec<serde_json::Value> = table
        .rows
        .iter()
        .map(|row| {
            let grades: serde_json::Map<String, serde_json::Value> = table
                .printed(row)
                .into_iter()
                .map(|(sid, p)| (sid, json!(p)))
                .collect();
            json!({
                "pid": row.pupil.pid,
                "name": row.pupil.display_name(),
                "level": row.pupil.level,
                "grades": grades,
            })
        })
        .collect();
    Ok(json!({ "symbols": table.config.symbols, "pupils": pupils }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.table" => Some(with_env(state, req, table)),
        "grades.updatePupil" => Some(with_env(state, req, update_pupil)),
        "grades.updateInfo" => Some(with_env(state, req, update_info)),
        "grades.deletePupil" => Some(with_env(state, req, delete_pupil)),
        "grades.print" => Some(with_env(state, req, print)),
        _ => None,
    }
}
