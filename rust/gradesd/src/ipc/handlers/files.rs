use crate::codec::TsvCodec;
use crate::env::Environment;
use crate::ingest::{collate_grade_tables, read_grade_table_file, write_grade_table_file};
use crate::ipc::helpers::{get_paths, get_required_str, table_key, with_env, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::apply_collated_grades;
use crate::table::full_grade_table;
use serde_json::json;
use std::path::PathBuf;

fn read_file(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(params, "path")?);
    let file = read_grade_table_file(env, &TsvCodec, &path)?;
    Ok(serde_json::to_value(&file)?)
}

fn collate(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let files = get_paths(params, "files")?;
    let occasion = get_required_str(params, "occasion")?;
    let class_group = get_required_str(params, "classGroup")?;
    let grades = collate_grade_tables(env, &TsvCodec, &files, &occasion, &class_group)?;
    Ok(json!({ "grades": grades }))
}

/// Collate the sheets and save the result into the table.
fn import_files(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let files = get_paths(params, "files")?;
    let key = table_key(params)?;
    let collated = collate_grade_tables(env, &TsvCodec, &files, &key.occasion, &key.class_group)?;
    let applied = apply_collated_grades(env, &key, &collated)?;
    Ok(serde_json::to_value(&applied)?)
}

fn export_file(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = table_key(params)?;
    let path = PathBuf::from(get_required_str(params, "path")?);
    let table = full_grade_table(env, &key)?;
    write_grade_table_file(env, &TsvCodec, &table, &path)?;
    Ok(json!({ "path": path.to_string_lossy(), "pupils": table.rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.readFile" => Some(with_env(state, req, read_file)),
        "grades.collate" => Some(with_env(state, req, collate)),
        "grades.importFiles" => Some(with_env(state, req, import_files)),
        "grades.exportFile" => Some(with_env(state, req, export_file)),
        _ => None,
    }
}
