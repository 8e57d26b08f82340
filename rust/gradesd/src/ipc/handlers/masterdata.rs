use crate::env::Environment;
use crate::ipc::helpers::{with_env, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{table_fields, COURSES, PUPILS, SUBJECTS};
use serde_json::json;

fn cell_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Null => Some(String::new()),
        // GROUPS may be given as a list of tags.
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|i| i.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}

/// Replace-or-insert each row, matching existing rows on `keys`.
fn upsert_rows(
    env: &mut Environment,
    table: &'static str,
    keys: &[&str],
    defaults: &[(&str, &str)],
    rows: &[serde_json::Value],
) -> Result<usize, HandlerErr> {
    let fields = table_fields(table)?;
    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            return Err(HandlerErr::bad_params(format!("{}[{}] must be an object", table, i)));
        };
        let mut values: Vec<(&str, String)> = Vec::new();
        for f in fields.iter().filter(|f| **f != "id") {
            match obj.get(*f) {
                Some(v) => {
                    let text = cell_text(v).ok_or_else(|| {
                        HandlerErr::bad_params(format!("{}[{}].{} must be text", table, i, f))
                    })?;
                    values.push((*f, text));
                }
                None => {
                    if let Some((_, d)) = defaults.iter().find(|(k, _)| k == f) {
                        values.push((*f, d.to_string()));
                    }
                }
            }
        }
        let mut filters = Vec::with_capacity(keys.len());
        for k in keys {
            let Some((_, v)) = values.iter().find(|(f, _)| f == k) else {
                return Err(HandlerErr::bad_params(format!("{}[{}] missing {}", table, i, k)));
            };
            filters.push((*k, v.as_str()));
        }
        env.store.delete_rows(table, &filters)?;
        let pairs: Vec<(&str, &str)> = values.iter().map(|(f, v)| (*f, v.as_str())).collect();
        env.store.insert_row(table, &pairs)?;
    }
    Ok(rows.len())
}

fn rows_param<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a [serde_json::Value], HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(&[]),
        Some(serde_json::Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an array", key))),
    }
}

fn import(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subjects = upsert_rows(env, SUBJECTS, &["SID"], &[], rows_param(params, "subjects")?)?;
    let pupils = upsert_rows(env, PUPILS, &["PID"], &[], rows_param(params, "pupils")?)?;
    let courses = upsert_rows(
        env,
        COURSES,
        &["CLASS", "GRP", "SID"],
        &[("GRP", "*")],
        rows_param(params, "courses")?,
    )?;
    tracing::info!(pupils, subjects, courses, "master data imported");
    Ok(json!({ "pupils": pupils, "subjects": subjects, "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "masterdata.import" => Some(with_env(state, req, import)),
        _ => None,
    }
}
