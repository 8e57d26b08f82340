use crate::config;
use crate::enrolment::{enrolled_subjects, enrolment_matrix, load_catalogue};
use crate::env::Environment;
use crate::ipc::helpers::{get_required_str, with_env, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn occasions(env: &mut Environment, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let list: Vec<serde_json::Value> = env
        .config
        .occasions
        .iter()
        .map(|(name, groups)| {
            json!({
                "name": name,
                "groups": groups.keys().collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(json!({ "schoolyear": env.config.schoolyear, "occasions": list }))
}

/// Column catalogue of a group against its current enrolment.
fn resolve(env: &mut Environment, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let occasion = get_required_str(params, "occasion")?;
    let class_group = get_required_str(params, "classGroup")?;
    env.config.occasion_group(&occasion, &class_group)?;

    let catalogue = load_catalogue(&env.store)?;
    let matrix = enrolment_matrix(&env.store, &class_group, None)?;
    let present = enrolled_subjects(matrix.iter().map(|(_, t)| t));
    let resolved = config::resolve(
        &env.config,
        &catalogue,
        &present,
        &occasion,
        &class_group,
        &mut env.messages,
    )?;
    let mut v = serde_json::to_value(&resolved)?;
    v["allSids"] = json!(resolved.all_sids());
    Ok(v)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.occasions" => Some(with_env(state, req, occasions)),
        "config.resolve" => Some(with_env(state, req, resolve)),
        _ => None,
    }
}
