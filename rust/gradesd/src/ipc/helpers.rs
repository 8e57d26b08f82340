use crate::env::{Environment, Message};
use crate::error::GradeError;
use crate::ipc::error::{err, ok_with_messages};
use crate::ipc::types::{AppState, Request};
use crate::table::TableKey;
use serde_json::json;
use std::path::PathBuf;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    /// Carry the messages collected before the failure in `details`.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        if messages.is_empty() {
            return self;
        }
        let messages = json!(messages);
        self.details = Some(match self.details.take() {
            Some(serde_json::Value::Object(mut obj)) => {
                obj.insert("messages".to_string(), messages);
                serde_json::Value::Object(obj)
            }
            Some(other) => json!({ "value": other, "messages": messages }),
            None => json!({ "messages": messages }),
        });
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GradeError> for HandlerErr {
    fn from(e: GradeError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<serde_json::Error> for HandlerErr {
    fn from(e: serde_json::Error) -> Self {
        Self {
            code: "serialize_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> String {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

pub fn get_paths(params: &serde_json::Value, key: &str) -> Result<Vec<PathBuf>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(PathBuf::from)
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be strings", key)))
        })
        .collect()
}

/// `{occasion, classGroup, instance?}` of a request.
pub fn table_key(params: &serde_json::Value) -> Result<TableKey, HandlerErr> {
    let occasion = get_required_str(params, "occasion")?;
    let class_group = get_required_str(params, "classGroup")?;
    Ok(TableKey::new(
        &occasion,
        &class_group,
        &get_optional_str(params, "instance"),
    ))
}

/// Run `f` against the open workspace and attach the collected messages
/// to its reply, under `error.details.messages` when it failed.
pub fn with_env<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&mut Environment, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(env) = state.env.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = f(env, &req.params);
    let messages = env.messages.take();
    match result {
        Ok(v) => ok_with_messages(&req.id, v, messages),
        Err(e) => {
            tracing::debug!(method = %req.method, code = e.code, messages = messages.len(), "request failed");
            e.with_messages(messages).response(&req.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Messages;

    #[test]
    fn failure_keeps_collected_messages() {
        let mut messages = Messages::default();
        messages.warning("cell_locked", "A: Ma does not apply");

        let plain = HandlerErr::from(GradeError::NotFound("pupil X".into()))
            .with_messages(messages.take())
            .response("1");
        assert_eq!(plain["error"]["code"], "not_found");
        assert_eq!(plain["error"]["details"]["messages"][0]["code"], "cell_locked");

        messages.error("invalid_grade", "A: \"7\"");
        let bad = HandlerErr::from(GradeError::InvalidGrade {
            pid: "A".into(),
            sid: "En".into(),
            grade: "7".into(),
        })
        .with_messages(messages.take())
        .response("2");
        assert_eq!(bad["error"]["details"]["sid"], "En");
        assert_eq!(bad["error"]["details"]["messages"][0]["level"], "error");

        let quiet = HandlerErr::bad_params("missing").with_messages(Vec::new()).response("3");
        assert!(quiet["error"].get("details").is_none());
    }
}
