use crate::env::Message;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Success reply carrying the warnings and errors the operation collected.
pub fn ok_with_messages(
    id: &str,
    mut result: serde_json::Value,
    messages: Vec<Message>,
) -> serde_json::Value {
    if let Some(obj) = result.as_object_mut() {
        obj.insert("messages".to_string(), json!(messages));
    } else {
        result = json!({ "value": result, "messages": messages });
    }
    ok(id, result)
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}
