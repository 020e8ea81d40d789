use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Handler-local result: `Err` already holds the JSON error envelope.
pub type HandlerResult<T> = Result<T, serde_json::Value>;

pub fn required_str(req: &Request, key: &str) -> HandlerResult<String> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must not be empty"),
            None,
        )),
        None => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_f64(req: &Request, key: &str) -> HandlerResult<f64> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing or non-numeric {key}"), None))
}

pub fn required_f64_array(req: &Request, key: &str) -> HandlerResult<Vec<f64>> {
    let Some(items) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", format!("missing {key} array"), None));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{key}[{i}] must be a number"),
                    None,
                )
            })
        })
        .collect()
}

pub fn db_error(req: &Request, code: &str, e: impl std::fmt::Display) -> serde_json::Value {
    err(&req.id, code, e.to_string(), None)
}

/// Unwrap a handler body into its response envelope.
pub fn respond(result: HandlerResult<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) | Err(v) => v,
    }
}
