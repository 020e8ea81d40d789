use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::{err, is_ok};

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: [Handler; 6] = [
    handlers::core::try_handle,
    handlers::grading::try_handle,
    handlers::results::try_handle,
    handlers::classes::try_handle,
    handlers::students::try_handle,
    handlers::table::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _enter = span.enter();

    for handler in HANDLERS {
        if let Some(resp) = handler(state, &req) {
            if is_ok(&resp) {
                tracing::debug!("ok");
            } else {
                let code = resp
                    .get("error")
                    .and_then(|e| e.get("code"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                tracing::warn!(code, "request failed");
            }
            return resp;
        }
    }

    tracing::warn!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
