use crate::db;
use crate::grading::{GradingConfig, GradingSystem};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "gradingSystem": state.grading.name(),
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

    // A workspace may pin its own grading system. A broken one keeps the
    // workspace closed instead of grading against a bad table.
    let persisted = match db::settings_get_json(&conn, db::GRADING_SETTINGS_KEY) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grading = match persisted {
        Some(raw) => {
            let system = serde_json::from_value::<GradingConfig>(raw)
                .map_err(|e| e.to_string())
                .and_then(|c| GradingSystem::new(c).map_err(|e| e.to_string()));
            match system {
                Ok(system) => system,
                Err(message) => {
                    tracing::error!(path = %path.display(), %message, "workspace grading system is invalid");
                    return err(
                        &req.id,
                        "config_invalid",
                        message,
                        Some(json!({ "key": db::GRADING_SETTINGS_KEY })),
                    );
                }
            }
        }
        // Nothing pinned here: never inherit the previous workspace's system.
        None => state.default_grading.clone(),
    };
    state.grading = grading;

    tracing::info!(path = %path.display(), grading = %state.grading.name(), "workspace opened");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "gradingSystem": state.grading.name(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
