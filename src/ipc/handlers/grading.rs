use crate::db;
use crate::grading::{self, GradingConfig, GradingSystem};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_f64, required_f64_array, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn handle_grading_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "system": state.grading.config(),
            "maxTotal": state.grading.max_total(),
        }),
    )
}

fn handle_grading_configure(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let config: GradingConfig = serde_json::from_value(req.params.clone())
        .map_err(|e| err(&req.id, "bad_params", e.to_string(), None))?;
    let system = GradingSystem::new(config).map_err(|e| {
        err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "reason": e.reason() })),
        )
    })?;

    if let Some(conn) = state.db.as_ref() {
        // Open terms regrade from raw scores, so their CA layout must keep fitting.
        let components = system.component_caps().len();
        let stale = db::open_scores_with_other_layout(conn, components)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        if stale > 0 {
            return Err(err(
                &req.id,
                "config_invalid",
                format!(
                    "{} score(s) in open terms were entered with a different number of CA components",
                    stale
                ),
                Some(json!({
                    "reason": "component_layout_in_use",
                    "components": components,
                    "scores": stale,
                })),
            ));
        }
        let value = serde_json::to_value(system.config())
            .map_err(|e| err(&req.id, "bad_params", e.to_string(), None))?;
        db::settings_set_json(conn, db::GRADING_SETTINGS_KEY, &value)
            .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    }

    tracing::info!(
        name = %system.name(),
        bands = system.bands().len(),
        persisted = state.db.is_some(),
        "grading system reconfigured"
    );
    state.grading = system;
    Ok(ok(
        &req.id,
        json!({
            "system": state.grading.config(),
            "maxTotal": state.grading.max_total(),
            "persisted": state.db.is_some(),
        }),
    ))
}

fn handle_classify(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let score = required_f64(req, "score")?;
    let band = state.grading.classify(score);
    Ok(ok(&req.id, json!({ "band": band })))
}

fn handle_total(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let components = required_f64_array(req, "components")?;
    // Caps default to the active grading system's layout.
    let caps = match req.params.get("componentCaps") {
        None => state.grading.component_caps().to_vec(),
        Some(_) => required_f64_array(req, "componentCaps")?,
    };
    let exam = required_f64(req, "examScore")?;
    let exam_cap = match req.params.get("examCap") {
        None => state.grading.exam_cap(),
        Some(_) => required_f64(req, "examCap")?,
    };
    let total = grading::compute_total(&components, &caps, exam, exam_cap).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            e.to_string(),
            Some(json!({ "components": e.components, "caps": e.caps })),
        )
    })?;
    let max_total = caps.iter().map(|c| c.max(0.0)).sum::<f64>() + exam_cap.max(0.0);
    Ok(ok(&req.id, json!({ "total": total, "maxTotal": max_total })))
}

fn handle_average(req: &Request) -> HandlerResult<serde_json::Value> {
    let scores = required_f64_array(req, "scores")?;
    Ok(ok(
        &req.id,
        json!({ "average": grading::compute_average(&scores) }),
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RankEntry {
    id: serde_json::Value,
    average: f64,
}

fn handle_rank(req: &Request) -> HandlerResult<serde_json::Value> {
    let Some(raw) = req.params.get("students") else {
        return Err(err(&req.id, "bad_params", "missing students array", None));
    };
    let students: Vec<RankEntry> = serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("students: {e}"), None))?;
    let class_size = students.len();
    let ranked = grading::rank(students, |s| s.average);
    Ok(ok(
        &req.id,
        json!({ "ranked": ranked, "classSize": class_size }),
    ))
}

fn handle_format_position(req: &Request) -> HandlerResult<serde_json::Value> {
    let position = match req.params.get("position").and_then(|v| v.as_u64()) {
        Some(p) => p as usize,
        None => {
            return Err(err(
                &req.id,
                "bad_params",
                "position must be a non-negative integer",
                None,
            ))
        }
    };
    Ok(ok(
        &req.id,
        json!({ "label": grading::format_position(position) }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.get" => Some(handle_grading_get(state, req)),
        "grading.configure" => Some(respond(handle_grading_configure(state, req))),
        "grading.classify" => Some(respond(handle_classify(state, req))),
        "grading.total" => Some(respond(handle_total(state, req))),
        "grading.average" => Some(respond(handle_average(req))),
        "grading.rank" => Some(respond(handle_rank(req))),
        "grading.formatPosition" => Some(respond(handle_format_position(req))),
        _ => None,
    }
}
