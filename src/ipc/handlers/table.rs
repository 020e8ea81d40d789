use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::table::{self, TableQuerySpec};
use serde_json::json;

/// Ad-hoc query over caller-supplied rows. Non-object rows are kept but
/// never match a search and sort as missing.
fn handle_table_query(req: &Request) -> HandlerResult<serde_json::Value> {
    let Some(records) = req.params.get("records").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing records array", None));
    };
    let fields: Vec<String> = match req.params.get("fields") {
        None => Vec::new(),
        Some(v) => {
            let Some(items) = v.as_array() else {
                return Err(err(&req.id, "bad_params", "fields must be an array", None));
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let Some(s) = item.as_str() else {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        "fields must contain only strings",
                        None,
                    ));
                };
                out.push(s.to_string());
            }
            out
        }
    };
    let spec = TableQuerySpec::from_json(req.params.get("query")).map_err(|e| {
        err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "field": e.field })),
        )
    })?;

    let result = table::query(records, &fields, &spec);
    tracing::debug!(
        records = records.len(),
        matched = result.total_matched,
        page = result.page,
        "table query"
    );
    Ok(ok(&req.id, json!(result)))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "table.query" => Some(respond(handle_table_query(req))),
        _ => None,
    }
}
