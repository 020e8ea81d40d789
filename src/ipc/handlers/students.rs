use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_error, optional_str, required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::table::{self, TableQuerySpec};
use serde_json::json;
use uuid::Uuid;

const ROSTER_SEARCH_FIELDS: [&str; 4] = ["displayName", "lastName", "firstName", "studentNo"];

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let class_id = required_str(req, "classId")?;
    let last_name = required_str(req, "lastName")?;
    let first_name = required_str(req, "firstName")?;
    let student_no = optional_str(req, "studentNo");

    match db::class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return Err(err(&req.id, "not_found", "class not found", None)),
        Err(e) => return Err(db_error(req, "db_query_failed", e)),
    }

    // Append to the end of the roster.
    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(|e| db_error(req, "db_query_failed", e))?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, student_no, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            &student_no,
            next_sort,
        ),
    )
    .map_err(|e| {
        err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        )
    })?;

    Ok(ok(
        &req.id,
        json!({ "studentId": student_id, "sortOrder": next_sort }),
    ))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let class_id = required_str(req, "classId")?;
    let spec = TableQuerySpec::from_json(req.params.get("query")).map_err(|e| {
        err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "field": e.field })),
        )
    })?;

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, student_no, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| db_error(req, "db_query_failed", e))?;
    let roster: Vec<serde_json::Value> = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let student_no: Option<String> = r.get(3)?;
            let sort_order: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "studentNo": student_no,
                "sortOrder": sort_order,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_error(req, "db_query_failed", e))?;

    let result = table::query(&roster, &ROSTER_SEARCH_FIELDS, &spec);
    Ok(ok(&req.id, json!(result)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(respond(handle_students_create(state, req))),
        "students.list" => Some(respond(handle_students_list(state, req))),
        _ => None,
    }
}
