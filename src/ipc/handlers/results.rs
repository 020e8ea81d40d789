use crate::db;
use crate::grading::{ComponentMismatch, GradingSystem};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_error, required_f64, required_f64_array, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::results::{self, ClassResults, StudentScores, SubjectScores, RESULT_FIELDS};
use crate::table::{self, TableQuerySpec};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct TermKey {
    session: String,
    term: String,
}

fn term_key(req: &Request) -> HandlerResult<TermKey> {
    Ok(TermKey {
        session: required_str(req, "session")?,
        term: required_str(req, "term")?,
    })
}

fn require_db<'a>(state: &'a AppState, req: &Request) -> HandlerResult<&'a Connection> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn caps_mismatch(req: &Request, e: ComponentMismatch) -> serde_json::Value {
    err(
        &req.id,
        "caps_mismatch",
        e.to_string(),
        Some(json!({ "components": e.components, "caps": e.caps })),
    )
}

fn load_class_scores(
    conn: &Connection,
    class_id: &str,
    key: &TermKey,
) -> anyhow::Result<Vec<StudentScores>> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let mut students: Vec<StudentScores> = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(StudentScores {
                student_id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                subjects: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let index_by_id: HashMap<String, usize> = students
        .iter()
        .enumerate()
        .map(|(i, s)| (s.student_id.clone(), i))
        .collect();

    // rowid keeps subjects in entry order; upserts do not move a row.
    let mut score_stmt = conn.prepare(
        "SELECT sc.student_id, sc.subject, sc.ca_json, sc.exam
         FROM scores sc
         JOIN students s ON s.id = sc.student_id
         WHERE s.class_id = ? AND sc.session = ? AND sc.term = ?
         ORDER BY sc.rowid",
    )?;
    let rows = score_stmt.query_map((class_id, &key.session, &key.term), |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, f64>(3)?,
        ))
    })?;
    for row in rows {
        let (student_id, subject, ca_json, exam) = row?;
        let ca: Vec<f64> = serde_json::from_str(&ca_json)
            .with_context(|| format!("scores.ca_json for {student_id}/{subject}"))?;
        if let Some(&i) = index_by_id.get(&student_id) {
            students[i].subjects.push(SubjectScores { subject, ca, exam });
        }
    }
    Ok(students)
}

fn load_snapshot(
    conn: &Connection,
    class_id: &str,
    key: &TermKey,
) -> anyhow::Result<Option<ClassResults>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT snapshot_json FROM result_snapshots
             WHERE class_id = ? AND session = ? AND term = ?",
            (class_id, &key.session, &key.term),
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Closed terms answer from their persisted snapshot; open terms are
/// aggregated fresh from raw scores on every call.
fn class_results(
    req: &Request,
    conn: &Connection,
    grading: &GradingSystem,
    class_id: &str,
    key: &TermKey,
) -> HandlerResult<(ClassResults, Option<String>)> {
    match db::class_exists(conn, class_id) {
        Ok(true) => {}
        Ok(false) => return Err(err(&req.id, "not_found", "class not found", None)),
        Err(e) => return Err(db_error(req, "db_query_failed", e)),
    }
    let closed_at = db::term_closed_at(conn, class_id, &key.session, &key.term)
        .map_err(|e| db_error(req, "db_query_failed", e))?;

    if closed_at.is_some() {
        let snapshot = load_snapshot(conn, class_id, key)
            .map_err(|e| db_error(req, "db_query_failed", format!("{e:#}")))?;
        let Some(snapshot) = snapshot else {
            return Err(err(
                &req.id,
                "not_found",
                "closed term has no result snapshot",
                None,
            ));
        };
        return Ok((snapshot, closed_at));
    }

    let students = load_class_scores(conn, class_id, key)
        .map_err(|e| db_error(req, "db_query_failed", format!("{e:#}")))?;
    let computed = results::aggregate_class(grading, &students).map_err(|e| caps_mismatch(req, e))?;
    Ok((computed, None))
}

fn handle_scores_upsert(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let conn = require_db(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let key = term_key(req)?;
    let subject = required_str(req, "subject")?;
    let ca = required_f64_array(req, "ca")?;
    let exam = required_f64(req, "exam")?;

    let expected = state.grading.component_caps().len();
    if ca.len() != expected {
        return Err(err(
            &req.id,
            "bad_params",
            format!("ca must have {} components", expected),
            Some(json!({ "expected": expected, "got": ca.len() })),
        ));
    }

    let class_id = match db::student_class_id(conn, &student_id) {
        Ok(Some(c)) => c,
        Ok(None) => return Err(err(&req.id, "not_found", "student not found", None)),
        Err(e) => return Err(db_error(req, "db_query_failed", e)),
    };
    let closed_at = db::term_closed_at(conn, &class_id, &key.session, &key.term)
        .map_err(|e| db_error(req, "db_query_failed", e))?;
    if let Some(closed_at) = closed_at {
        return Err(err(
            &req.id,
            "term_closed",
            "term results are finalized",
            Some(json!({ "closedAt": closed_at })),
        ));
    }

    let ca_json = serde_json::to_string(&ca).map_err(|e| db_error(req, "bad_params", e))?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO scores(student_id, session, term, subject, ca_json, exam, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, session, term, subject) DO UPDATE SET
           ca_json = excluded.ca_json,
           exam = excluded.exam,
           updated_at = excluded.updated_at",
        (
            &student_id,
            &key.session,
            &key.term,
            &subject,
            &ca_json,
            exam,
            &now,
        ),
    )
    .map_err(|e| {
        err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "scores" })),
        )
    })?;

    let input = SubjectScores { subject, ca, exam };
    let score = results::assess(&state.grading, &input).map_err(|e| caps_mismatch(req, e))?;
    tracing::debug!(student = %student_id, subject = %input.subject, total = score.total, "score recorded");
    Ok(ok(&req.id, json!({ "score": score })))
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let conn = require_db(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let key = term_key(req)?;

    // A finalized term lists what its snapshot recorded.
    let class_id = match db::student_class_id(conn, &student_id) {
        Ok(Some(c)) => c,
        Ok(None) => return Err(err(&req.id, "not_found", "student not found", None)),
        Err(e) => return Err(db_error(req, "db_query_failed", e)),
    };
    let closed_at = db::term_closed_at(conn, &class_id, &key.session, &key.term)
        .map_err(|e| db_error(req, "db_query_failed", e))?;
    if closed_at.is_some() {
        let snapshot = load_snapshot(conn, &class_id, &key)
            .map_err(|e| db_error(req, "db_query_failed", format!("{e:#}")))?;
        let slip = snapshot.as_ref().and_then(|s| s.student(&student_id));
        return Ok(ok(
            &req.id,
            json!({
                "closed": true,
                "closedAt": closed_at,
                "scores": slip.map(|s| s.scores.clone()).unwrap_or_default(),
                "totalScore": slip.map(|s| s.total_score).unwrap_or(0.0),
                "average": slip.map(|s| s.average).unwrap_or(0.0),
            }),
        ));
    }

    let mut stmt = conn
        .prepare(
            "SELECT subject, ca_json, exam
             FROM scores
             WHERE student_id = ? AND session = ? AND term = ?
             ORDER BY rowid",
        )
        .map_err(|e| db_error(req, "db_query_failed", e))?;
    let rows: Vec<(String, String, f64)> = stmt
        .query_map((&student_id, &key.session, &key.term), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_error(req, "db_query_failed", e))?;

    let mut scores = Vec::with_capacity(rows.len());
    for (subject, ca_json, exam) in rows {
        let ca: Vec<f64> =
            serde_json::from_str(&ca_json).map_err(|e| db_error(req, "db_query_failed", e))?;
        let input = SubjectScores { subject, ca, exam };
        scores.push(results::assess(&state.grading, &input).map_err(|e| caps_mismatch(req, e))?);
    }
    let totals: Vec<f64> = scores.iter().map(|s| s.total).collect();

    Ok(ok(
        &req.id,
        json!({
            "closed": false,
            "closedAt": null,
            "scores": scores,
            "totalScore": totals.iter().sum::<f64>(),
            "average": crate::grading::compute_average(&totals),
        }),
    ))
}

fn handle_results_compute(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let conn = require_db(state, req)?;
    let class_id = required_str(req, "classId")?;
    let key = term_key(req)?;
    let (computed, closed_at) = class_results(req, conn, &state.grading, &class_id, &key)?;

    Ok(ok(
        &req.id,
        json!({
            "classId": class_id,
            "session": key.session,
            "term": key.term,
            "closed": closed_at.is_some(),
            "closedAt": closed_at,
            "gradingSystem": computed.grading_system,
            "classSize": computed.class_size,
            "classAverage": computed.class_average,
            "results": computed.results,
        }),
    ))
}

fn handle_results_table(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let conn = require_db(state, req)?;
    let class_id = required_str(req, "classId")?;
    let key = term_key(req)?;
    let spec = TableQuerySpec::from_json(req.params.get("query")).map_err(|e| {
        err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "field": e.field })),
        )
    })?;
    let (computed, closed_at) = class_results(req, conn, &state.grading, &class_id, &key)?;
    let page = table::query(&computed.results, &RESULT_FIELDS, &spec);

    Ok(ok(
        &req.id,
        json!({
            "closed": closed_at.is_some(),
            "closedAt": closed_at,
            "classSize": computed.class_size,
            "classAverage": computed.class_average,
            "rows": page.rows,
            "totalMatched": page.total_matched,
            "totalPages": page.total_pages,
            "page": page.page,
        }),
    ))
}

fn handle_results_finalize(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let conn = require_db(state, req)?;
    let class_id = required_str(req, "classId")?;
    let key = term_key(req)?;
    let (computed, closed_at) = class_results(req, conn, &state.grading, &class_id, &key)?;
    if let Some(closed_at) = closed_at {
        return Err(err(
            &req.id,
            "term_closed",
            "term results are already finalized",
            Some(json!({ "closedAt": closed_at })),
        ));
    }

    let snapshot =
        serde_json::to_string(&computed).map_err(|e| db_error(req, "db_insert_failed", e))?;
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_error(req, "db_tx_failed", e))?;
    if let Err(e) = tx.execute(
        "INSERT INTO result_snapshots(class_id, session, term, snapshot_json, created_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, session, term) DO UPDATE SET
           snapshot_json = excluded.snapshot_json,
           created_at = excluded.created_at",
        (&class_id, &key.session, &key.term, &snapshot, &now),
    ) {
        let _ = tx.rollback();
        return Err(err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "result_snapshots" })),
        ));
    }
    if let Err(e) = tx.execute(
        "INSERT INTO terms(class_id, session, term, closed_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, session, term) DO UPDATE SET closed_at = excluded.closed_at",
        (&class_id, &key.session, &key.term, &now),
    ) {
        let _ = tx.rollback();
        return Err(err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "terms" })),
        ));
    }
    tx.commit().map_err(|e| db_error(req, "db_tx_failed", e))?;

    tracing::info!(
        class = %class_id,
        session = %key.session,
        term = %key.term,
        class_size = computed.class_size,
        "term finalized"
    );
    Ok(ok(
        &req.id,
        json!({
            "closedAt": now,
            "classSize": computed.class_size,
            "classAverage": computed.class_average,
        }),
    ))
}

fn handle_results_get(state: &mut AppState, req: &Request) -> HandlerResult<serde_json::Value> {
    let conn = require_db(state, req)?;
    let class_id = required_str(req, "classId")?;
    let student_id = required_str(req, "studentId")?;
    let key = term_key(req)?;
    let (computed, closed_at) = class_results(req, conn, &state.grading, &class_id, &key)?;
    let Some(slip) = computed.student(&student_id) else {
        return Err(err(&req.id, "not_found", "student has no result in this term", None));
    };

    Ok(ok(
        &req.id,
        json!({
            "session": key.session,
            "term": key.term,
            "closed": closed_at.is_some(),
            "closedAt": closed_at,
            "gradingSystem": computed.grading_system,
            "result": slip,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.upsert" => Some(respond(handle_scores_upsert(state, req))),
        "scores.list" => Some(respond(handle_scores_list(state, req))),
        "results.compute" => Some(respond(handle_results_compute(state, req))),
        "results.table" => Some(respond(handle_results_table(state, req))),
        "results.finalize" => Some(respond(handle_results_finalize(state, req))),
        "results.get" => Some(respond(handle_results_get(state, req))),
        _ => None,
    }
}
