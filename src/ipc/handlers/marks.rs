use crate::ipc::helpers::{get_opt_str, get_required_str, parse_params, to_json, with_portal, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::portal::{MarkEntry, Portal, TestHeader};
use serde_json::{json, Value};

fn marks_submit(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let header: TestHeader = match params.get("test") {
        Some(v) => parse_params(v, "test")?,
        None => return Err(HandlerErr::bad_params("missing test")),
    };
    let entries: Vec<MarkEntry> = match params.get("entries") {
        Some(v) => parse_params(v, "entries")?,
        None => return Err(HandlerErr::bad_params("missing entries")),
    };
    to_json(&portal.submit_marks(&header, &entries)?)
}

fn marks_delete_test(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let test_name = get_required_str(params, "testName")?;
    let subject = get_required_str(params, "subject")?;
    let date = get_required_str(params, "date")?;
    let removed = portal.delete_test(&test_name, &subject, &date)?;
    Ok(json!({ "removed": removed }))
}

fn marks_records(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_opt_str(params, "class");
    let subject = get_opt_str(params, "subject");
    let month = get_opt_str(params, "month");
    let rows = portal.test_records(class.as_deref(), subject.as_deref(), month.as_deref())?;
    Ok(json!({ "records": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Portal, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "marks.submit" => marks_submit,
        "marks.deleteTest" => marks_delete_test,
        "marks.records" => marks_records,
        _ => return None,
    };
    Some(with_portal(state, req, f))
}
