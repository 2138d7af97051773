use crate::ipc::helpers::{get_opt_str, get_required_str, parse_params, to_json, with_portal, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::portal::{AttendanceMark, Portal};
use serde_json::{json, Value};

fn marks_param(params: &Value) -> Result<Vec<AttendanceMark>, HandlerErr> {
    match params.get("entries") {
        Some(v) => parse_params(v, "entries"),
        None => Err(HandlerErr::bad_params("missing entries")),
    }
}

fn attendance_submit(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_required_str(params, "class")?;
    let date = get_required_str(params, "date")?;
    let summary = portal.submit_attendance(&class, &date, &marks_param(params)?)?;
    to_json(&summary)
}

fn attendance_save_details(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_required_str(params, "class")?;
    let date = get_required_str(params, "date")?;
    let updated = portal.save_attendance_details(&class, &date, &marks_param(params)?)?;
    Ok(json!({ "updated": updated }))
}

fn attendance_records(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_opt_str(params, "class");
    let month = get_opt_str(params, "month");
    let rows = portal.attendance_records(class.as_deref(), month.as_deref())?;
    Ok(json!({ "records": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Portal, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "attendance.submit" => attendance_submit,
        "attendance.saveDetails" => attendance_save_details,
        "attendance.records" => attendance_records,
        _ => return None,
    };
    Some(with_portal(state, req, f))
}
