use crate::ipc::helpers::{
    get_opt_str, get_required_id, get_required_str, to_json, with_portal, with_portal_mut,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::portal::Portal;
use serde_json::{json, Value};

fn admin_login(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    Ok(json!({ "admin": portal.admin_login(&username, &password)? }))
}

fn student_login(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let student = portal.student_login(username.trim(), &password)?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn impersonate(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "studentId")?;
    let reason = get_opt_str(params, "reason");
    let student = portal.impersonate(id, reason.as_deref())?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn end_impersonation(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "logEntry": to_json(&portal.end_impersonation()?)? }))
}

fn current(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    to_json(&portal.current_session()?)
}

/// `role` is "student" (default) or "admin".
fn logout(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    match get_opt_str(params, "role").as_deref() {
        None | Some("student") => portal.logout_student()?,
        Some("admin") => portal.logout_admin()?,
        Some(other) => return Err(HandlerErr::bad_params(format!("unknown role: {}", other))),
    }
    Ok(json!({ "ok": true }))
}

fn dashboard(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let month = get_opt_str(params, "month");
    to_json(&portal.dashboard(month.as_deref())?)
}

fn events_poll(portal: &mut Portal, _params: &Value) -> Result<Value, HandlerErr> {
    to_json(&portal.poll_events()?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Portal, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "session.adminLogin" => admin_login,
        "session.studentLogin" => student_login,
        "session.impersonate" => impersonate,
        "session.endImpersonation" => end_impersonation,
        "session.current" => current,
        "session.logout" => logout,
        "session.dashboard" => dashboard,
        "events.poll" => return Some(with_portal_mut(state, req, events_poll)),
        _ => return None,
    };
    Some(with_portal(state, req, f))
}
