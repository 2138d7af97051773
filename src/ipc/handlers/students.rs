use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_required_id, get_required_str, parse_params, saved_json, to_json, with_portal, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::StudentProfile;
use crate::portal::{generate_credentials, Portal, PortalError};
use serde_json::{json, Value};

fn students_list(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    let students = portal.students()?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_get(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    to_json(&portal.student(id)?)
}

fn profile_param(params: &Value) -> Result<StudentProfile, HandlerErr> {
    let Some(p) = params.get("profile") else {
        return Err(HandlerErr::bad_params("missing profile"));
    };
    parse_params(p, "profile")
}

fn students_create(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let saved = portal.create_student(profile_param(params)?)?;
    saved_json(&saved, "Student")
}

fn students_update(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    let saved = portal.update_student(id, profile_param(params)?)?;
    saved_json(&saved, "Student")
}

fn students_delete(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    let saved = portal.delete_student(id)?;
    Ok(json!({
        "id": id,
        "path": to_json(&saved.path)?,
        "message": saved.path.message("Student deletion"),
    }))
}

fn students_reset_password(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let saved = portal.reset_password(id, password)?;
    let mut out = saved_json(&saved, "Password")?;
    out["password"] = json!(saved.value.password);
    Ok(out)
}

fn students_generate_credentials(params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("Please enter student name first"));
    }
    to_json(&generate_credentials(&name))
}

fn students_untombstone(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    Ok(json!({ "id": id, "removed": portal.untombstone(id)? }))
}

fn students_sync(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    match portal.sync_students()? {
        Some(report) => Ok(json!({ "online": true, "report": to_json(&report)? })),
        None => Ok(json!({ "online": false, "report": null })),
    }
}

fn students_tombstones(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    let cache = portal.cache();
    let ids = cache.tombstones().map_err(PortalError::from)?;
    let counter = cache.id_counter().map_err(PortalError::from)?;
    Ok(json!({ "ids": ids.as_slice(), "counter": counter }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Portal, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.resetPassword" => students_reset_password,
        "students.generateCredentials" => {
            return Some(match students_generate_credentials(&req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        "students.untombstone" => students_untombstone,
        "students.sync" => students_sync,
        "students.tombstones" => students_tombstones,
        _ => return None,
    };
    Some(with_portal(state, req, f))
}
