use crate::ipc::helpers::{
    get_opt_str, get_required_id, get_required_str, parse_params, saved_json, to_json, with_portal,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::portal::{DaySchedule, NewAnnouncement, NewImportantDate, NewMaterial, Portal};
use serde_json::{json, Value};

fn announcements_list(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "announcements": to_json(&portal.announcements()?)? }))
}

fn announcements_add(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let input: NewAnnouncement = parse_params(params, "announcement")?;
    saved_json(&portal.add_announcement(input)?, "Announcement")
}

fn announcements_delete(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    let saved = portal.delete_announcement(id)?;
    Ok(json!({ "id": id, "path": to_json(&saved.path)? }))
}

fn materials_list(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "materials": to_json(&portal.materials()?)? }))
}

fn materials_for_class(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_required_str(params, "class")?;
    Ok(json!({ "materials": to_json(&portal.materials_for_class(&class)?)? }))
}

fn materials_add(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let input: NewMaterial = parse_params(params, "material")?;
    saved_json(&portal.add_material(input)?, "Study material")
}

fn materials_delete(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    let saved = portal.delete_material(id)?;
    Ok(json!({ "id": id, "path": to_json(&saved.path)? }))
}

fn materials_download(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    to_json(&portal.download_material(id)?)
}

fn schedules_list(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "schedules": to_json(&portal.schedules()?)? }))
}

fn schedules_save(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_required_str(params, "class")?;
    let schedule: DaySchedule = match params.get("schedule") {
        Some(v) => parse_params(v, "schedule")?,
        None => return Err(HandlerErr::bad_params("missing schedule")),
    };
    let saved = portal.save_schedule(&class, schedule)?;
    Ok(json!({ "class": class, "schedule": to_json(&saved)? }))
}

fn schedules_delete(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let class = get_required_str(params, "class")?;
    portal.delete_schedule(&class)?;
    Ok(json!({ "class": class }))
}

fn schedules_copy(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let from = get_required_str(params, "from")?;
    match get_opt_str(params, "to") {
        Some(to) => portal.copy_schedule(&from, &to)?,
        None => portal.copy_schedule_to_all(&from)?,
    }
    Ok(json!({ "schedules": to_json(&portal.schedules()?)? }))
}

fn schedules_reset(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "schedules": to_json(&portal.reset_schedules()?)? }))
}

fn dates_list(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "dates": to_json(&portal.important_dates()?)? }))
}

fn dates_add(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let input: NewImportantDate = parse_params(params, "important date")?;
    to_json(&portal.add_important_date(input)?)
}

fn dates_delete(portal: &Portal, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_id(params, "id")?;
    portal.delete_important_date(id)?;
    Ok(json!({ "id": id }))
}

fn stats_get(portal: &Portal, _params: &Value) -> Result<Value, HandlerErr> {
    to_json(&portal.stats()?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Portal, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "announcements.list" => announcements_list,
        "announcements.add" => announcements_add,
        "announcements.delete" => announcements_delete,
        "materials.list" => materials_list,
        "materials.forClass" => materials_for_class,
        "materials.add" => materials_add,
        "materials.delete" => materials_delete,
        "materials.download" => materials_download,
        "schedules.list" => schedules_list,
        "schedules.save" => schedules_save,
        "schedules.delete" => schedules_delete,
        // Without `to`, copies to every standard class.
        "schedules.copy" => schedules_copy,
        "schedules.reset" => schedules_reset,
        "dates.list" => dates_list,
        "dates.add" => dates_add,
        "dates.delete" => dates_delete,
        "stats.get" => stats_get,
        _ => return None,
    };
    Some(with_portal(state, req, f))
}
