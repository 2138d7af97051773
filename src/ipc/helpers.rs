use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::error::{err, ok};
use super::types::{AppState, Request};
use crate::model::{parse_id, StudentId};
use crate::portal::{Portal, PortalError, Saved};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<PortalError> for HandlerErr {
    fn from(e: PortalError) -> Self {
        let code = match &e {
            PortalError::Validation(_) => "bad_params",
            PortalError::NotFound(_) => "not_found",
            PortalError::Unauthorized => "unauthorized",
            PortalError::Busy => "busy",
            PortalError::Storage(_) => "db_update_failed",
        };
        let message = match e {
            PortalError::Storage(inner) => format!("{:#}", inner),
            other => other.to_string(),
        };
        Self {
            code,
            message,
            details: None,
        }
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed, and `None` when absent or blank.
pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_id(params: &Value, key: &str) -> Result<StudentId, HandlerErr> {
    params
        .get(key)
        .and_then(parse_id)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or non-numeric {}", key)))
}

pub fn parse_params<T: DeserializeOwned>(v: &Value, what: &str) -> Result<T, HandlerErr> {
    serde_json::from_value(v.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", what, e)))
}

pub fn to_json<T: Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

/// `{value, path, message}` for a durable write.
pub fn saved_json<T: Serialize>(saved: &Saved<T>, what: &str) -> Result<Value, HandlerErr> {
    Ok(json!({
        "value": to_json(&saved.value)?,
        "path": to_json(&saved.path)?,
        "message": saved.path.message(what),
    }))
}

fn no_workspace(req: &Request) -> Value {
    err(&req.id, "no_workspace", "select a workspace first", None)
}

pub fn with_portal(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Portal, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(portal) = state.portal.as_ref() else {
        return no_workspace(req);
    };
    match f(portal, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn with_portal_mut(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&mut Portal, &Value) -> Result<Value, HandlerErr>,
) -> Value {
    let Some(portal) = state.portal.as_mut() else {
        return no_workspace(req);
    };
    match f(portal, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
