use crate::backup;
use crate::cache::LocalCache;
use crate::directory::HttpDirectory;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::portal::Portal;
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "apiBaseUrl": state.config.api_base_url,
        }),
    )
}

fn open_portal(state: &AppState, path: &Path) -> anyhow::Result<Portal> {
    let cache = LocalCache::open(path)?;
    let directory = HttpDirectory::new(&state.config.api_base_url, state.config.request_timeout)?;
    Portal::new(cache, Box::new(directory))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    if let Some(url) = req.params.get("apiBaseUrl").and_then(|v| v.as_str()) {
        let url = url.trim().trim_end_matches('/');
        if !url.is_empty() {
            state.config.api_base_url = url.to_string();
        }
    }

    // Release the previous workspace before opening the next one.
    state.portal = None;
    match open_portal(state, &path) {
        Ok(portal) => {
            // A fresh tab reconciles once on open; offline is not an error.
            let sync = match portal.sync_students() {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(error = %e, "initial reconcile failed");
                    None
                }
            };
            let result = json!({
                "workspacePath": path.to_string_lossy(),
                "apiBaseUrl": state.config.api_base_url,
                "instanceId": portal.cache().instance_id(),
                "sync": sync.and_then(|r| serde_json::to_value(r).ok()),
            });
            tracing::info!(workspace = %path.display(), "workspace selected");
            state.workspace = Some(path);
            state.portal = Some(portal);
            ok(&req.id, result)
        }
        Err(e) => {
            state.workspace = None;
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn workspace_param(state: &AppState, req: &Request) -> Option<PathBuf> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = workspace_param(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match backup::export_cache_bundle(&workspace_path, Path::new(&out_path)) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": out_path,
                "bundleFormat": summary.bundle_format,
                "sha256": summary.sha256,
                "bytes": summary.bytes,
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{:#}", e),
            Some(json!({ "path": out_path })),
        ),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let Some(workspace_path) = workspace_param(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop the open cache before replacing its file.
    let reopen = state.portal.is_some() && state.workspace.as_deref() == Some(workspace_path.as_path());
    if reopen {
        state.portal = None;
    }
    let import = match backup::import_cache_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                format!("{:#}", e),
                Some(json!({ "path": in_path })),
            )
        }
    };
    if reopen {
        match open_portal(state, &workspace_path) {
            Ok(portal) => state.portal = Some(portal),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }
    ok(
        &req.id,
        json!({
            "workspacePath": workspace_path.to_string_lossy(),
            "bundleFormatDetected": import.bundle_format_detected,
            "sha256": import.sha256,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "backup.exportCache" => Some(handle_backup_export(state, req)),
        "backup.importCache" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
