//! The Remote Student Directory: a small single-threaded JSON server over one
//! SQLite file.

pub mod db;
pub mod routes;

use anyhow::anyhow;
use rusqlite::Connection;
use std::io::Read;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::config::ServerConfig;

const CORS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET,POST,PUT,DELETE,OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn with_cors<R: Read>(mut resp: Response<R>, json: bool) -> Response<R> {
    for (k, v) in CORS {
        if let Some(h) = header(k, v) {
            resp.add_header(h);
        }
    }
    if json {
        if let Some(h) = header("Content-Type", "application/json") {
            resp.add_header(h);
        }
    }
    resp
}

pub fn run(config: &ServerConfig) -> anyhow::Result<()> {
    let conn = db::open_db(&config.database_file)?;
    tracing::info!(database = %config.database_file.display(), "using SQLite database file");
    match db::seed_from_file(&conn, &config.seed_file) {
        Ok(Some(s)) => tracing::info!(
            admin = s.admin,
            students = s.students,
            announcements = s.announcements,
            materials = s.study_materials,
            settings = s.settings,
            "seed data applied"
        ),
        Ok(None) => tracing::debug!(seed = %config.seed_file.display(), "no seed file"),
        Err(e) => tracing::error!(error = %format!("{:#}", e), "seeding failed"),
    }

    let server = Server::http(config.addr())
        .map_err(|e| anyhow!("failed to bind {}: {}", config.addr(), e))?;
    tracing::info!(addr = %config.addr(), "directory server listening");
    serve(&server, &conn);
    Ok(())
}

/// Answers requests until the server is unblocked or its socket closes.
pub fn serve(server: &Server, conn: &Connection) {
    for req in server.incoming_requests() {
        handle(conn, req);
    }
}

fn handle(conn: &Connection, mut req: Request) {
    let method = req.method().clone();
    let path = req.url().to_string();

    if method == Method::Options {
        tracing::info!(method = %method, path = %path, status = 204, "request");
        let _ = req.respond(with_cors(Response::empty(StatusCode(204)), false));
        return;
    }

    let mut body = String::new();
    let (status, value) = match req.as_reader().read_to_string(&mut body) {
        Ok(_) => routes::route(conn, method.as_str(), &path, &body),
        Err(_) => (400, serde_json::json!({ "error": "Invalid JSON" })),
    };
    tracing::info!(method = %method, path = %path, status, "request");
    let resp = Response::from_string(value.to_string()).with_status_code(StatusCode(status));
    if let Err(e) = req.respond(with_cors(resp, true)) {
        tracing::warn!(error = %e, "failed to write response");
    }
}
