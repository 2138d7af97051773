use coachd::config::PortalConfig;
use coachd::ipc;
use std::io::{self, BufRead, Write};

fn main() {
    coachd::logging::init_tracing();
    let config = match PortalConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "invalid configuration");
            std::process::exit(2);
        }
    };
    tracing::info!(api = %config.api_base_url, "portal sidecar starting");
    let mut state = ipc::AppState::new(config);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
