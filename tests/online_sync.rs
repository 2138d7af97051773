mod support;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use support::{spawn_server, spawn_sidecar, student_profile, temp_dir};

fn find(list: &Value, id: i64) -> Option<Value> {
    list["students"]
        .as_array()?
        .iter()
        .find(|s| s["id"].as_i64() == Some(id))
        .cloned()
}

#[test]
fn remote_edits_merge_without_losing_local_history() {
    let dir = temp_dir("coach-online-merge");
    let server = spawn_server(&dir, None);
    let workspace = dir.join("workspace");
    let mut sc = spawn_sidecar(&server.base_url);
    sc.select(&workspace);

    let created = sc.request_ok(
        "students.create",
        json!({ "profile": student_profile("Asha Rao", "asha") }),
    );
    assert_eq!(created["path"], "remote");
    assert_eq!(created["message"], "Student saved successfully");
    let id = created["value"]["id"].as_i64().expect("server id");

    sc.request_ok(
        "attendance.submit",
        json!({ "class": "10th", "date": "2025-01-01", "entries": [{ "studentId": id, "status": "Present" }] }),
    );

    // Another admin renames the student directly on the server.
    let client = Client::new();
    let mut renamed = student_profile("Asha Rao-Menon", "asha");
    renamed["status"] = json!("Active");
    let resp = client
        .put(format!("{}/api/students/{}", server.base_url, id))
        .json(&renamed)
        .send()
        .expect("put");
    assert_eq!(resp.status().as_u16(), 200);

    let sync = sc.request_ok("students.sync", json!({}));
    assert_eq!(sync["online"], true);
    assert_eq!(sync["report"]["merged"], 1);

    let list = sc.request_ok("students.list", json!({}));
    let merged = find(&list, id).expect("merged record");
    assert_eq!(merged["name"], "Asha Rao-Menon");
    assert_eq!(merged["attendance"][0]["date"], "2025-01-01");
    assert_eq!(merged["attendance"][0]["status"], "Present");

    // Reconciling again changes nothing.
    let again = sc.request_ok("students.sync", json!({}));
    assert_eq!(again["report"]["students"], sync["report"]["students"]);

    drop(sc);
    drop(server);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn deletes_stick_even_when_the_server_still_has_the_row() {
    let dir = temp_dir("coach-online-tombstone");
    let server = spawn_server(
        &dir,
        Some(&json!({
            "students": [
                { "id": 7, "name": "Old Student", "class": "9th", "username": "old7", "password": "secret7" },
                { "id": 8, "name": "Kept Student", "class": "9th", "username": "kept8", "password": "secret8" }
            ]
        })),
    );
    let workspace = dir.join("workspace");
    let mut sc = spawn_sidecar(&server.base_url);
    let selected = sc.select(&workspace);
    assert_eq!(selected["sync"]["remoteOnly"], 2);

    let deleted = sc.request_ok("students.delete", json!({ "id": 7 }));
    assert_eq!(deleted["path"], "remote");

    // Put the row back on the server, as a stale replica would.
    let conn = rusqlite::Connection::open(&server.database_file).expect("open server db");
    conn.execute(
        "INSERT INTO students(id, name, class, username, password) VALUES(7, 'Old Student', '9th', 'old7', 'secret7')",
        [],
    )
    .expect("reinsert");
    drop(conn);

    let sync = sc.request_ok("students.sync", json!({}));
    assert_eq!(sync["report"]["suppressed"], 1);
    let list = sc.request_ok("students.list", json!({}));
    assert!(find(&list, 7).is_none());
    assert!(find(&list, 8).is_some());

    let counter = sc.request_ok("students.tombstones", json!({}))["counter"]
        .as_i64()
        .expect("counter");
    assert!(counter >= 1001);

    // Explicit un-tombstone lets the directory's copy back in.
    sc.request_ok("students.untombstone", json!({ "id": 7 }));
    sc.request_ok("students.sync", json!({}));
    let list = sc.request_ok("students.list", json!({}));
    assert!(find(&list, 7).is_some());

    drop(sc);
    drop(server);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn online_login_and_aggregates_reach_the_server() {
    let dir = temp_dir("coach-online-login");
    let server = spawn_server(
        &dir,
        Some(&json!({ "admin": { "username": "admin", "password": "admin123" } })),
    );
    let workspace = dir.join("workspace");
    let mut sc = spawn_sidecar(&server.base_url);
    sc.select(&workspace);

    sc.request_ok("session.adminLogin", json!({ "username": "admin", "password": "admin123" }));
    assert_eq!(sc.request_ok("session.current", json!({}))["adminLoggedIn"], true);

    let created = sc.request_ok(
        "students.create",
        json!({ "profile": student_profile("Dev Patel", "dev") }),
    );
    let id = created["value"]["id"].as_i64().expect("id");

    let login = sc.request_ok(
        "session.studentLogin",
        json!({ "username": "dev", "password": "secret1" }),
    );
    assert_eq!(login["student"]["id"], id);
    assert_eq!(
        sc.request_err("session.studentLogin", json!({ "username": "dev", "password": "wrong00" })),
        "unauthorized"
    );

    let summary = sc.request_ok(
        "attendance.submit",
        json!({ "class": "10th", "date": "2025-02-03", "entries": [{ "studentId": id, "status": "Present" }] }),
    );
    assert_eq!(summary["aggregatePosted"], true);

    let rows: Vec<Value> = Client::new()
        .get(format!("{}/api/attendance_records", server.base_url))
        .send()
        .expect("get")
        .json()
        .expect("json");
    assert_eq!(rows[0]["present"], 1);
    assert_eq!(rows[0]["class"], "10th");

    let announcement = sc.request_ok(
        "announcements.add",
        json!({ "title": "Test week", "content": "Unit tests start Friday", "date": "2025-02-07" }),
    );
    assert_eq!(announcement["path"], "remote");
    let listed = sc.request_ok("announcements.list", json!({}));
    assert_eq!(listed["announcements"][0]["id"], announcement["value"]["id"]);

    drop(sc);
    drop(server);
    let _ = std::fs::remove_dir_all(dir);
}
