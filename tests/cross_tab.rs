mod support;

use serde_json::{json, Value};
use support::{dead_api_url, spawn_sidecar, student_profile, temp_dir};

fn changed(poll: &Value, key: &str) -> bool {
    poll["changed"]
        .as_array()
        .map(|keys| keys.iter().any(|k| k == key))
        .unwrap_or(false)
}

#[test]
fn two_sidecars_on_one_workspace_see_each_others_writes() {
    let workspace = temp_dir("coachd-cross-tab");
    let api = dead_api_url();
    let mut a = spawn_sidecar(&api);
    let mut b = spawn_sidecar(&api);
    a.select(&workspace);
    b.select(&workspace);

    let quiet = b.request_ok("events.poll", json!({}));
    assert_eq!(quiet["changed"], json!([]));
    assert_eq!(quiet["sessionEnded"], false);

    a.request_ok(
        "students.create",
        json!({ "profile": student_profile("Asha Rao", "asha") }),
    );
    let poll = b.request_ok("events.poll", json!({}));
    assert!(changed(&poll, "students"), "{}", poll);
    let listed = b.request_ok("students.list", json!({}));
    assert_eq!(listed["students"][0]["username"], "asha");

    // A's own writes are not reported back to A.
    let own = a.request_ok("events.poll", json!({}));
    assert!(!changed(&own, "students"), "{}", own);

    a.request_ok("session.impersonate", json!({ "studentId": 1001 }));
    let poll = b.request_ok("events.poll", json!({}));
    assert!(changed(&poll, "currentStudent"), "{}", poll);
    assert_eq!(poll["currentStudent"]["id"], 1001);
    assert_eq!(poll["sessionEnded"], false);

    a.request_ok("session.endImpersonation", json!({}));
    let poll = b.request_ok("events.poll", json!({}));
    assert_eq!(poll["sessionEnded"], true);
    assert!(poll["currentStudent"].is_null());

    let again = b.request_ok("events.poll", json!({}));
    assert_eq!(again["changed"], json!([]));

    drop(a);
    drop(b);
    let _ = std::fs::remove_dir_all(workspace);
}
