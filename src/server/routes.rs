use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

use super::db::{int, query_json, text};

pub type Reply = (u16, Value);

fn error(status: u16, message: &str) -> Reply {
    (status, json!({ "error": message }))
}

/// `/api/<collection>/<id>` → `Some(Ok(id))`, `Some(Err(()))` for a
/// non-numeric id, `None` when the path is not under `collection`.
fn id_under(path: &str, collection: &str) -> Option<Result<i64, ()>> {
    let rest = path.strip_prefix(collection)?.strip_prefix('/')?;
    Some(rest.parse::<i64>().map_err(|_| ()))
}

/// Dispatches one request. Bodies are parsed only by routes that read them,
/// and an empty body reads as `{}`.
pub fn route(conn: &Connection, method: &str, path: &str, body: &str) -> Reply {
    let path = path.split('?').next().unwrap_or(path);
    let payload = || -> Result<Value, Reply> {
        let src = if body.trim().is_empty() { "{}" } else { body };
        serde_json::from_str(src).map_err(|_| error(400, "Invalid JSON"))
    };
    let result = match (method, path) {
        ("GET", "/api/students") => query_json(conn, "SELECT * FROM students", []).map(ok_rows),
        ("POST", "/api/students") => match payload() {
            Ok(p) => create_student(conn, &p),
            Err(r) => return r,
        },
        ("POST", "/api/students/login") => match payload() {
            Ok(p) => student_login(conn, &p),
            Err(r) => return r,
        },
        ("POST", "/api/admin/login") => match payload() {
            Ok(p) => admin_login(conn, &p),
            Err(r) => return r,
        },
        ("GET", "/api/announcements") => query_json(
            conn,
            "SELECT * FROM announcements ORDER BY date DESC, id DESC",
            [],
        )
        .map(ok_rows),
        ("POST", "/api/announcements") => match payload() {
            Ok(p) => create_announcement(conn, &p),
            Err(r) => return r,
        },
        ("GET", "/api/study_materials") => query_json(
            conn,
            "SELECT * FROM study_materials ORDER BY uploadDate DESC, id DESC",
            [],
        )
        .map(ok_rows),
        ("POST", "/api/study_materials") => match payload() {
            Ok(p) => create_material(conn, &p),
            Err(r) => return r,
        },
        ("GET", "/api/attendance_records") => query_json(
            conn,
            "SELECT * FROM attendance_records ORDER BY date DESC, id DESC",
            [],
        )
        .map(ok_rows),
        ("POST", "/api/attendance_records") => match payload() {
            Ok(p) => create_attendance_record(conn, &p),
            Err(r) => return r,
        },
        ("GET", "/api/test_results") => query_json(
            conn,
            "SELECT * FROM test_records ORDER BY date DESC, id DESC",
            [],
        )
        .map(ok_rows),
        ("POST", "/api/test_results") => match payload() {
            Ok(p) => create_test_record(conn, &p),
            Err(r) => return r,
        },
        ("PUT", _) => match id_under(path, "/api/students") {
            Some(Ok(id)) => match payload() {
                Ok(p) => update_student(conn, id, &p),
                Err(r) => return r,
            },
            Some(Err(())) => return error(400, "Invalid student id"),
            None => return error(404, "Not found"),
        },
        ("DELETE", _) => {
            let targets = [
                ("/api/students", "students", "student", "Student"),
                ("/api/announcements", "announcements", "announcement", "Announcement"),
                ("/api/study_materials", "study_materials", "material", "Material"),
            ];
            let Some((parsed, table, noun, label)) = targets
                .iter()
                .find_map(|(prefix, table, noun, label)| {
                    id_under(path, prefix).map(|r| (r, *table, *noun, *label))
                })
            else {
                return error(404, "Not found");
            };
            match parsed {
                Ok(id) => delete_by_id(conn, table, id, label),
                Err(()) => return error(400, &format!("Invalid {} id", noun)),
            }
        }
        _ => return error(404, "Not found"),
    };
    result.unwrap_or_else(|e| error(500, &e.to_string()))
}

fn ok_rows(rows: Vec<Value>) -> Reply {
    (200, Value::Array(rows))
}

fn create_student(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    conn.execute(
        "INSERT INTO students(name, class, username, password, phone, email, address, status, createdAt)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'Active', date('now'))",
        params![
            text(p, "name"),
            text(p, "class"),
            text(p, "username"),
            text(p, "password"),
            text(p, "phone"),
            text(p, "email"),
            text(p, "address"),
        ],
    )?;
    Ok((200, json!({ "id": conn.last_insert_rowid() })))
}

fn update_student(conn: &Connection, id: i64, p: &Value) -> rusqlite::Result<Reply> {
    let status = text(p, "status")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Active".to_string());
    let changed = conn.execute(
        "UPDATE students SET name = ?, class = ?, username = ?, password = ?, phone = ?, email = ?,
         address = ?, status = ? WHERE id = ?",
        params![
            text(p, "name"),
            text(p, "class"),
            text(p, "username"),
            text(p, "password"),
            text(p, "phone"),
            text(p, "email"),
            text(p, "address"),
            status,
            id,
        ],
    )?;
    if changed == 0 {
        return Ok(error(404, "Student not found"));
    }
    let row = query_json(conn, "SELECT * FROM students WHERE id = ?", [id])?
        .into_iter()
        .next()
        .unwrap_or_else(|| json!({}));
    Ok((200, row))
}

fn credentials(p: &Value) -> Option<(String, String)> {
    let username = text(p, "username").filter(|s| !s.is_empty())?;
    let password = text(p, "password").filter(|s| !s.is_empty())?;
    Some((username, password))
}

fn student_login(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    let Some((username, password)) = credentials(p) else {
        return Ok(error(400, "Missing username or password"));
    };
    let row = conn
        .query_row(
            "SELECT id, username, name FROM students WHERE username = ? AND password = ?",
            params![username, password],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((id, username, name)) = row else {
        return Ok(error(401, "Invalid credentials"));
    };
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    conn.execute("UPDATE students SET lastLogin = ? WHERE id = ?", params![now, id])?;
    let username = username.unwrap_or_default();
    let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| username.clone());
    Ok((200, json!({ "id": id, "username": username, "name": name })))
}

fn admin_login(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    let Some((username, password)) = credentials(p) else {
        return Ok(error(400, "Missing username or password"));
    };
    let row = conn
        .query_row(
            "SELECT id, username FROM admin WHERE username = ? AND password = ?",
            params![username, password],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?)),
        )
        .optional()?;
    match row {
        Some((id, username)) => Ok((
            200,
            json!({ "id": id, "username": username, "name": "Administrator" }),
        )),
        None => Ok(error(401, "Invalid credentials")),
    }
}

fn create_announcement(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    let priority = text(p, "priority")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "normal".to_string());
    conn.execute(
        "INSERT INTO announcements(title, content, date, priority) VALUES(?, ?, ?, ?)",
        params![text(p, "title"), text(p, "content"), text(p, "date"), priority],
    )?;
    Ok((200, json!({ "id": conn.last_insert_rowid() })))
}

fn create_material(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    conn.execute(
        "INSERT INTO study_materials(title, subject, class, type, description, fileName, fileSize, downloads, uploadDate, link)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, date('now'), ?)",
        params![
            text(p, "title"),
            text(p, "subject"),
            text(p, "class"),
            text(p, "type"),
            text(p, "description"),
            text(p, "fileName"),
            text(p, "fileSize").filter(|s| !s.is_empty()),
            text(p, "link").filter(|s| !s.is_empty()),
        ],
    )?;
    Ok((200, json!({ "id": conn.last_insert_rowid() })))
}

fn create_attendance_record(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    conn.execute(
        "INSERT INTO attendance_records(date, class, present, absent, total) VALUES(?, ?, ?, ?, ?)",
        params![
            text(p, "date"),
            text(p, "class"),
            int(p, "present").unwrap_or(0),
            int(p, "absent").unwrap_or(0),
            int(p, "total").unwrap_or(0),
        ],
    )?;
    Ok((200, json!({ "id": conn.last_insert_rowid() })))
}

fn create_test_record(conn: &Connection, p: &Value) -> rusqlite::Result<Reply> {
    conn.execute(
        "INSERT INTO test_records(testName, subject, class, date, totalMarks, totalStudents, averagePercentage)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![
            text(p, "testName"),
            text(p, "subject"),
            text(p, "class"),
            text(p, "date"),
            int(p, "totalMarks").unwrap_or(0),
            int(p, "totalStudents").unwrap_or(0),
            int(p, "averagePercentage").unwrap_or(0),
        ],
    )?;
    Ok((200, json!({ "id": conn.last_insert_rowid() })))
}

fn delete_by_id(conn: &Connection, table: &str, id: i64, label: &str) -> rusqlite::Result<Reply> {
    let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?", table), [id])?;
    if changed == 0 {
        return Ok(error(404, &format!("{} not found", label)));
    }
    Ok((200, json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::db::ensure_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("db");
        ensure_schema(&conn).expect("schema");
        conn
    }

    fn student_body(username: &str) -> String {
        json!({
            "name": "Asha Rao", "class": "10th", "username": username, "password": "secret1",
            "phone": "9876543210", "email": "", "address": ""
        })
        .to_string()
    }

    #[test]
    fn create_list_update_delete_student() {
        let conn = conn();
        let (status, created) = route(&conn, "POST", "/api/students", &student_body("asha"));
        assert_eq!(status, 200);
        let id = created["id"].as_i64().expect("id");

        let (_, list) = route(&conn, "GET", "/api/students", "");
        assert_eq!(list[0]["status"], "Active");

        let (status, updated) = route(
            &conn,
            "PUT",
            &format!("/api/students/{}", id),
            &json!({ "name": "Asha R", "class": "11th Science", "username": "asha" }).to_string(),
        );
        assert_eq!(status, 200);
        assert_eq!(updated["class"], "11th Science");
        assert_eq!(updated["status"], "Active");

        let path = format!("/api/students/{}", id);
        assert_eq!(route(&conn, "DELETE", &path, "").0, 200);
        let (status, body) = route(&conn, "DELETE", &path, "");
        assert_eq!(status, 404);
        assert_eq!(body["error"], "Student not found");
    }

    #[test]
    fn bad_requests_get_400_or_404() {
        let conn = conn();
        assert_eq!(route(&conn, "POST", "/api/students", "{nope").0, 400);
        assert_eq!(route(&conn, "DELETE", "/api/students/abc", "").1["error"], "Invalid student id");
        assert_eq!(route(&conn, "PUT", "/api/students/1", "{}").0, 404);
        assert_eq!(route(&conn, "GET", "/api/nothing", "").1["error"], "Not found");
        assert_eq!(route(&conn, "POST", "/api/students/login", "{}").0, 400);
    }

    #[test]
    fn duplicate_username_is_a_server_error() {
        let conn = conn();
        assert_eq!(route(&conn, "POST", "/api/students", &student_body("dup")).0, 200);
        let (status, body) = route(&conn, "POST", "/api/students", &student_body("dup"));
        assert_eq!(status, 500);
        assert!(body["error"].as_str().expect("msg").contains("UNIQUE"));
    }

    #[test]
    fn student_login_stamps_last_login() {
        let conn = conn();
        route(&conn, "POST", "/api/students", &student_body("asha"));
        let bad = json!({ "username": "asha", "password": "wrong00" }).to_string();
        assert_eq!(route(&conn, "POST", "/api/students/login", &bad).0, 401);
        let good = json!({ "username": "asha", "password": "secret1" }).to_string();
        let (status, who) = route(&conn, "POST", "/api/students/login", &good);
        assert_eq!(status, 200);
        assert_eq!(who["name"], "Asha Rao");
        let (_, list) = route(&conn, "GET", "/api/students", "");
        assert!(list[0]["lastLogin"].is_string());
    }

    #[test]
    fn aggregate_records_round_trip_through_listing() {
        let conn = conn();
        let body = json!({ "testName": "Unit 1", "subject": "Physics", "class": "10th",
            "date": "2025-02-01", "totalMarks": 50, "totalStudents": 2, "averagePercentage": 71 });
        assert_eq!(route(&conn, "POST", "/api/test_results", &body.to_string()).0, 200);
        let (_, rows) = route(&conn, "GET", "/api/test_results", "");
        assert_eq!(rows[0]["averagePercentage"], 71);

        let att = json!({ "date": "2025-02-01", "class": "10th", "present": 3 });
        route(&conn, "POST", "/api/attendance_records", &att.to_string());
        let (_, rows) = route(&conn, "GET", "/api/attendance_records?class=10th", "");
        assert_eq!(rows[0]["total"], 0);
    }
}
