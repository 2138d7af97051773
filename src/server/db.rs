use anyhow::Context;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Params};
use serde_json::{Map, Value};
use std::path::Path;

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            name TEXT,
            class TEXT,
            username TEXT UNIQUE,
            password TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            status TEXT,
            createdAt TEXT,
            lastLogin TEXT
        )",
        [],
    )?;
    // Databases created before logins were tracked lack lastLogin.
    ensure_students_last_login(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admin(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE,
            password TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id INTEGER PRIMARY KEY,
            title TEXT,
            content TEXT,
            date TEXT,
            priority TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_materials(
            id INTEGER PRIMARY KEY,
            title TEXT,
            subject TEXT,
            class TEXT,
            type TEXT,
            description TEXT,
            fileName TEXT,
            fileSize TEXT,
            downloads INTEGER,
            uploadDate TEXT,
            link TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT,
            class TEXT,
            present INTEGER,
            absent INTEGER,
            total INTEGER
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_records(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            testName TEXT,
            subject TEXT,
            class TEXT,
            date TEXT,
            totalMarks INTEGER,
            totalStudents INTEGER,
            averagePercentage INTEGER
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            k TEXT PRIMARY KEY,
            v TEXT
        )",
        [],
    )?;
    Ok(())
}

fn ensure_students_last_login(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "lastLogin")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN lastLogin TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn table_is_empty(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
    Ok(n == 0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub admin: usize,
    pub students: usize,
    pub announcements: usize,
    pub study_materials: usize,
    pub settings: usize,
}

/// Text form of a JSON field. Non-string scalars are stringified.
pub fn text(v: &Value, key: &str) -> Option<String> {
    match v.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

pub fn int(v: &Value, key: &str) -> Option<i64> {
    match v.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fills each empty table from the seed document. Tables that already hold
/// rows are left alone.
pub fn seed_from_file(conn: &Connection, seed_path: &Path) -> anyhow::Result<Option<SeedSummary>> {
    if !seed_path.is_file() {
        return Ok(None);
    }
    let text_src = std::fs::read_to_string(seed_path)
        .with_context(|| format!("failed to read seed file {}", seed_path.display()))?;
    let seed: Value = serde_json::from_str(&text_src)
        .with_context(|| format!("seed file {} is invalid JSON", seed_path.display()))?;
    seed_from_value(conn, &seed).map(Some)
}

pub fn seed_from_value(conn: &Connection, seed: &Value) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let tx = conn.unchecked_transaction()?;

    if let Some(admin) = seed.get("admin").filter(|a| a.is_object()) {
        if table_is_empty(&tx, "admin")? {
            tx.execute(
                "INSERT INTO admin(username, password) VALUES(?, ?)",
                params![text(admin, "username"), text(admin, "password")],
            )?;
            summary.admin = 1;
        }
    }

    if let Some(students) = seed.get("students").and_then(|v| v.as_array()) {
        if table_is_empty(&tx, "students")? {
            let mut stmt = tx.prepare(
                "INSERT INTO students(id, name, class, username, password, phone, email, address, status, createdAt)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for s in students {
                stmt.execute(params![
                    int(s, "id"),
                    text(s, "name"),
                    text(s, "class"),
                    text(s, "username"),
                    text(s, "password"),
                    text(s, "phone"),
                    text(s, "email"),
                    text(s, "address"),
                    text(s, "status"),
                    text(s, "createdAt"),
                ])?;
                summary.students += 1;
            }
        }
    }

    if let Some(items) = seed.get("announcements").and_then(|v| v.as_array()) {
        if table_is_empty(&tx, "announcements")? {
            let mut stmt = tx.prepare(
                "INSERT INTO announcements(id, title, content, date, priority) VALUES(?, ?, ?, ?, ?)",
            )?;
            for a in items {
                stmt.execute(params![
                    int(a, "id"),
                    text(a, "title"),
                    text(a, "content"),
                    text(a, "date"),
                    text(a, "priority"),
                ])?;
                summary.announcements += 1;
            }
        }
    }

    if let Some(items) = seed.get("studyMaterials").and_then(|v| v.as_array()) {
        if table_is_empty(&tx, "study_materials")? {
            let mut stmt = tx.prepare(
                "INSERT INTO study_materials(id, title, subject, class, type, description, fileName, fileSize, downloads, uploadDate, link)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for m in items {
                stmt.execute(params![
                    int(m, "id"),
                    text(m, "title"),
                    text(m, "subject"),
                    text(m, "class"),
                    text(m, "type"),
                    text(m, "description"),
                    text(m, "fileName"),
                    text(m, "fileSize"),
                    int(m, "downloads").unwrap_or(0),
                    text(m, "uploadDate"),
                    text(m, "link"),
                ])?;
                summary.study_materials += 1;
            }
        }
    }

    if let Some(settings) = seed.get("settings").and_then(|v| v.as_object()) {
        if table_is_empty(&tx, "settings")? {
            for (k, v) in settings {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                tx.execute("INSERT INTO settings(k, v) VALUES(?, ?)", params![k, v])?;
                summary.settings += 1;
            }
        }
    }

    tx.commit()?;
    Ok(summary)
}

fn to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Runs a query and returns each row as an object keyed by column name.
pub fn query_json<P: Params>(conn: &Connection, sql: &str, p: P) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(p, |row| {
        let mut obj = Map::new();
        for (i, name) in names.iter().enumerate() {
            obj.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        Ok(Value::Object(obj))
    })?;
    rows.collect()
}
