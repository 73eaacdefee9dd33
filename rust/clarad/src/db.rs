use anyhow::Context;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

const DB_FILE: &str = "clara.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

/// Open the workspace roster store, creating the directory and schema as
/// needed. Rows themselves are written by the MyClara backend.
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let conn = Connection::open(db_path(workspace))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            user_type TEXT NOT NULL,
            enrollment_code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            enrollment_code TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_enrollment_code ON classes(enrollment_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS modules(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            creator_user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_modules_creator ON modules(creator_user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_modules(
            class_id INTEGER NOT NULL,
            module_id INTEGER NOT NULL,
            PRIMARY KEY(class_id, module_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(module_id) REFERENCES modules(id)
        )",
        [],
    )?;

    Ok(conn)
}

/// Read-only handle used by the roster sources; one per fetch.
pub fn open_read_only(path: &Path) -> anyhow::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {}", path.to_string_lossy()))
}
