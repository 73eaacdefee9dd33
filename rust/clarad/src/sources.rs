use crate::db;
use crate::roster::ModuleSource;
use anyhow::Context;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Modules created by one user, newest first.
pub struct OwnedModules {
    db_path: PathBuf,
    creator_user_id: i64,
}

impl OwnedModules {
    pub fn new(db_path: PathBuf, creator_user_id: i64) -> Self {
        OwnedModules {
            db_path,
            creator_user_id,
        }
    }
}

impl ModuleSource for OwnedModules {
    fn name(&self) -> &str {
        "owned"
    }

    fn fetch(&self) -> anyhow::Result<Value> {
        let conn = db::open_read_only(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, creator_user_id, created_at
             FROM modules
             WHERE creator_user_id = ?
             ORDER BY created_at DESC, id DESC",
        )?;
        let modules = stmt
            .query_map([self.creator_user_id], |row| {
                let id: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                let creator: i64 = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok(json!({
                    "ModuleID": id,
                    "ModuleName": name,
                    "CreatorUserID": creator,
                    "CreatedAt": created_at
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .context("owned modules query failed")?;

        Ok(json!({
            "success": true,
            "count": modules.len(),
            "modules": modules
        }))
    }
}

/// Modules a teacher attached to the class the student enrolled in.
pub struct ImportedModules {
    db_path: PathBuf,
    student_id: i64,
}

impl ImportedModules {
    pub fn new(db_path: PathBuf, student_id: i64) -> Self {
        ImportedModules {
            db_path,
            student_id,
        }
    }
}

fn no_modules(message: &str) -> Value {
    json!({ "success": true, "modules": [], "message": message })
}

impl ModuleSource for ImportedModules {
    fn name(&self) -> &str {
        "imported"
    }

    fn fetch(&self) -> anyhow::Result<Value> {
        let conn = db::open_read_only(&self.db_path)?;

        let code: Option<Option<String>> = conn
            .query_row(
                "SELECT enrollment_code FROM users WHERE id = ? AND user_type = 'Student'",
                [self.student_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(code) = code.flatten().filter(|c| !c.is_empty()) else {
            return Ok(no_modules("No enrollment code found for this student"));
        };

        let class_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM classes WHERE enrollment_code = ? ORDER BY id LIMIT 1",
                [&code],
                |r| r.get(0),
            )
            .optional()?;
        let Some(class_id) = class_id else {
            return Ok(no_modules("No class found with this enrollment code"));
        };

        let mut stmt = conn.prepare(
            "SELECT m.id, m.name, COALESCE(m.description, '')
             FROM modules m
             WHERE m.id IN (SELECT DISTINCT module_id FROM class_modules WHERE class_id = ?)
             ORDER BY m.id",
        )?;
        let modules = stmt
            .query_map([class_id], |row| {
                let id: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                let description: String = row.get(2)?;
                Ok(json!({
                    "moduleId": id,
                    "name": name,
                    "description": description
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .context("imported modules query failed")?;

        if modules.is_empty() {
            return Ok(no_modules("No modules found for this class"));
        }
        Ok(json!({
            "success": true,
            "count": modules.len(),
            "modules": modules,
            "classId": class_id,
            "enrollmentCode": code
        }))
    }
}
