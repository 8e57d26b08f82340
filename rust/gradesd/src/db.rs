use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "grades.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS PUPILS(
            PID TEXT PRIMARY KEY,
            CLASS TEXT NOT NULL,
            LASTNAME TEXT NOT NULL DEFAULT '',
            FIRSTNAME TEXT NOT NULL DEFAULT '',
            SORT_NAME TEXT NOT NULL DEFAULT '',
            LEVEL TEXT NOT NULL DEFAULT '',
            GROUPS TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    // Workspaces created before exit dates were tracked lack the column.
    ensure_pupils_exit_d(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pupils_class ON PUPILS(CLASS)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS SUBJECTS(
            SID TEXT PRIMARY KEY,
            NAME TEXT NOT NULL DEFAULT '',
            SORTING TEXT NOT NULL DEFAULT '',
            \"GROUP\" TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS COURSES(
            id TEXT PRIMARY KEY,
            CLASS TEXT NOT NULL,
            GRP TEXT NOT NULL DEFAULT '*',
            SID TEXT NOT NULL,
            TID TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_class ON COURSES(CLASS)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS GRADES_INFO(
            id TEXT PRIMARY KEY,
            OCCASION TEXT NOT NULL,
            CLASS_GROUP TEXT NOT NULL,
            INSTANCE TEXT NOT NULL DEFAULT '',
            DATE_ISSUE TEXT NOT NULL DEFAULT '',
            DATE_GRADES TEXT NOT NULL DEFAULT '',
            MODIFIED TEXT NOT NULL DEFAULT '',
            UNIQUE(OCCASION, CLASS_GROUP, INSTANCE)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS GRADES(
            id TEXT PRIMARY KEY,
            OCCASION TEXT NOT NULL,
            CLASS_GROUP TEXT NOT NULL,
            INSTANCE TEXT NOT NULL DEFAULT '',
            PID TEXT NOT NULL,
            LEVEL TEXT NOT NULL DEFAULT '',
            GRADE_MAP TEXT NOT NULL DEFAULT '',
            UNIQUE(OCCASION, CLASS_GROUP, INSTANCE, PID),
            FOREIGN KEY(OCCASION, CLASS_GROUP, INSTANCE)
                REFERENCES GRADES_INFO(OCCASION, CLASS_GROUP, INSTANCE)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_key ON GRADES(OCCASION, CLASS_GROUP, INSTANCE)",
        [],
    )?;

    Ok(())
}

fn ensure_pupils_exit_d(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "PUPILS", "EXIT_D")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE PUPILS ADD COLUMN EXIT_D TEXT NOT NULL DEFAULT ''",
        [],
    )?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_adds_exit_d() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE PUPILS(PID TEXT PRIMARY KEY, CLASS TEXT NOT NULL)",
            [],
        )
        .expect("legacy table");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "PUPILS", "EXIT_D").expect("pragma"));
    }

    #[test]
    fn grades_rows_require_info_row() {
        let conn = open_in_memory().expect("open");
        let res = conn.execute(
            "INSERT INTO GRADES(id, OCCASION, CLASS_GROUP, INSTANCE, PID) VALUES('x', 'T1', '10', '', 'p1')",
            [],
        );
        assert!(res.is_err(), "orphan grades row must be rejected");
    }
}
