//! Database migrations
//!
//! Every step is additive: later versions create their own tables and never
//! touch the record kinds an earlier version introduced.

use crate::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 2;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<i32, _> =
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        });

    match result {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(rusqlite::Error::SqliteFailure(_, _)) => {
            // Table doesn't exist yet
            conn.execute(
                "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                [],
            )?;
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("Running migration v1: settings");

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    )?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    tracing::info!("Running migration v2: branches");

    // No foreign key on parent_id: writes land out of band and a child may be
    // persisted before its parent.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS branches (
            id TEXT PRIMARY KEY,
            tab_id TEXT,
            parent_id TEXT,
            url TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            history TEXT NOT NULL DEFAULT '[]',
            history_index INTEGER,
            sibling_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_active_at TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'awake'
        );

        CREATE INDEX IF NOT EXISTS idx_branches_parent ON branches(parent_id);
        CREATE INDEX IF NOT EXISTS idx_branches_tab ON branches(tab_id);
    "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_version(conn: &Connection) -> i32 {
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn), SCHEMA_VERSION);

        // Re-running is a no-op
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_branches_table_leaves_existing_settings_alone() {
        let conn = Connection::open_in_memory().unwrap();
        get_schema_version(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES ('theme', 'dark', 'now')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let theme: String = conn
            .query_row("SELECT value FROM settings WHERE key = 'theme'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(theme, "dark");

        let branches: i32 = conn
            .query_row("SELECT COUNT(*) FROM branches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(branches, 0);
        assert_eq!(schema_version(&conn), 2);
    }
}
