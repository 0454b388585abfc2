//! SQLite branch records

use chrono::{DateTime, Utc};

use arbor_storage::Database;

use crate::branch::{Branch, BranchState};
use crate::history::{HistoryEntry, HistoryTrack};
use crate::persistence::BranchBackend;
use crate::Result;

pub struct SqliteBranchBackend {
    db: Database,
}

impl SqliteBranchBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl BranchBackend for SqliteBranchBackend {
    fn load_all(&self) -> Result<Vec<Branch>> {
        let branches = self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tab_id, parent_id, url, title, history, history_index,
                        sibling_index, created_at, last_active_at, state
                 FROM branches",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })?;

            let mut branches = Vec::new();
            for row in rows {
                let (
                    id,
                    tab_id,
                    parent_id,
                    url,
                    title,
                    history_json,
                    history_index,
                    sibling_index,
                    created_at,
                    last_active_at,
                    state,
                ) = row?;

                let entries: Vec<HistoryEntry> = match serde_json::from_str(&history_json) {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!(
                            branch_id = %id,
                            error = %e,
                            "Discarding unreadable branch history"
                        );
                        Vec::new()
                    }
                };

                branches.push(Branch {
                    tab_id,
                    parent_id,
                    url,
                    title,
                    history: HistoryTrack::restore(entries, history_index),
                    sibling_index,
                    created_at: parse_time(&created_at),
                    last_active_at: parse_time(&last_active_at),
                    state: state.parse().unwrap_or(BranchState::Awake),
                    id,
                });
            }

            Ok(branches)
        })?;

        Ok(branches)
    }

    fn put(&self, branch: &Branch) -> Result<()> {
        let history_json = serde_json::to_string(branch.history.entries())?;

        Ok(self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO branches
                 (id, tab_id, parent_id, url, title, history, history_index,
                  sibling_index, created_at, last_active_at, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    branch.id,
                    branch.tab_id,
                    branch.parent_id,
                    branch.url,
                    branch.title,
                    history_json,
                    branch.history.index(),
                    branch.sibling_index,
                    branch.created_at.to_rfc3339(),
                    branch.last_active_at.to_rfc3339(),
                    branch.state.as_str(),
                ],
            )?;
            Ok(())
        })?)
    }

    fn delete(&self, id: &str) -> Result<()> {
        Ok(self.db.with_connection(|conn| {
            conn.execute("DELETE FROM branches WHERE id = ?1", [id])?;
            Ok(())
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::ROOT_BRANCH_ID;
    use crate::history::HistoryOptions;

    #[test]
    fn test_branch_records() {
        let db = Database::open_in_memory().unwrap();
        let backend = SqliteBranchBackend::new(db);

        let root = Branch::root(Some("tab-1".to_string()));
        let mut child = Branch::new(
            Some("tab-2".to_string()),
            Some(ROOT_BRANCH_ID.to_string()),
            "https://example.com/b".to_string(),
            "B".to_string(),
        );
        child
            .history
            .record("https://example.com/a", "A", Utc::now(), HistoryOptions::default());
        child
            .history
            .record("https://example.com/b", "B", Utc::now(), HistoryOptions::default());
        child.history.navigate_to(0);
        child.state = BranchState::Sleeping;

        backend.put(&root).unwrap();
        backend.put(&child).unwrap();

        let loaded = backend.load_all().unwrap();
        assert_eq!(loaded.len(), 2);

        let restored = loaded.iter().find(|b| b.id == child.id).unwrap();
        assert_eq!(restored.parent_id.as_deref(), Some(ROOT_BRANCH_ID));
        assert_eq!(restored.history.len(), 2);
        assert_eq!(restored.history.index(), 0);
        assert_eq!(restored.state, BranchState::Sleeping);

        backend.delete(&child.id).unwrap();
        assert_eq!(backend.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_row_without_cursor() {
        let db = Database::open_in_memory().unwrap();
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO branches (id, tab_id, parent_id, url, title, history,
                                       created_at, last_active_at)
                 VALUES ('b1', 't1', 'root', 'b', '', ?1, ?2, ?2)",
                rusqlite::params![
                    r#"[{"url":"a","title":"","timestamp":"2026-01-01T00:00:00Z"},
                        {"url":"b","title":"","timestamp":"2026-01-01T00:00:01Z"}]"#,
                    "2026-01-01T00:00:00Z"
                ],
            )?;
            Ok(())
        })
        .unwrap();

        let loaded = SqliteBranchBackend::new(db).load_all().unwrap();
        assert_eq!(loaded[0].history.index(), 1);
    }
}
