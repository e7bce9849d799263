//! Per-table pull cursors.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult, Table};

impl Database {
    /// Opaque cursor the next pull of `table` resumes from; `None` pulls from the start.
    pub fn sync_cursor(&self, table: Table) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT cursor FROM sync_cursor WHERE table_name = ?",
                [table.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set_sync_cursor(&self, table: Table, cursor: &str) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO sync_cursor (table_name, cursor, updated_at)
            VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ON CONFLICT(table_name) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
            params![table.as_str(), cursor],
        )?;
        Ok(())
    }

    /// Forget the cursor so the next pull starts over.
    pub fn reset_sync_cursor(&self, table: Table) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM sync_cursor WHERE table_name = ?", [table.as_str()])?;
        Ok(())
    }
}
