//! Per-builder tables holding one generation of a flattened book list.

use anyhow::Context as _;
use booklist_core::{BookId, FlatRow};

use crate::{Storage, is_identifier};

const TABLE_PREFIX: &str = "booklist_rows_";

/// Name of the flat-row table owned by one list builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTable {
    name: String,
}

impl ListTable {
    pub fn for_namespace(namespace: &str) -> anyhow::Result<Self> {
        let valid = !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        anyhow::ensure!(valid, "invalid list namespace {namespace:?}");
        let name = format!("{TABLE_PREFIX}{namespace}");
        debug_assert!(is_identifier(&name));
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFlags {
    pub absolute_position: usize,
    pub expanded: bool,
    pub visible: bool,
}

impl Storage {
    /// Drops and recreates `table` holding `rows`, in one transaction.
    pub fn create_list_table(
        &self,
        table: &ListTable,
        rows: &[FlatRow],
        flags: &[RowFlags],
    ) -> anyhow::Result<()> {
        let name = table.name();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            r#"
            DROP TABLE IF EXISTS {name};
            CREATE TABLE {name} (
                absolute_position INTEGER PRIMARY KEY,
                level INTEGER NOT NULL,
                kind TEXT NOT NULL,
                node_key TEXT NOT NULL,
                parent_key TEXT,
                book_id INTEGER,
                expanded INTEGER NOT NULL DEFAULT 0,
                visible INTEGER NOT NULL DEFAULT 0,
                display TEXT NOT NULL,
                level_1_data TEXT,
                level_2_data TEXT,
                extras_json TEXT
            );
            CREATE INDEX {name}_book_id ON {name} (book_id);
            "#
        ))
        .with_context(|| format!("create list table {name}"))?;
        insert_rows(&tx, name, rows, flags)?;
        tx.commit()
            .with_context(|| format!("commit list table {name}"))?;
        Ok(())
    }

    /// Replaces the contents of an existing `table` without touching its schema.
    pub fn replace_list_rows(
        &self,
        table: &ListTable,
        rows: &[FlatRow],
        flags: &[RowFlags],
    ) -> anyhow::Result<()> {
        let name = table.name();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(&format!("DELETE FROM {name}"), [])
            .with_context(|| format!("clear list table {name}"))?;
        insert_rows(&tx, name, rows, flags)?;
        tx.commit()
            .with_context(|| format!("commit list table {name}"))?;
        Ok(())
    }

    pub fn update_list_flags(&self, table: &ListTable, flags: &[RowFlags]) -> anyhow::Result<()> {
        if flags.is_empty() {
            return Ok(());
        }
        let name = table.name();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {name} SET expanded = ?, visible = ? WHERE absolute_position = ?"
            ))?;
            for flag in flags {
                stmt.execute((flag.expanded, flag.visible, flag.absolute_position as i64))?;
            }
        }
        tx.commit()
            .with_context(|| format!("update flags in {name}"))?;
        Ok(())
    }

    pub fn list_book_positions(
        &self,
        table: &ListTable,
        book: BookId,
    ) -> anyhow::Result<Vec<usize>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT absolute_position FROM {} WHERE book_id = ? ORDER BY absolute_position",
            table.name()
        ))?;
        let rows = stmt.query_map([book.0], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(usize::try_from(row?).context("negative absolute position")?);
        }
        Ok(out)
    }

    pub fn list_visible_count(&self, table: &ListTable) -> anyhow::Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE visible = 1", table.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn drop_list_table(&self, table: &ListTable) -> anyhow::Result<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", table.name()), [])?;
        Ok(())
    }
}

fn insert_rows(
    tx: &rusqlite::Transaction<'_>,
    name: &str,
    rows: &[FlatRow],
    flags: &[RowFlags],
) -> anyhow::Result<()> {
    anyhow::ensure!(
        rows.len() == flags.len(),
        "row/flag length mismatch: {} rows, {} flags",
        rows.len(),
        flags.len()
    );
    let mut stmt = tx.prepare(&format!(
        r#"
        INSERT INTO {name} (
            absolute_position, level, kind, node_key, parent_key, book_id,
            expanded, visible, display, level_1_data, level_2_data, extras_json
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    ))?;
    for (row, flag) in rows.iter().zip(flags) {
        let extras_json = if row.extras.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&row.extras)?)
        };
        stmt.execute((
            row.absolute_position as i64,
            row.level as i64,
            row.kind.as_str(),
            &row.node_key,
            &row.parent_key,
            row.book_id.map(|id| id.0),
            flag.expanded,
            flag.visible,
            &row.display,
            row.level_text(1),
            row.level_text(2),
            extras_json,
        ))
        .with_context(|| format!("insert row {} into {name}", row.absolute_position))?;
    }
    Ok(())
}
