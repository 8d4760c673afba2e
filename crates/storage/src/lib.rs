//! Sqlite-backed persistence.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Context as _;
use booklist_core::{Author, Book, BookFilter, BookId, DomainValue, SeriesRef, Settings};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension as _, Transaction, params_from_iter};

mod list_table;

pub use list_table::{ListTable, RowFlags};

#[derive(Debug)]
pub struct Storage {
    conn: Connection,
}

/// Optional `books` columns read into [`Book`], each with the value selected
/// in its place when a database lacks it.
const BOOK_COLUMNS: [(&str, &str); 8] = [
    ("genre", "''"),
    ("publisher", "''"),
    ("location", "''"),
    ("format", "''"),
    ("language", "''"),
    ("date_published", "NULL"),
    ("read", "0"),
    ("rating", "NULL"),
];

/// A book as read for list building, with any extra projected columns.
#[derive(Debug, Clone, PartialEq)]
pub struct BookRecord {
    pub book: Book,
    pub extras: Vec<DomainValue>,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite db at {}", path.as_ref().display()))?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                bookshelf TEXT NOT NULL,
                style TEXT NOT NULL,
                top_row INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO settings (id, bookshelf, style, top_row)
            VALUES (1, '', 'Authors', 0);

            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                genre TEXT NOT NULL DEFAULT '',
                publisher TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                format TEXT NOT NULL DEFAULT '',
                date_published TEXT,
                read INTEGER NOT NULL DEFAULT 0,
                rating INTEGER,
                added_at INTEGER NOT NULL DEFAULT (unixepoch())
            );

            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY,
                family_name TEXT NOT NULL,
                given_names TEXT NOT NULL DEFAULT '',
                UNIQUE (family_name, given_names)
            );

            CREATE TABLE IF NOT EXISTS book_authors (
                book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                author_id INTEGER NOT NULL REFERENCES authors(id),
                position INTEGER NOT NULL,
                PRIMARY KEY (book_id, author_id)
            );

            CREATE TABLE IF NOT EXISTS series (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS book_series (
                book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                series_id INTEGER NOT NULL REFERENCES series(id),
                number TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (book_id, series_id)
            );

            CREATE TABLE IF NOT EXISTS bookshelves (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS book_bookshelves (
                book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                bookshelf_id INTEGER NOT NULL REFERENCES bookshelves(id) ON DELETE CASCADE,
                PRIMARY KEY (book_id, bookshelf_id)
            );

            CREATE TABLE IF NOT EXISTS styles (
                name TEXT PRIMARY KEY COLLATE NOCASE,
                definition_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS node_settings (
                style TEXT NOT NULL,
                node_key TEXT NOT NULL,
                expanded INTEGER NOT NULL,
                PRIMARY KEY (style, node_key)
            );
            "#,
        )?;

        self.add_column_if_missing(
            "ALTER TABLE books ADD COLUMN language TEXT NOT NULL DEFAULT ''",
            "add books.language column",
        )?;

        Ok(())
    }

    fn add_column_if_missing(&self, sql: &str, what: &'static str) -> anyhow::Result<()> {
        match self.conn.execute(sql, []) {
            Ok(_) => Ok(()),
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("duplicate column name") {
                    Ok(())
                } else {
                    Err(err).context(what)
                }
            }
        }
    }

    /// Whether `table` exists and has `column`.
    pub fn has_column(&self, table: &str, column: &str) -> anyhow::Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                (table, column),
                |row| row.get(0),
            )
            .with_context(|| format!("inspect schema of {table}"))?;
        Ok(count > 0)
    }

    fn table_columns(&self, table: &str) -> anyhow::Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt.query_map([table], |row| row.get::<_, String>(0))?;
        names
            .collect::<Result<_, _>>()
            .with_context(|| format!("inspect schema of {table}"))
    }

    pub fn load_settings(&self) -> anyhow::Result<Settings> {
        let row = self
            .conn
            .query_row(
                "SELECT bookshelf, style, top_row FROM settings WHERE id = 1",
                [],
                |row| {
                    let bookshelf: String = row.get(0)?;
                    let style: String = row.get(1)?;
                    let top_row: i64 = row.get(2)?;
                    Ok((bookshelf, style, top_row))
                },
            )
            .optional()?;

        let mut settings = match row {
            Some((bookshelf, style, top_row)) => Settings {
                bookshelf,
                style,
                top_row: usize::try_from(top_row).unwrap_or(0),
            },
            None => Settings::default(),
        };
        settings.normalize();
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut settings = settings.clone();
        settings.normalize();
        self.conn.execute(
            "UPDATE settings SET bookshelf = ?, style = ?, top_row = ? WHERE id = 1",
            (
                &settings.bookshelf,
                &settings.style,
                i64::try_from(settings.top_row).unwrap_or(i64::MAX),
            ),
        )?;
        Ok(())
    }

    pub fn insert_book(&self, book: &Book) -> anyhow::Result<BookId> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO books
                (title, genre, publisher, location, format, language, date_published, read, rating)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            (
                &book.title,
                &book.genre,
                &book.publisher,
                &book.location,
                &book.format,
                &book.language,
                &book.date_published,
                book.read,
                book.rating,
            ),
        )
        .with_context(|| format!("insert book {:?}", book.title))?;
        let id = BookId(tx.last_insert_rowid());
        write_book_links(&tx, id, book)?;
        tx.commit()?;
        tracing::debug!(book = %id, title = %book.title, "inserted book");
        Ok(id)
    }

    pub fn update_book(&self, book: &Book) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE books SET
                title = ?, genre = ?, publisher = ?, location = ?, format = ?, language = ?,
                date_published = ?, read = ?, rating = ?
            WHERE id = ?
            "#,
            (
                &book.title,
                &book.genre,
                &book.publisher,
                &book.location,
                &book.format,
                &book.language,
                &book.date_published,
                book.read,
                book.rating,
                book.id.0,
            ),
        )?;
        if changed == 0 {
            anyhow::bail!("book {} does not exist", book.id);
        }
        for table in ["book_authors", "book_series", "book_bookshelves"] {
            tx.execute(&format!("DELETE FROM {table} WHERE book_id = ?"), [book.id.0])?;
        }
        write_book_links(&tx, book.id, book)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_book(&self, id: BookId) -> anyhow::Result<()> {
        self.conn.execute("DELETE FROM books WHERE id = ?", [id.0])?;
        Ok(())
    }

    pub fn get_book(&self, id: BookId) -> anyhow::Result<Option<Book>> {
        let records = self.select_books(Some(id), &BookFilter::all(), &[])?;
        Ok(records.into_iter().next().map(|record| record.book))
    }

    pub fn list_bookshelves(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM bookshelves ORDER BY name COLLATE NOCASE")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Books matching `filter`, ordered by id, with `extra_columns` of the
    /// `books` table projected alongside. Column names must already be
    /// validated against the schema.
    pub fn query_books(
        &self,
        filter: &BookFilter,
        extra_columns: &[String],
    ) -> anyhow::Result<Vec<BookRecord>> {
        self.select_books(None, filter, extra_columns)
    }

    fn select_books(
        &self,
        only: Option<BookId>,
        filter: &BookFilter,
        extra_columns: &[String],
    ) -> anyhow::Result<Vec<BookRecord>> {
        let present = self.table_columns("books")?;
        let mut sql = String::from("SELECT b.id, b.title");
        for (column, fallback) in BOOK_COLUMNS {
            if present.contains(column) {
                sql.push_str(&format!(", b.{column}"));
            } else {
                sql.push_str(&format!(", {fallback}"));
            }
        }
        for column in extra_columns {
            anyhow::ensure!(is_identifier(column), "invalid column name {column:?}");
            sql.push_str(&format!(", b.\"{column}\""));
        }
        sql.push_str(" FROM books b WHERE 1 = 1");

        let mut params: Vec<Value> = Vec::new();
        if let Some(id) = only {
            params.push(Value::Integer(id.0));
            sql.push_str(&format!(" AND b.id = ?{}", params.len()));
        }
        if !filter.bookshelf.trim().is_empty() {
            params.push(Value::Text(filter.bookshelf.trim().to_string()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM book_bookshelves bb \
                 JOIN bookshelves s ON s.id = bb.bookshelf_id \
                 WHERE bb.book_id = b.id AND s.name = ?{})",
                params.len()
            ));
        }
        let criteria = &filter.criteria;
        if !criteria.author.trim().is_empty() {
            params.push(Value::Text(like_pattern(&criteria.author)));
            let n = params.len();
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM book_authors ba \
                 JOIN authors a ON a.id = ba.author_id WHERE ba.book_id = b.id \
                 AND (a.family_name || ' ' || a.given_names LIKE ?{n} \
                 OR a.given_names || ' ' || a.family_name LIKE ?{n}))"
            ));
        }
        if !criteria.title.trim().is_empty() {
            params.push(Value::Text(like_pattern(&criteria.title)));
            sql.push_str(&format!(" AND b.title LIKE ?{}", params.len()));
        }
        for word in criteria.text.split_whitespace() {
            params.push(Value::Text(like_pattern(word)));
            let n = params.len();
            let own = ["title", "genre", "publisher"]
                .iter()
                .filter(|column| present.contains(**column))
                .map(|column| format!("b.{column} LIKE ?{n}"))
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!(
                " AND ({own} \
                 OR EXISTS (SELECT 1 FROM book_authors ba JOIN authors a ON a.id = ba.author_id \
                 WHERE ba.book_id = b.id AND (a.family_name LIKE ?{n} OR a.given_names LIKE ?{n})) \
                 OR EXISTS (SELECT 1 FROM book_series bs JOIN series s ON s.id = bs.series_id \
                 WHERE bs.book_id = b.id AND s.name LIKE ?{n}))"
            ));
        }
        sql.push_str(" ORDER BY b.id");

        let mut stmt = self.conn.prepare(&sql).context("prepare book query")?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let rating: Option<i64> = row.get(9)?;
            let book = Book {
                id: BookId(row.get(0)?),
                title: row.get(1)?,
                genre: row.get(2)?,
                publisher: row.get(3)?,
                location: row.get(4)?,
                format: row.get(5)?,
                language: row.get(6)?,
                date_published: row.get(7)?,
                read: row.get(8)?,
                rating: rating.and_then(|value| u8::try_from(value).ok()),
                ..Book::default()
            };
            let mut extras = Vec::with_capacity(extra_columns.len());
            for index in 0..extra_columns.len() {
                let value: Value = row.get(10 + index)?;
                extras.push(domain_value(value));
            }
            Ok(BookRecord { book, extras })
        })?;
        let mut records = rows.collect::<Result<Vec<_>, _>>()?;

        let index_by_id: HashMap<i64, usize> = records
            .iter()
            .enumerate()
            .map(|(index, record)| (record.book.id.0, index))
            .collect();
        self.attach_links(&mut records, &index_by_id)?;
        Ok(records)
    }

    fn attach_links(
        &self,
        records: &mut [BookRecord],
        index_by_id: &HashMap<i64, usize>,
    ) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut stmt = self.conn.prepare(
            "SELECT ba.book_id, a.family_name, a.given_names FROM book_authors ba \
             JOIN authors a ON a.id = ba.author_id ORDER BY ba.book_id, ba.position",
        )?;
        let rows = stmt.query_map([], |row| {
            let book_id: i64 = row.get(0)?;
            Ok((book_id, Author::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        })?;
        for row in rows {
            let (book_id, author) = row?;
            if let Some(&index) = index_by_id.get(&book_id) {
                records[index].book.authors.push(author);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT bs.book_id, s.name, bs.number FROM book_series bs \
             JOIN series s ON s.id = bs.series_id ORDER BY bs.book_id, bs.position",
        )?;
        let rows = stmt.query_map([], |row| {
            let book_id: i64 = row.get(0)?;
            Ok((
                book_id,
                SeriesRef {
                    name: row.get(1)?,
                    number: row.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (book_id, series) = row?;
            if let Some(&index) = index_by_id.get(&book_id) {
                records[index].book.series.push(series);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT bb.book_id, s.name FROM book_bookshelves bb \
             JOIN bookshelves s ON s.id = bb.bookshelf_id \
             ORDER BY bb.book_id, s.name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| {
            let book_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok((book_id, name))
        })?;
        for row in rows {
            let (book_id, name) = row?;
            if let Some(&index) = index_by_id.get(&book_id) {
                records[index].book.bookshelves.push(name);
            }
        }

        Ok(())
    }

    pub fn save_style_json(&self, name: &str, definition_json: &str) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO styles (name, definition_json) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET definition_json = excluded.definition_json
            "#,
            (name.trim(), definition_json),
        )?;
        Ok(())
    }

    pub fn load_style_json(&self, name: &str) -> anyhow::Result<Option<String>> {
        let json = self
            .conn
            .query_row(
                "SELECT definition_json FROM styles WHERE name = ?",
                [name.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    pub fn list_style_names(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM styles ORDER BY name COLLATE NOCASE")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn load_node_settings(&self, style: &str) -> anyhow::Result<HashMap<String, bool>> {
        let mut stmt = self
            .conn
            .prepare("SELECT node_key, expanded FROM node_settings WHERE style = ?")?;
        let rows = stmt.query_map([style], |row| {
            let key: String = row.get(0)?;
            let expanded: bool = row.get(1)?;
            Ok((key, expanded))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (key, expanded) = row?;
            out.insert(key, expanded);
        }
        Ok(out)
    }

    pub fn save_node_settings(
        &self,
        style: &str,
        entries: &[(String, bool)],
    ) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO node_settings (style, node_key, expanded) VALUES (?, ?, ?)
                ON CONFLICT(style, node_key) DO UPDATE SET expanded = excluded.expanded
                "#,
            )?;
            for (key, expanded) in entries {
                stmt.execute((style, key, *expanded))?;
            }
        }
        tx.commit().context("save node settings")?;
        tracing::debug!(style, count = entries.len(), "saved node settings");
        Ok(())
    }

    pub fn clear_node_settings(&self, style: &str) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM node_settings WHERE style = ?", [style])?;
        Ok(())
    }
}

fn write_book_links(tx: &Transaction<'_>, id: BookId, book: &Book) -> anyhow::Result<()> {
    for (position, author) in book.authors.iter().enumerate() {
        tx.execute(
            "INSERT OR IGNORE INTO authors (family_name, given_names) VALUES (?, ?)",
            (author.family_name.trim(), author.given_names.trim()),
        )?;
        let author_id: i64 = tx.query_row(
            "SELECT id FROM authors WHERE family_name = ? AND given_names = ?",
            (author.family_name.trim(), author.given_names.trim()),
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO book_authors (book_id, author_id, position) VALUES (?, ?, ?)",
            (id.0, author_id, position as i64),
        )?;
    }

    for (position, series) in book.series.iter().enumerate() {
        let name = series.name.trim();
        if name.is_empty() {
            continue;
        }
        tx.execute("INSERT OR IGNORE INTO series (name) VALUES (?)", [name])?;
        let series_id: i64 =
            tx.query_row("SELECT id FROM series WHERE name = ?", [name], |row| row.get(0))?;
        tx.execute(
            "INSERT OR IGNORE INTO book_series (book_id, series_id, number, position) \
             VALUES (?, ?, ?, ?)",
            (id.0, series_id, &series.number, position as i64),
        )?;
    }

    for shelf in &book.bookshelves {
        let name = shelf.trim();
        if name.is_empty() {
            continue;
        }
        tx.execute("INSERT OR IGNORE INTO bookshelves (name) VALUES (?)", [name])?;
        let shelf_id: i64 =
            tx.query_row("SELECT id FROM bookshelves WHERE name = ?", [name], |row| row.get(0))?;
        tx.execute(
            "INSERT OR IGNORE INTO book_bookshelves (book_id, bookshelf_id) VALUES (?, ?)",
            (id.0, shelf_id),
        )?;
    }

    Ok(())
}

fn like_pattern(text: &str) -> String {
    format!("%{}%", text.trim())
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn domain_value(value: Value) -> DomainValue {
    match value {
        Value::Null => DomainValue::Null,
        Value::Integer(value) => DomainValue::Integer(value),
        Value::Real(value) => DomainValue::Real(value),
        Value::Text(value) => DomainValue::Text(value),
        Value::Blob(bytes) => DomainValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
    }
}
