use std::collections::HashSet;

use booklist_core::{Author, BookFilter, RowKind};
use booklist_engine::{BooklistBuilder, BuilderHandle};
use booklist_storage::{ListTable, Storage};
use booklist_test::{builder, expected_author_series_rows, library, seed_library};

const BOOKS: usize = 60;

fn library_builder(namespace: &str, style: &str) -> anyhow::Result<BooklistBuilder> {
    let storage = Storage::open_in_memory()?;
    seed_library(&storage, BOOKS)?;
    builder(storage, namespace, style)
}

fn visible_absolutes(handle: &BuilderHandle) -> Vec<usize> {
    handle
        .get_list()
        .rows()
        .map(|row| row.absolute_position())
        .collect()
}

#[test]
fn every_book_appears_once_per_group_path() -> anyhow::Result<()> {
    let mut builder = library_builder("props", "Authors")?;
    let summary = builder.build(None, BookFilter::all())?;
    assert_eq!(summary.books, BOOKS);

    let books = library(BOOKS);
    let mut book_rows = 0;
    for (i, book) in books.iter().enumerate() {
        let id = booklist_core::BookId(i as i64 + 1);
        let positions = builder.get_book_absolute_positions(id);
        assert_eq!(positions.len(), expected_author_series_rows(book), "{}", book.title);
        for position in positions {
            assert_eq!(builder.rows()[position].book_id, Some(id));
        }
        book_rows += expected_author_series_rows(book);
    }
    let counted = builder
        .rows()
        .iter()
        .filter(|row| row.kind == RowKind::Book)
        .count();
    assert_eq!(counted, book_rows);
    Ok(())
}

#[test]
fn shelf_filters_limit_the_books() -> anyhow::Result<()> {
    let mut builder = library_builder("props", "Authors")?;
    builder.build(None, BookFilter::bookshelf("Even"))?;
    for i in 0..BOOKS {
        let id = booklist_core::BookId(i as i64 + 1);
        let found = !builder.get_book_absolute_positions(id).is_empty();
        assert_eq!(found, i % 2 == 0, "book {id}");
    }
    Ok(())
}

#[test]
fn headers_enclose_their_subtrees() -> anyhow::Result<()> {
    for style in ["Authors", "Genre", "Bookshelves", "Year published", "Title letter"] {
        let mut builder = library_builder("props", style)?;
        builder.build(None, BookFilter::all())?;
        let rows = builder.rows();
        let mut keys = HashSet::new();
        for (position, row) in rows.iter().enumerate() {
            assert_eq!(row.absolute_position, position);
            if row.is_header() {
                assert!(keys.insert(row.node_key.clone()), "{style}: duplicate {}", row.node_key);
                assert!(row.subtree_end >= position);
            } else {
                assert_eq!(row.subtree_end, position);
            }
            if let Some(parent) = row.parent {
                assert!(parent < position);
                assert!(rows[parent].is_header());
                assert!(rows[parent].subtree_end >= position);
                assert_eq!(row.level, rows[parent].level + 1);
            } else {
                assert_eq!(row.level, 1);
            }
        }
    }
    Ok(())
}

#[test]
fn builds_are_deterministic() -> anyhow::Result<()> {
    let mut first = library_builder("props", "Authors")?;
    let mut second = library_builder("props", "Authors")?;
    first.build(None, BookFilter::all())?;
    second.build(None, BookFilter::all())?;
    assert_eq!(first.rows(), second.rows());

    let rows = first.rows().to_vec();
    first.build(None, BookFilter::all())?;
    assert_eq!(first.rows(), &rows[..]);
    Ok(())
}

#[test]
fn toggling_twice_is_a_no_op() -> anyhow::Result<()> {
    let handle = BuilderHandle::new(library_builder("props", "Authors")?);
    handle.lock().build(None, BookFilter::all())?;
    let before = visible_absolutes(&handle);

    let headers: Vec<usize> = handle
        .lock()
        .rows()
        .iter()
        .filter(|row| row.is_header())
        .map(|row| row.absolute_position)
        .collect();
    for absolute in headers {
        let mut builder = handle.lock();
        assert!(builder.toggle_expand_node(absolute)?);
        assert!(builder.toggle_expand_node(absolute)?);
        drop(builder);
        assert_eq!(visible_absolutes(&handle), before, "header {absolute}");
    }
    Ok(())
}

fn first_header(builder: &BooklistBuilder, level: usize) -> anyhow::Result<usize> {
    builder
        .rows()
        .iter()
        .position(|row| row.is_header() && row.level == level)
        .ok_or_else(|| anyhow::anyhow!("no level {level} header"))
}

#[test]
fn visible_positions_map_back() -> anyhow::Result<()> {
    let handle = BuilderHandle::new(library_builder("props", "Authors")?);
    {
        let mut builder = handle.lock();
        builder.build(None, BookFilter::all())?;
        let header = first_header(&builder, 2)?;
        builder.ensure_absolute_position_visible(header)?;
        assert!(builder.toggle_expand_node(header)?);
    }
    let cursor = handle.get_list();
    let builder = handle.lock();
    for (position, row) in cursor.rows().enumerate() {
        assert_eq!(builder.get_position(row.absolute_position()), Some(position));
    }
    Ok(())
}

#[test]
fn visibility_follows_expanded_ancestors() -> anyhow::Result<()> {
    let handle = BuilderHandle::new(library_builder("props", "Authors")?);
    {
        let mut builder = handle.lock();
        builder.build(None, BookFilter::all())?;
        let header = first_header(&builder, 1)?;
        assert!(builder.toggle_expand_node(header)?);
        let header = first_header(&builder, 2)?;
        builder.toggle_expand_node(header)?;
    }

    let cursor = handle.get_list();
    let visible: HashSet<usize> = cursor.rows().map(|row| row.absolute_position()).collect();
    let expanded: HashSet<usize> = cursor
        .rows()
        .filter(|row| row.is_expanded())
        .map(|row| row.absolute_position())
        .collect();

    let builder = handle.lock();
    for row in builder.rows() {
        let expected = match row.parent {
            None => true,
            Some(parent) => visible.contains(&parent) && expanded.contains(&parent),
        };
        assert_eq!(
            visible.contains(&row.absolute_position),
            expected,
            "row {}",
            row.absolute_position
        );
    }
    Ok(())
}

#[test]
fn expand_and_collapse_all() -> anyhow::Result<()> {
    let mut builder = library_builder("props", "Authors")?;
    builder.build(None, BookFilter::all())?;

    builder.expand_all(true)?;
    assert_eq!(builder.visible_count(), builder.row_count());

    builder.expand_all(false)?;
    let top_level = builder.rows().iter().filter(|row| row.level == 1).count();
    assert_eq!(builder.visible_count(), top_level);
    let top_headers = builder
        .rows()
        .iter()
        .filter(|row| row.level == 1 && row.is_header())
        .count();
    let bare_books = builder
        .rows()
        .iter()
        .filter(|row| row.level == 1 && !row.is_header())
        .count();
    assert_eq!(top_level, top_headers + bare_books);
    Ok(())
}

#[test]
fn persisted_flags_match_the_index() -> anyhow::Result<()> {
    let mut builder = library_builder("props", "Authors")?;
    let table = ListTable::for_namespace("props")?;
    builder.build(None, BookFilter::all())?;
    assert_eq!(builder.storage().list_visible_count(&table)?, builder.visible_count());
    let header = first_header(&builder, 1)?;
    builder.toggle_expand_node(header)?;
    builder.expand_all(true)?;
    let header = first_header(&builder, 2)?;
    builder.toggle_expand_node(header)?;
    assert_eq!(builder.storage().list_visible_count(&table)?, builder.visible_count());
    builder.rebuild()?;
    assert_eq!(builder.storage().list_visible_count(&table)?, builder.visible_count());
    Ok(())
}

#[test]
fn edited_books_can_be_found_after_rebuild() -> anyhow::Result<()> {
    let mut builder = library_builder("props", "Authors")?;
    builder.build(None, BookFilter::all())?;

    for i in [1usize, 12, 37] {
        let id = booklist_core::BookId(i as i64 + 1);
        let mut book = builder
            .storage()
            .get_book(id)?
            .ok_or_else(|| anyhow::anyhow!("book {id} missing"))?;
        book.authors = vec![Author::new("Zelazny", "Roger")];
        builder.storage().update_book(&book)?;
        builder.rebuild()?;

        let positions = builder.get_book_absolute_positions(id);
        assert!(!positions.is_empty());
        for absolute in positions {
            builder.ensure_absolute_position_visible(absolute)?;
            assert!(builder.get_position(absolute).is_some());
            assert_eq!(builder.rows()[absolute].level_text(1), Some("Zelazny, Roger"));
        }
    }
    Ok(())
}

#[test]
fn empty_labels_collect_books_without_values() -> anyhow::Result<()> {
    let mut builder = library_builder("props", "Year published")?;
    builder.build(None, BookFilter::all())?;
    let rows = builder.rows();
    let unknown = rows
        .iter()
        .position(|row| row.is_header() && row.level == 1 && row.display == "Unknown year")
        .ok_or_else(|| anyhow::anyhow!("no unknown year group"))?;

    let undated: HashSet<_> = rows
        .iter()
        .filter(|row| row.kind == RowKind::Book)
        .filter(|row| row.level_text(1) == Some("Unknown year"))
        .filter_map(|row| row.book_id)
        .collect();
    let expected: HashSet<_> = (0..BOOKS)
        .filter(|i| i % 5 == 0)
        .map(|i| booklist_core::BookId(i as i64 + 1))
        .collect();
    assert_eq!(undated, expected);
    assert!(rows[unknown].subtree_end > unknown);
    Ok(())
}
