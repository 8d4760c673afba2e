use booklist_core::{Author, Book, BookId, SeriesRef, Style};
use booklist_storage::Storage;

pub(crate) fn book(title: &str, family: &str, series: Option<&str>) -> Book {
    Book {
        authors: vec![Author::new(family, "")],
        series: series
            .map(|name| vec![SeriesRef::new(name, None)])
            .unwrap_or_default(),
        ..Book::new(title)
    }
}

/// Inserts Childhood's End (1), Rama (2) and Foundation (3).
pub(crate) fn seed(storage: &Storage) -> anyhow::Result<Vec<BookId>> {
    let mut ids = Vec::new();
    ids.push(storage.insert_book(&book("Childhood's End", "Clarke", None))?);
    ids.push(storage.insert_book(&book("Rama", "Clarke", Some("Rama")))?);
    let mut foundation = book("Foundation", "Asimov", Some("Foundation"));
    foundation.bookshelves = vec!["Favourites".to_string()];
    ids.push(storage.insert_book(&foundation)?);
    Ok(ids)
}

pub(crate) fn authors() -> Style {
    Style::builtin_named("Authors").expect("builtin style")
}
