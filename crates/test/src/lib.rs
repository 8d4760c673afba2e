//! Test helpers and fixtures.

use booklist_core::{Author, Book, BookId, SeriesRef, Settings, Style};
use booklist_engine::BooklistBuilder;
use booklist_storage::Storage;

const FAMILIES: [&str; 8] = [
    "Asimov", "Bradbury", "Clarke", "Delany", "Egan", "Le Guin", "Herbert", "Tiptree",
];
const SERIES: [&str; 5] = ["Foundation", "Rama", "Dune", "Earthsea", "Hainish"];
const GENRES: [&str; 3] = ["Science Fiction", "Fantasy", ""];

pub fn make_settings(bookshelf: &str, style: &str) -> Settings {
    Settings {
        bookshelf: bookshelf.to_string(),
        style: style.to_string(),
        top_row: 0,
    }
}

pub fn book(title: &str, family: &str, series: Option<&str>) -> Book {
    Book {
        authors: vec![Author::new(family, "")],
        series: series
            .map(|name| vec![SeriesRef::new(name, None)])
            .unwrap_or_default(),
        ..Book::new(title)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub childhood: BookId,
    pub rama: BookId,
    pub foundation: BookId,
}

/// Clarke's "Childhood's End" (no series) and "Rama" (series Rama), Asimov's
/// "Foundation" (series Foundation).
pub fn seed_scenario(storage: &Storage) -> anyhow::Result<Scenario> {
    Ok(Scenario {
        childhood: storage.insert_book(&book("Childhood's End", "Clarke", None))?,
        rama: storage.insert_book(&book("Rama", "Clarke", Some("Rama")))?,
        foundation: storage.insert_book(&book("Foundation", "Asimov", Some("Foundation")))?,
    })
}

/// `count` books with a deterministic spread of zero to two authors, zero to
/// two series, genres, shelves, years and read flags.
pub fn library(count: usize) -> Vec<Book> {
    (0..count)
        .map(|i| {
            let mut authors = Vec::new();
            if i % 11 != 0 {
                authors.push(Author::new(FAMILIES[i % FAMILIES.len()], "A."));
            }
            if i % 4 == 1 {
                authors.push(Author::new(FAMILIES[(i + 3) % FAMILIES.len()], "B."));
            }
            let mut series = Vec::new();
            if i % 3 != 0 {
                let number = (i / 3).to_string();
                series.push(SeriesRef::new(SERIES[i % SERIES.len()], Some(&number)));
            }
            if i % 7 == 2 {
                series.push(SeriesRef::new(SERIES[(i + 2) % SERIES.len()], None));
            }
            let mut bookshelves = vec!["All".to_string()];
            if i % 2 == 0 {
                bookshelves.push("Even".to_string());
            }
            Book {
                authors,
                series,
                bookshelves,
                genre: GENRES[i % GENRES.len()].to_string(),
                date_published: (i % 5 != 0).then(|| format!("{}-01-01", 1950 + i % 40)),
                read: i % 2 == 1,
                rating: Some((i % 6) as u8),
                ..Book::new(format!("Title {i:03}"))
            }
        })
        .collect()
}

pub fn seed_library(storage: &Storage, count: usize) -> anyhow::Result<Vec<BookId>> {
    library(count)
        .iter()
        .map(|book| storage.insert_book(book))
        .collect()
}

/// Book rows expected for `book` under [Author, Series]: one per author and
/// series pair, a level without values ending the path.
pub fn expected_author_series_rows(book: &Book) -> usize {
    match (book.authors.len(), book.series.len()) {
        (0, _) => 1,
        (authors, 0) => authors,
        (authors, series) => authors * series,
    }
}

pub fn builder(storage: Storage, namespace: &str, style: &str) -> anyhow::Result<BooklistBuilder> {
    let style = Style::builtin_named(style)
        .ok_or_else(|| anyhow::anyhow!("no built-in style {style:?}"))?;
    Ok(BooklistBuilder::new(storage, namespace, style)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_settings() {
        let settings = make_settings("Favourites", "Series");
        assert_eq!(settings.style, "Series");
    }

    #[test]
    fn library_is_deterministic() {
        assert_eq!(library(40), library(40));
        assert!(library(40).iter().any(|book| book.authors.is_empty()));
        assert!(library(40).iter().any(|book| book.authors.len() == 2 && book.series.len() == 2));
    }
}
