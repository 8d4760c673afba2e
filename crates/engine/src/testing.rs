use booklist_core::{Author, Book, BookId, SeriesRef, Style};
use booklist_storage::Storage;

use crate::BooklistBuilder;

pub(crate) struct Scenario {
    pub childhood: BookId,
    pub rama: BookId,
    pub foundation: BookId,
}

pub(crate) fn book(title: &str, family: &str, series: Option<&str>) -> Book {
    Book {
        authors: vec![Author::new(family, "")],
        series: series
            .map(|name| vec![SeriesRef::new(name, None)])
            .unwrap_or_default(),
        ..Book::new(title)
    }
}

/// Clarke's "Childhood's End" and "Rama" (series Rama), Asimov's "Foundation"
/// (series Foundation).
pub(crate) fn seed(storage: &Storage) -> anyhow::Result<Scenario> {
    Ok(Scenario {
        childhood: storage.insert_book(&book("Childhood's End", "Clarke", None))?,
        rama: storage.insert_book(&book("Rama", "Clarke", Some("Rama")))?,
        foundation: storage.insert_book(&book("Foundation", "Asimov", Some("Foundation")))?,
    })
}

pub(crate) fn authors() -> Style {
    Style::builtin_named("Authors").expect("builtin style")
}

pub(crate) fn scenario_builder() -> anyhow::Result<(BooklistBuilder, Scenario)> {
    let storage = Storage::open_in_memory()?;
    let scenario = seed(&storage)?;
    let builder = BooklistBuilder::new(storage, "test", authors())?;
    Ok((builder, scenario))
}
