use std::time::Duration;

use booklist_application::{BooklistScreen, TaskState};
use booklist_core::{BookFilter, RowKind, SearchCriteria};
use booklist_engine::BooklistCursor;
use booklist_storage::Storage;
use booklist_test::{builder, seed_library, seed_scenario};

const WAIT: Duration = Duration::from_secs(10);

fn displays(cursor: &BooklistCursor) -> Vec<(usize, RowKind, String)> {
    cursor
        .rows()
        .map(|row| (row.level(), row.kind(), row.display().to_string()))
        .collect()
}

fn open_scenario() -> anyhow::Result<(BooklistScreen, booklist_test::Scenario)> {
    let storage = Storage::open_in_memory()?;
    let scenario = seed_scenario(&storage)?;
    Ok((BooklistScreen::open(storage, "scenario")?, scenario))
}

#[test]
fn authors_and_series() -> anyhow::Result<()> {
    let (mut screen, _) = open_scenario()?;
    screen.request_build();
    assert!(screen.wait_for_list(WAIT));
    screen.expand_all(true)?;

    let cursor = screen.cursor().expect("list");
    assert_eq!(cursor.num_levels(), 2);
    assert_eq!(
        displays(cursor),
        vec![
            (1, RowKind::Header, "Asimov".to_string()),
            (2, RowKind::Header, "Foundation".to_string()),
            (3, RowKind::Book, "Foundation".to_string()),
            (1, RowKind::Header, "Clarke".to_string()),
            (2, RowKind::Book, "Childhood's End".to_string()),
            (2, RowKind::Header, "Rama".to_string()),
            (3, RowKind::Book, "Rama".to_string()),
        ]
    );
    let rama = cursor.row_at(6).expect("rama");
    assert_eq!(rama.level_1_data(), Some("Clarke"));
    assert_eq!(rama.level_2_data(), Some("Rama"));
    Ok(())
}

#[test]
fn empty_bookshelf_builds_an_empty_list() -> anyhow::Result<()> {
    let (mut screen, _) = open_scenario()?;
    screen.set_bookshelf("Nothing here");
    assert!(screen.wait_for_list(WAIT));
    let cursor = screen.cursor().expect("list");
    assert_eq!(cursor.count(), 0);
    assert_eq!(cursor.position(), None);
    assert!(screen.error().is_none());
    assert!(screen.notice().is_none());
    assert_eq!(screen.settings().top_row, 0);
    Ok(())
}

#[test]
fn deleted_mark_falls_back_to_the_previous_top() -> anyhow::Result<()> {
    let (mut screen, scenario) = open_scenario()?;
    screen.request_build();
    assert!(screen.wait_for_list(WAIT));

    screen.builder().lock().storage().delete_book(scenario.rama)?;
    screen.set_mark(Some(scenario.rama));
    screen.set_top_row(10);
    screen.request_build();
    assert!(screen.wait_for_list(WAIT));

    assert!(
        screen
            .builder()
            .lock()
            .get_book_absolute_positions(scenario.rama)
            .is_empty()
    );
    let cursor = screen.cursor().expect("list");
    assert_eq!(cursor.count(), 4);
    assert_eq!(screen.settings().top_row, 3);
    assert_eq!(cursor.position(), Some(3));
    Ok(())
}

#[test]
fn edited_books_stay_in_view() -> anyhow::Result<()> {
    let (mut screen, scenario) = open_scenario()?;
    screen.request_build();
    assert!(screen.wait_for_list(WAIT));

    {
        let builder = screen.builder().lock();
        let mut rama = builder
            .storage()
            .get_book(scenario.rama)?
            .ok_or_else(|| anyhow::anyhow!("rama missing"))?;
        rama.series.clear();
        builder.storage().update_book(&rama)?;
    }
    screen.book_edited(scenario.rama);
    assert!(screen.wait_for_list(WAIT));

    let cursor = screen.cursor().expect("list");
    let row = cursor.row_view().expect("current row");
    assert_eq!(row.book_id(), Some(scenario.rama));
    assert_eq!(row.level(), 2);
    assert_eq!(screen.coordinator().state(), TaskState::Finished);
    Ok(())
}

#[test]
fn searches_narrow_the_list() -> anyhow::Result<()> {
    let (mut screen, _) = open_scenario()?;
    screen.set_search(SearchCriteria {
        author: "clarke".to_string(),
        ..SearchCriteria::default()
    });
    assert!(screen.wait_for_list(WAIT));
    let cursor = screen.cursor().expect("list");
    assert_eq!(cursor.row_at(0).map(|row| row.display()), Some("Clarke"));
    assert!(cursor.rows().all(|row| row.display() != "Asimov"));

    screen.set_search(SearchCriteria {
        text: "foundation asimov".to_string(),
        ..SearchCriteria::default()
    });
    assert!(screen.wait_for_list(WAIT));
    let cursor = screen.cursor().expect("list");
    assert_eq!(cursor.row_at(0).map(|row| row.display()), Some("Asimov"));
    assert_eq!(cursor.count(), 2);
    Ok(())
}

#[test]
fn switching_styles_regroups() -> anyhow::Result<()> {
    let (mut screen, _) = open_scenario()?;
    screen.set_style("series");
    assert!(screen.wait_for_list(WAIT));
    let cursor = screen.cursor().expect("list");
    assert_eq!(cursor.num_levels(), 1);
    let headers: Vec<String> = cursor
        .rows()
        .filter(|row| row.kind() == RowKind::Header)
        .map(|row| row.display().to_string())
        .collect();
    assert_eq!(headers, vec!["Foundation", "Rama"]);
    Ok(())
}

#[test]
fn two_lists_share_one_database() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("books.db");
    seed_library(&Storage::open(&path)?, 30)?;

    let mut authors = builder(Storage::open(&path)?, "authors", "Authors")?;
    let mut genres = builder(Storage::open(&path)?, "genres", "Genre")?;
    authors.build(None, BookFilter::all())?;
    genres.build(None, BookFilter::all())?;
    let rows = authors.rows().to_vec();

    genres.expand_all(true)?;
    genres.rebuild()?;
    authors.rebuild()?;
    assert_eq!(authors.rows(), &rows[..]);
    assert_eq!(genres.visible_count(), genres.row_count());
    Ok(())
}
