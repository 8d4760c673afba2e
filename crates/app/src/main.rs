use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, bail};
use booklist_application::BooklistScreen;
use booklist_core::{Author, Book, BookId, RowKind, SearchCriteria, SeriesRef};
use booklist_engine::BooklistCursor;
use booklist_engine::style::{parse_style, save_style, style_names};
use booklist_storage::Storage;
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const SCREEN_NAMESPACE: &str = "cli";
const BUILD_TIMEOUT: Duration = Duration::from_secs(60);
const INDENT: usize = 2;

#[derive(Parser)]
#[command(name = "booklist", version, about = "Grouped, collapsible book lists")]
struct Cli {
    /// Database file. Defaults to booklist.db in the config directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Truncate rows to this many columns.
    #[arg(long, global = true, default_value = "80")]
    width: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the book list for the saved shelf and style.
    List(ListArgs),

    /// Flip the group at a visible position and print the list again.
    Toggle {
        position: usize,
    },

    /// Add a book.
    Add(AddArgs),

    /// Remove a book.
    Delete {
        id: i64,
    },

    /// List built-in and stored styles.
    Styles,

    /// Store a style from a JSON definition.
    ImportStyle {
        file: PathBuf,
    },

    /// List bookshelves.
    Shelves,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    style: Option<String>,

    /// Bookshelf to show. An empty name shows every shelf.
    #[arg(long)]
    shelf: Option<String>,

    #[arg(long, default_value = "")]
    author: String,

    #[arg(long, default_value = "")]
    title: String,

    /// Words that must all appear in the title, genre, publisher, author or series.
    #[arg(long, default_value = "")]
    search: String,

    /// Book to keep in view.
    #[arg(long)]
    mark: Option<i64>,

    #[arg(long, conflicts_with = "collapse_all")]
    expand_all: bool,

    #[arg(long)]
    collapse_all: bool,
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    title: String,

    /// "Family, Given". Repeat for several authors.
    #[arg(long = "author")]
    authors: Vec<String>,

    /// "Name" or "Name#Number".
    #[arg(long)]
    series: Vec<String>,

    #[arg(long = "shelf")]
    bookshelves: Vec<String>,

    #[arg(long, default_value = "")]
    genre: String,

    #[arg(long, default_value = "")]
    publisher: String,

    #[arg(long, default_value = "")]
    language: String,

    /// Publication date, "YYYY" or "YYYY-MM-DD".
    #[arg(long)]
    published: Option<String>,

    #[arg(long)]
    rating: Option<u8>,

    #[arg(long)]
    read: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    let storage = Storage::open(&db_path)?;
    tracing::debug!(db = %db_path.display(), "opened database");

    match cli.command {
        Commands::List(args) => list(storage, args, cli.width),
        Commands::Toggle { position } => toggle(storage, position, cli.width),
        Commands::Add(args) => {
            let id = storage.insert_book(&book_from_args(args)?)?;
            println!("added book {id}");
            Ok(())
        }
        Commands::Delete { id } => {
            let id = BookId(id);
            if storage.get_book(id)?.is_none() {
                bail!("no book with id {id}");
            }
            storage.delete_book(id)?;
            println!("deleted book {id}");
            Ok(())
        }
        Commands::Styles => {
            for name in style_names(&storage)? {
                println!("{name}");
            }
            Ok(())
        }
        Commands::ImportStyle { file } => import_style(&storage, &file),
        Commands::Shelves => {
            for name in storage.list_bookshelves()? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("dev", "booklist", "booklist").context("resolve project dirs")?;
    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir)
        .with_context(|| format!("create config dir {}", config_dir.display()))?;
    Ok(config_dir.join("booklist.db"))
}

fn list(storage: Storage, args: ListArgs, width: usize) -> anyhow::Result<()> {
    let mut screen = BooklistScreen::open(storage, SCREEN_NAMESPACE)?;
    screen.set_mark(args.mark.map(BookId));
    let mut submitted = false;
    if let Some(style) = args.style.as_deref() {
        screen.set_style(style);
        submitted = true;
    }
    if let Some(shelf) = args.shelf.as_deref() {
        screen.set_bookshelf(shelf);
        submitted = true;
    }
    let criteria = SearchCriteria {
        author: args.author,
        title: args.title,
        text: args.search,
    };
    if !criteria.is_empty() {
        screen.set_search(criteria);
        submitted = true;
    }
    if !submitted {
        screen.request_build();
    }
    show(&mut screen)?;

    if args.expand_all || args.collapse_all {
        screen.expand_all(args.expand_all)?;
    }
    print_list(&screen, width)?;
    screen.pause()?;
    screen.destroy()?;
    Ok(())
}

fn toggle(storage: Storage, position: usize, width: usize) -> anyhow::Result<()> {
    let mut screen = BooklistScreen::open(storage, SCREEN_NAMESPACE)?;
    screen.request_build();
    show(&mut screen)?;
    if !screen.toggle_visible(position)? {
        println!("row {position} is not a group");
    }
    print_list(&screen, width)?;
    screen.pause()?;
    screen.destroy()?;
    Ok(())
}

/// Waits for the newest requested build and displays it.
fn show(screen: &mut BooklistScreen) -> anyhow::Result<()> {
    if !screen.wait_for_list(BUILD_TIMEOUT) {
        bail!("timed out building the book list");
    }
    if let Some(error) = screen.error() {
        bail!("book list unavailable: {error}");
    }
    if let Some(notice) = screen.notice() {
        eprintln!("{notice}");
    }
    Ok(())
}

fn print_list(screen: &BooklistScreen, width: usize) -> anyhow::Result<()> {
    let Some(cursor) = screen.cursor() else {
        return Ok(());
    };
    let settings = screen.settings();
    println!(
        "{} | {} | {} rows",
        settings.style,
        if settings.bookshelf.is_empty() {
            "All books"
        } else {
            settings.bookshelf.as_str()
        },
        cursor.count()
    );
    for line in render_rows(cursor, width) {
        println!("{line}");
    }
    Ok(())
}

fn render_rows(cursor: &BooklistCursor, width: usize) -> Vec<String> {
    let current = cursor.position();
    cursor
        .rows()
        .enumerate()
        .map(|(position, row)| {
            let marker = match row.kind() {
                RowKind::Header if row.is_expanded() => '-',
                RowKind::Header => '+',
                RowKind::Book => ' ',
            };
            let pointer = if current == Some(position) { '>' } else { ' ' };
            let indent = " ".repeat(row.level().saturating_sub(1) * INDENT);
            let line = format!("{pointer}{position:>4} {marker} {indent}{}", row.display());
            truncate(&line, width)
        })
        .collect()
}

/// Cuts `text` to `width` display columns, ending in "…" when shortened.
fn truncate(text: &str, width: usize) -> String {
    if width == 0 || UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

fn import_style(storage: &Storage, file: &Path) -> anyhow::Result<()> {
    let json =
        fs::read_to_string(file).with_context(|| format!("read style {}", file.display()))?;
    let name = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("imported");
    let style = parse_style(name, &json)?;
    save_style(storage, &style)?;
    println!("saved style {}", style.name);
    Ok(())
}

fn book_from_args(args: AddArgs) -> anyhow::Result<Book> {
    if args.title.trim().is_empty() {
        bail!("a book needs a title");
    }
    if let Some(rating) = args.rating.filter(|rating| *rating > 5) {
        bail!("rating {rating} is out of range 0..=5");
    }
    Ok(Book {
        authors: args.authors.iter().map(|author| parse_author(author)).collect(),
        series: args.series.iter().map(|series| parse_series(series)).collect(),
        bookshelves: args.bookshelves,
        genre: args.genre,
        publisher: args.publisher,
        language: args.language,
        date_published: args.published,
        rating: args.rating,
        read: args.read,
        ..Book::new(args.title.trim())
    })
}

fn parse_author(value: &str) -> Author {
    match value.split_once(',') {
        Some((family, given)) => Author::new(family.trim(), given.trim()),
        None => Author::new(value.trim(), ""),
    }
}

fn parse_series(value: &str) -> SeriesRef {
    match value.rsplit_once('#') {
        Some((name, number)) if !number.trim().is_empty() => {
            SeriesRef::new(name.trim(), Some(number.trim()))
        }
        _ => SeriesRef::new(value.trim().trim_end_matches('#'), None),
    }
}
