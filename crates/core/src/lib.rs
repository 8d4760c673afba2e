//! Core domain types for Booklist.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_STYLE: &str = "Authors";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BookId(pub i64);

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub family_name: String,
    pub given_names: String,
}

impl Author {
    pub fn new(family_name: impl Into<String>, given_names: impl Into<String>) -> Self {
        Self {
            family_name: family_name.into(),
            given_names: given_names.into(),
        }
    }

    /// "Family, Given" form used for grouping and ordering.
    pub fn sort_name(&self) -> String {
        let family = self.family_name.trim();
        let given = self.given_names.trim();
        if given.is_empty() {
            family.to_string()
        } else if family.is_empty() {
            given.to_string()
        } else {
            format!("{family}, {given}")
        }
    }

    pub fn display_name(&self) -> String {
        let family = self.family_name.trim();
        let given = self.given_names.trim();
        if given.is_empty() {
            family.to_string()
        } else {
            format!("{given} {family}").trim().to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRef {
    pub name: String,
    pub number: Option<String>,
}

impl SeriesRef {
    pub fn new(name: impl Into<String>, number: Option<&str>) -> Self {
        Self {
            name: name.into(),
            number: number.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub authors: Vec<Author>,
    pub series: Vec<SeriesRef>,
    pub genre: String,
    pub publisher: String,
    pub location: String,
    pub format: String,
    pub language: String,
    pub date_published: Option<String>,
    pub read: bool,
    pub rating: Option<u8>,
    pub bookshelves: Vec<String>,
}

impl Book {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// What a style level groups books by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Author,
    Series,
    Genre,
    Publisher,
    ReadStatus,
    Location,
    Format,
    Language,
    Bookshelf,
    TitleLetter,
    YearPublished,
    Rating,
}

impl GroupKind {
    pub const ALL: [GroupKind; 12] = [
        GroupKind::Author,
        GroupKind::Series,
        GroupKind::Genre,
        GroupKind::Publisher,
        GroupKind::ReadStatus,
        GroupKind::Location,
        GroupKind::Format,
        GroupKind::Language,
        GroupKind::Bookshelf,
        GroupKind::TitleLetter,
        GroupKind::YearPublished,
        GroupKind::Rating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Author => "author",
            GroupKind::Series => "series",
            GroupKind::Genre => "genre",
            GroupKind::Publisher => "publisher",
            GroupKind::ReadStatus => "read_status",
            GroupKind::Location => "location",
            GroupKind::Format => "format",
            GroupKind::Language => "language",
            GroupKind::Bookshelf => "bookshelf",
            GroupKind::TitleLetter => "title_letter",
            GroupKind::YearPublished => "year_published",
            GroupKind::Rating => "rating",
        }
    }

    /// Multi-valued kinds put a book under every one of its values.
    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            GroupKind::Author | GroupKind::Series | GroupKind::Bookshelf
        )
    }

    /// `(table, column)` pairs the book store must provide for this grouping.
    pub fn source_columns(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            GroupKind::Author => &[
                ("authors", "family_name"),
                ("authors", "given_names"),
                ("book_authors", "author_id"),
            ],
            GroupKind::Series => &[
                ("series", "name"),
                ("book_series", "series_id"),
                ("book_series", "number"),
            ],
            GroupKind::Genre => &[("books", "genre")],
            GroupKind::Publisher => &[("books", "publisher")],
            GroupKind::ReadStatus => &[("books", "read")],
            GroupKind::Location => &[("books", "location")],
            GroupKind::Format => &[("books", "format")],
            GroupKind::Language => &[("books", "language")],
            GroupKind::Bookshelf => {
                &[("bookshelves", "name"), ("book_bookshelves", "bookshelf_id")]
            }
            GroupKind::TitleLetter => &[("books", "title")],
            GroupKind::YearPublished => &[("books", "date_published")],
            GroupKind::Rating => &[("books", "rating")],
        }
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            GroupKind::Rating => "{} stars",
            GroupKind::YearPublished => "Published {}",
            _ => "{}",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GroupKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        GroupKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or("unknown group kind")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }

    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLevel {
    pub kind: GroupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_template: Option<String>,
    #[serde(default)]
    pub sort: SortOrder,
    /// Header label for books without a value at this level. `None` attaches
    /// such books directly to the enclosing group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_label: Option<String>,
}

impl GroupLevel {
    pub fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            label_template: None,
            sort: SortOrder::Ascending,
            empty_label: None,
        }
    }

    pub fn descending(mut self) -> Self {
        self.sort = SortOrder::Descending;
        self
    }

    pub fn with_label_template(mut self, template: impl Into<String>) -> Self {
        self.label_template = Some(template.into());
        self
    }

    pub fn with_empty_label(mut self, label: impl Into<String>) -> Self {
        self.empty_label = Some(label.into());
        self
    }

    pub fn format_label(&self, value: &str) -> String {
        let template = self
            .label_template
            .as_deref()
            .unwrap_or_else(|| self.kind.default_label());
        if template.contains("{}") {
            template.replacen("{}", value, 1)
        } else {
            template.to_string()
        }
    }
}

fn default_expand_depth() -> usize {
    1
}

/// Ordered grouping levels used to build one book list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub name: String,
    pub levels: Vec<GroupLevel>,
    /// Headers at or above this level start expanded when no saved state exists.
    #[serde(default = "default_expand_depth")]
    pub expand_depth: usize,
}

impl Style {
    pub fn new(name: impl Into<String>, levels: Vec<GroupLevel>) -> Self {
        Self {
            name: name.into(),
            levels,
            expand_depth: default_expand_depth(),
        }
    }

    pub fn with_expand_depth(mut self, depth: usize) -> Self {
        self.expand_depth = depth;
        self
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn builtin() -> Vec<Style> {
        use GroupKind as K;
        let two = |name: &str, first: K, second: K| {
            Style::new(name, vec![GroupLevel::new(first), GroupLevel::new(second)])
        };
        vec![
            two(DEFAULT_STYLE, K::Author, K::Series),
            Style::new("Series", vec![GroupLevel::new(K::Series)]),
            two("Genre", K::Genre, K::Author),
            two("Read status", K::ReadStatus, K::Author),
            two("Bookshelves", K::Bookshelf, K::Author),
            two("Publishers", K::Publisher, K::Author),
            Style::new("Title letter", vec![GroupLevel::new(K::TitleLetter)]),
            Style::new(
                "Year published",
                vec![
                    GroupLevel::new(K::YearPublished)
                        .descending()
                        .with_empty_label("Unknown year"),
                    GroupLevel::new(K::Author),
                ],
            ),
        ]
    }

    pub fn builtin_named(name: &str) -> Option<Style> {
        let name = name.trim();
        Style::builtin()
            .into_iter()
            .find(|style| style.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Header,
    Book,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Header => "header",
            RowKind::Book => "book",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column value projected into a book row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl DomainValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DomainValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Nulls first, then numbers, then text (case-insensitive).
    pub fn sort_cmp(&self, other: &DomainValue) -> Ordering {
        fn rank(value: &DomainValue) -> u8 {
            match value {
                DomainValue::Null => 0,
                DomainValue::Integer(_) | DomainValue::Real(_) => 1,
                DomainValue::Text(_) => 2,
            }
        }
        match (self, other) {
            (DomainValue::Integer(a), DomainValue::Integer(b)) => a.cmp(b),
            (DomainValue::Integer(a), DomainValue::Real(b)) => (*a as f64).total_cmp(b),
            (DomainValue::Real(a), DomainValue::Integer(b)) => a.total_cmp(&(*b as f64)),
            (DomainValue::Real(a), DomainValue::Real(b)) => a.total_cmp(b),
            (DomainValue::Text(a), DomainValue::Text(b)) => a
                .to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b)),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for DomainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainValue::Null => Ok(()),
            DomainValue::Integer(value) => write!(f, "{value}"),
            DomainValue::Real(value) => write!(f, "{value}"),
            DomainValue::Text(value) => f.write_str(value),
        }
    }
}

/// One row of a flattened book list.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub absolute_position: usize,
    pub level: usize,
    pub kind: RowKind,
    /// Identity of the group: the header itself, or a book's enclosing group.
    pub node_key: String,
    pub parent_key: Option<String>,
    pub parent: Option<usize>,
    /// Position of the last descendant; equals `absolute_position` for leaves.
    pub subtree_end: usize,
    pub book_id: Option<BookId>,
    pub display: String,
    /// Display text of the group at each level on this row's path.
    pub level_data: Vec<String>,
    pub extras: Vec<DomainValue>,
}

impl FlatRow {
    pub fn is_header(&self) -> bool {
        self.kind == RowKind::Header
    }

    pub fn level_text(&self, level: usize) -> Option<&str> {
        level
            .checked_sub(1)
            .and_then(|index| self.level_data.get(index))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    pub author: String,
    pub title: String,
    pub text: String,
}

impl SearchCriteria {
    pub fn is_empty(&self) -> bool {
        self.author.trim().is_empty() && self.title.trim().is_empty() && self.text.trim().is_empty()
    }

    pub fn normalize(&mut self) {
        self.author = self.author.trim().to_string();
        self.title = self.title.trim().to_string();
        self.text = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
    }
}

/// Which books a list is built from. An empty bookshelf means every shelf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookFilter {
    pub bookshelf: String,
    pub criteria: SearchCriteria,
}

impl BookFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn bookshelf(name: impl Into<String>) -> Self {
        Self {
            bookshelf: name.into(),
            criteria: SearchCriteria::default(),
        }
    }

    pub fn with_criteria(mut self, criteria: SearchCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn normalize(&mut self) {
        self.bookshelf = self.bookshelf.trim().to_string();
        self.criteria.normalize();
    }
}

/// Last-used list preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bookshelf: String,
    pub style: String,
    pub top_row: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bookshelf: String::new(),
            style: DEFAULT_STYLE.to_string(),
            top_row: 0,
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.bookshelf = self.bookshelf.trim().to_string();
        self.style = self.style.trim().to_string();
        if self.style.is_empty() {
            self.style = DEFAULT_STYLE.to_string();
        }
    }
}
