//! Sort-and-group pass turning book records into depth-first list rows.

use std::cmp::Ordering;

use booklist_core::{Book, FlatRow, GroupKind, GroupLevel, RowKind, Style};
use booklist_storage::BookRecord;

use crate::builder::DomainSpec;
use crate::control::{BuildControl, BuildPhase};
use crate::error::Result;

const PROGRESS_EVERY: usize = 256;

/// One distinct value of a grouping level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupValue {
    pub key: String,
    pub display: String,
    pub series_number: Option<String>,
}

impl GroupValue {
    fn new(display: &str) -> Self {
        Self {
            key: sort_key(display),
            display: display.trim().to_string(),
            series_number: None,
        }
    }
}

/// A book placed on one group path. Multi-valued levels yield several entries per book.
struct Entry<'a> {
    record: &'a BookRecord,
    path: Vec<GroupValue>,
    number: Option<(u64, String)>,
    title: String,
}

pub(crate) fn sort_key(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Identity of a group node: `kind=key` segments of its path joined by `/`.
pub(crate) fn node_key(parent: Option<&str>, kind: GroupKind, key: &str) -> String {
    let escaped = key.replace('%', "%25").replace('/', "%2F");
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}/{kind}={escaped}"),
        _ => format!("{kind}={escaped}"),
    }
}

pub(crate) fn group_values(kind: GroupKind, book: &Book) -> Vec<GroupValue> {
    let single = |value: &str| {
        if value.trim().is_empty() {
            Vec::new()
        } else {
            vec![GroupValue::new(value)]
        }
    };
    let mut values: Vec<GroupValue> = match kind {
        GroupKind::Author => book
            .authors
            .iter()
            .map(|author| author.sort_name())
            .filter(|name| !name.is_empty())
            .map(|name| GroupValue::new(&name))
            .collect(),
        GroupKind::Series => book
            .series
            .iter()
            .filter(|series| !series.name.trim().is_empty())
            .map(|series| GroupValue {
                series_number: series.number.clone(),
                ..GroupValue::new(&series.name)
            })
            .collect(),
        GroupKind::Genre => single(&book.genre),
        GroupKind::Publisher => single(&book.publisher),
        GroupKind::Location => single(&book.location),
        GroupKind::Format => single(&book.format),
        GroupKind::Language => single(&book.language),
        GroupKind::ReadStatus => single(if book.read { "Read" } else { "Unread" }),
        GroupKind::Bookshelf => book
            .bookshelves
            .iter()
            .filter(|shelf| !shelf.trim().is_empty())
            .map(|shelf| GroupValue::new(shelf))
            .collect(),
        GroupKind::TitleLetter => book
            .title
            .chars()
            .find(|c| c.is_alphanumeric())
            .map(|c| single(&c.to_uppercase().to_string()))
            .unwrap_or_default(),
        GroupKind::YearPublished => book
            .date_published
            .as_deref()
            .map(str::trim)
            .filter(|date| date.len() >= 4 && date.as_bytes()[..4].iter().all(u8::is_ascii_digit))
            .map(|date| single(&date[..4]))
            .unwrap_or_default(),
        GroupKind::Rating => book
            .rating
            .map(|rating| single(&rating.to_string()))
            .unwrap_or_default(),
    };
    let mut seen = std::collections::HashSet::new();
    values.retain(|value: &GroupValue| seen.insert(value.key.clone()));
    values
}

fn level_values(level: &GroupLevel, book: &Book) -> Vec<GroupValue> {
    let values = group_values(level.kind, book);
    match (&level.empty_label, values.is_empty()) {
        (Some(label), true) => vec![GroupValue {
            key: String::new(),
            display: label.clone(),
            series_number: None,
        }],
        _ => values,
    }
}

/// Every group path of a book. A level with no value ends the path there.
fn book_paths(levels: &[GroupLevel], book: &Book) -> Vec<Vec<GroupValue>> {
    let mut paths: Vec<Vec<GroupValue>> = vec![Vec::new()];
    for level in levels {
        let values = level_values(level, book);
        if values.is_empty() {
            break;
        }
        paths = paths
            .into_iter()
            .flat_map(|path| {
                values.iter().map(move |value| {
                    let mut next = path.clone();
                    next.push(value.clone());
                    next
                })
            })
            .collect();
    }
    paths
}

fn number_key(number: &str) -> (u64, String) {
    let number = number.trim();
    let digits: String = number.chars().take_while(char::is_ascii_digit).collect();
    let value = digits.parse::<u64>().unwrap_or(u64::MAX);
    (value, number[digits.len()..].to_lowercase())
}

fn compare_entries(
    a: &Entry<'_>,
    b: &Entry<'_>,
    levels: &[GroupLevel],
    sortable: &[usize],
) -> Ordering {
    for (index, level) in levels.iter().enumerate() {
        match (a.path.get(index), b.path.get(index)) {
            (None, None) => break,
            // books without a value here sit before the sibling groups
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = level.sort.apply(x.key.cmp(&y.key));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }

    let none_last =
        |number: &Option<(u64, String)>| number.clone().unwrap_or((u64::MAX, String::new()));
    none_last(&a.number)
        .cmp(&none_last(&b.number))
        .then_with(|| {
            sortable
                .iter()
                .map(|&index| {
                    let left = a.record.extras.get(index).cloned().unwrap_or_default();
                    let right = b.record.extras.get(index).cloned().unwrap_or_default();
                    left.sort_cmp(&right)
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.record.book.id.cmp(&b.record.book.id))
        .then_with(|| {
            let left = a.path.iter().map(|value| value.display.as_str());
            let right = b.path.iter().map(|value| value.display.as_str());
            left.cmp(right)
        })
}

struct OpenGroup {
    key: String,
    node_key: String,
    position: usize,
}

fn close_groups(rows: &mut [FlatRow], open: &mut Vec<OpenGroup>, depth: usize) {
    let last = rows.len().saturating_sub(1);
    for group in open.drain(depth..) {
        rows[group.position].subtree_end = last;
    }
}

/// Sorts the records by every level key and walks them once, opening a header
/// whenever a level's key changes.
pub(crate) fn flatten(
    style: &Style,
    records: &[BookRecord],
    domains: &[DomainSpec],
    control: &BuildControl,
) -> Result<Vec<FlatRow>> {
    let levels = &style.levels;
    let sortable: Vec<usize> = domains
        .iter()
        .enumerate()
        .filter(|(_, domain)| domain.sortable)
        .map(|(index, _)| index)
        .collect();

    let mut entries: Vec<Entry<'_>> = Vec::with_capacity(records.len());
    for record in records {
        for path in book_paths(levels, &record.book) {
            let innermost_series =
                !path.is_empty() && levels[path.len() - 1].kind == GroupKind::Series;
            let number = path
                .last()
                .filter(|_| innermost_series)
                .and_then(|value| value.series_number.as_deref())
                .map(number_key);
            entries.push(Entry {
                record,
                path,
                number,
                title: record.book.title.to_lowercase(),
            });
        }
    }

    control.report(BuildPhase::Sort, 0, entries.len());
    entries.sort_by(|a, b| compare_entries(a, b, levels, &sortable));
    control.check()?;

    let total = entries.len();
    let mut rows: Vec<FlatRow> = Vec::with_capacity(total + total / 2);
    let mut open: Vec<OpenGroup> = Vec::with_capacity(levels.len());
    for (processed, entry) in entries.iter().enumerate() {
        let mut depth = 0;
        while depth < open.len()
            && depth < entry.path.len()
            && open[depth].key == entry.path[depth].key
        {
            depth += 1;
        }
        close_groups(&mut rows, &mut open, depth);

        for (index, value) in entry.path.iter().enumerate().skip(depth) {
            let level = &levels[index];
            let (parent, parent_key, mut level_data) = match open.last() {
                Some(group) => (
                    Some(group.position),
                    Some(group.node_key.clone()),
                    rows[group.position].level_data.clone(),
                ),
                None => (None, None, Vec::new()),
            };
            let key = node_key(parent_key.as_deref(), level.kind, &value.key);
            // Empty-label groups show the label as given.
            let display = if value.key.is_empty() {
                value.display.clone()
            } else {
                level.format_label(&value.display)
            };
            level_data.push(display.clone());
            let position = rows.len();
            rows.push(FlatRow {
                absolute_position: position,
                level: index + 1,
                kind: RowKind::Header,
                node_key: key.clone(),
                parent_key,
                parent,
                subtree_end: position,
                book_id: None,
                display,
                level_data,
                extras: Vec::new(),
            });
            open.push(OpenGroup {
                key: value.key.clone(),
                node_key: key,
                position,
            });
        }

        let (parent, node_key, level_data) = match open.last() {
            Some(group) => (
                Some(group.position),
                group.node_key.clone(),
                rows[group.position].level_data.clone(),
            ),
            None => (None, String::new(), Vec::new()),
        };
        let position = rows.len();
        rows.push(FlatRow {
            absolute_position: position,
            level: entry.path.len() + 1,
            kind: RowKind::Book,
            parent_key: parent.map(|_| node_key.clone()),
            node_key,
            parent,
            subtree_end: position,
            book_id: Some(entry.record.book.id),
            display: book_display(entry),
            level_data,
            extras: entry.record.extras.clone(),
        });

        if (processed + 1) % PROGRESS_EVERY == 0 {
            control.report(BuildPhase::Group, processed + 1, total);
        }
    }
    close_groups(&mut rows, &mut open, 0);
    control.report(BuildPhase::Group, total, total);

    Ok(rows)
}

fn book_display(entry: &Entry<'_>) -> String {
    let number = entry
        .number
        .as_ref()
        .and(entry.path.last())
        .and_then(|value| value.series_number.as_deref());
    match number {
        Some(number) if !number.trim().is_empty() => {
            format!("{} (#{})", entry.record.book.title, number.trim())
        }
        _ => entry.record.book.title.clone(),
    }
}
