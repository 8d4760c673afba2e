//! The flattening engine: builds, persists and navigates one book list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use booklist_core::{BookFilter, BookId, FlatRow, Style};
use booklist_storage::{ListTable, RowFlags, Storage};

use crate::control::{BuildControl, BuildPhase};
use crate::cursor::ListSnapshot;
use crate::error::{BooklistError, Result};
use crate::flatten::flatten;
use crate::position::{PositionIndex, ScrollTarget, clamp_top, closest_to};
use crate::style::check_schema;

/// An extra `books` column carried into every book row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec {
    pub name: String,
    pub source_column: String,
    pub sortable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub generation: u64,
    pub rows: usize,
    pub books: usize,
    pub visible: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableMode {
    Create,
    Replace,
}

#[derive(Debug)]
pub struct BooklistBuilder {
    storage: Storage,
    table: ListTable,
    style: Style,
    filter: BookFilter,
    domains: Vec<DomainSpec>,
    rows: Arc<Vec<FlatRow>>,
    expanded: Arc<Vec<bool>>,
    visible: Vec<bool>,
    index: Arc<PositionIndex>,
    node_states: HashMap<String, bool>,
    dirty_nodes: HashSet<String>,
    generation: u64,
    built: bool,
    structure_stale: bool,
}

impl BooklistBuilder {
    /// `namespace` names this builder's flat table; it must be unique among
    /// builders sharing a database and match `[a-z0-9_]+`.
    pub fn new(storage: Storage, namespace: &str, style: Style) -> Result<Self> {
        let table = ListTable::for_namespace(namespace)
            .map_err(|err| BooklistError::configuration(format!("{err:#}")))?;
        Ok(Self {
            storage,
            table,
            style,
            filter: BookFilter::default(),
            domains: Vec::new(),
            rows: Arc::new(Vec::new()),
            expanded: Arc::new(Vec::new()),
            visible: Vec::new(),
            index: Arc::new(PositionIndex::default()),
            node_states: HashMap::new(),
            dirty_nodes: HashSet::new(),
            generation: 0,
            built: false,
            structure_stale: true,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn filter(&self) -> &BookFilter {
        &self.filter
    }

    pub fn domains(&self) -> &[DomainSpec] {
        &self.domains
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn visible_count(&self) -> usize {
        self.index.len()
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    /// Switches style. Pending node state of the old style is saved first and
    /// the next `build` or `rebuild` regenerates the structure.
    pub fn set_style(&mut self, style: Style) -> Result<()> {
        if style == self.style {
            return Ok(());
        }
        self.save_node_settings()?;
        tracing::debug!(from = %self.style.name, to = %style.name, "style changed");
        self.style = style;
        self.node_states.clear();
        self.structure_stale = true;
        Ok(())
    }

    /// Declares an extra column for book rows, effective from the next build.
    pub fn require_domain(&mut self, name: &str, source_column: &str, sortable: bool) {
        let spec = DomainSpec {
            name: name.to_string(),
            source_column: source_column.to_string(),
            sortable,
        };
        match self.domains.iter_mut().find(|domain| domain.name == name) {
            Some(existing) => *existing = spec,
            None => self.domains.push(spec),
        }
    }

    pub fn build(&mut self, mark: Option<BookId>, filter: BookFilter) -> Result<BuildSummary> {
        self.build_with(mark, filter, &BuildControl::default())
    }

    /// Full structural build: reloads saved node state, regenerates every row
    /// and recreates the flat table.
    pub fn build_with(
        &mut self,
        mark: Option<BookId>,
        mut filter: BookFilter,
        control: &BuildControl,
    ) -> Result<BuildSummary> {
        filter.normalize();
        control.check()?;
        self.validate_schema()?;
        self.save_node_settings()?;
        let node_states = self.storage.load_node_settings(&self.style.name)?;
        self.generate(mark, filter, node_states, TableMode::Create, control)
    }

    pub fn rebuild(&mut self) -> Result<BuildSummary> {
        self.rebuild_with(&BuildControl::default())
    }

    /// Re-reads the books for the current filter and style, keeping node state
    /// in memory and the flat table in place.
    pub fn rebuild_with(&mut self, control: &BuildControl) -> Result<BuildSummary> {
        if !self.built || self.structure_stale {
            tracing::debug!(style = %self.style.name, "no current structure, running a full build");
            return self.build_with(None, self.filter.clone(), control);
        }
        control.check()?;
        self.validate_domains()?;
        let node_states = self.node_states.clone();
        let filter = self.filter.clone();
        self.generate(None, filter, node_states, TableMode::Replace, control)
    }

    fn validate_schema(&self) -> Result<()> {
        let columns: Vec<&str> = self
            .domains
            .iter()
            .map(|domain| domain.source_column.as_str())
            .collect();
        check_schema(&self.storage, &self.style, &columns)
    }

    fn validate_domains(&self) -> Result<()> {
        let columns: Vec<&str> = self
            .domains
            .iter()
            .map(|domain| domain.source_column.as_str())
            .collect();
        let no_levels = Style::new(self.style.name.clone(), Vec::new());
        check_schema(&self.storage, &no_levels, &columns)
    }

    fn generate(
        &mut self,
        mark: Option<BookId>,
        filter: BookFilter,
        mut node_states: HashMap<String, bool>,
        mode: TableMode,
        control: &BuildControl,
    ) -> Result<BuildSummary> {
        control.report(BuildPhase::Query, 0, 0);
        let columns: Vec<String> = self
            .domains
            .iter()
            .map(|domain| domain.source_column.clone())
            .collect();
        let records = self.storage.query_books(&filter, &columns)?;
        tracing::debug!(books = records.len(), style = %self.style.name, "queried books");
        control.check()?;

        let rows = flatten(&self.style, &records, &self.domains, control)?;
        control.check()?;

        let mut dirty = HashSet::new();
        let mut expanded: Vec<bool> = rows
            .iter()
            .map(|row| {
                if !row.is_header() {
                    return false;
                }
                *node_states.entry(row.node_key.clone()).or_insert_with(|| {
                    dirty.insert(row.node_key.clone());
                    row.level <= self.style.expand_depth
                })
            })
            .collect();

        if let Some(mark) = mark {
            for row in rows.iter().filter(|row| row.book_id == Some(mark)) {
                let mut parent = row.parent;
                while let Some(position) = parent {
                    if !expanded[position] {
                        expanded[position] = true;
                        let key = rows[position].node_key.clone();
                        node_states.insert(key.clone(), true);
                        dirty.insert(key);
                    }
                    parent = rows[position].parent;
                }
            }
        }

        let mut visible = vec![false; rows.len()];
        for position in 0..rows.len() {
            visible[position] = row_visible(&rows, &expanded, &visible, position);
        }
        let index = PositionIndex::from_flags(&visible);
        control.report(BuildPhase::Index, index.len(), rows.len());
        control.check()?;

        control.report(BuildPhase::Persist, 0, rows.len());
        let flags: Vec<RowFlags> = (0..rows.len())
            .map(|position| RowFlags {
                absolute_position: position,
                expanded: expanded[position],
                visible: visible[position],
            })
            .collect();
        let persisted = match mode {
            TableMode::Create => self.storage.create_list_table(&self.table, &rows, &flags),
            TableMode::Replace => self.storage.replace_list_rows(&self.table, &rows, &flags),
        };
        persisted.inspect_err(|err| tracing::warn!("could not persist book list: {err:#}"))?;

        self.rows = Arc::new(rows);
        self.expanded = Arc::new(expanded);
        self.visible = visible;
        self.index = Arc::new(index);
        self.node_states = node_states;
        self.dirty_nodes.extend(dirty);
        self.filter = filter;
        self.generation += 1;
        self.built = true;
        self.structure_stale = false;

        let summary = BuildSummary {
            generation: self.generation,
            rows: self.rows.len(),
            books: records.len(),
            visible: self.index.len(),
        };
        tracing::info!(
            generation = summary.generation,
            rows = summary.rows,
            visible = summary.visible,
            rebuild = mode == TableMode::Replace,
            "book list built"
        );
        Ok(summary)
    }

    /// Flips the group at `absolute`. Returns false for books and positions
    /// outside the list.
    pub fn toggle_expand_node(&mut self, absolute: usize) -> Result<bool> {
        let Some(row) = self.rows.get(absolute) else {
            return Ok(false);
        };
        if !row.is_header() {
            return Ok(false);
        }
        let last = row.subtree_end;
        let now = !self.expanded[absolute];
        self.apply_expansion(&[(absolute, now)], absolute, last)?;
        tracing::trace!(absolute, expanded = now, "toggled node");
        Ok(true)
    }

    pub fn expand_all(&mut self, expand: bool) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let changes: Vec<(usize, bool)> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_header())
            .map(|(position, _)| (position, expand))
            .collect();
        self.apply_expansion(&changes, 0, self.rows.len() - 1)
    }

    /// Expands every collapsed ancestor of `absolute`. Returns whether anything changed.
    pub fn ensure_absolute_position_visible(&mut self, absolute: usize) -> Result<bool> {
        let Some(row) = self.rows.get(absolute) else {
            return Ok(false);
        };
        let mut changes = Vec::new();
        let mut parent = row.parent;
        while let Some(position) = parent {
            if !self.expanded[position] {
                changes.push((position, true));
            }
            parent = self.rows[position].parent;
        }
        let Some(&(topmost, _)) = changes.last() else {
            return Ok(false);
        };
        self.apply_expansion(&changes, topmost, self.rows[topmost].subtree_end)?;
        Ok(true)
    }

    /// Sets the expanded flag of each `(position, expanded)` in `changes`,
    /// all of which lie in `first..=last`, and recomputes visibility for that
    /// range. Every row's parent lies at or before `first`. The flags are
    /// written through before any in-memory state changes, so a failed write
    /// leaves the builder as it was.
    fn apply_expansion(
        &mut self,
        changes: &[(usize, bool)],
        first: usize,
        last: usize,
    ) -> Result<()> {
        let mut expanded = self.expanded[first..=last].to_vec();
        for &(position, value) in changes {
            expanded[position - first] = value;
        }
        let mut visible = vec![false; expanded.len()];
        for position in first..=last {
            let shown = match self.rows[position].parent {
                Some(parent) if parent >= first => {
                    visible[parent - first] && expanded[parent - first]
                }
                Some(parent) => self.visible[parent] && self.expanded[parent],
                None => true,
            };
            visible[position - first] = shown;
        }

        let flags: Vec<RowFlags> = (first..=last)
            .map(|position| RowFlags {
                absolute_position: position,
                expanded: expanded[position - first],
                visible: visible[position - first],
            })
            .collect();
        self.storage.update_list_flags(&self.table, &flags)?;

        Arc::make_mut(&mut self.expanded)[first..=last].copy_from_slice(&expanded);
        self.visible[first..=last].copy_from_slice(&visible);
        let replacement: Vec<usize> = (first..=last)
            .filter(|&position| self.visible[position])
            .collect();
        Arc::make_mut(&mut self.index).splice(first, last, replacement);
        for &(position, value) in changes {
            let key = self.rows[position].node_key.clone();
            self.node_states.insert(key.clone(), value);
            self.dirty_nodes.insert(key);
        }
        Ok(())
    }

    /// Every absolute position the book occupies, read from the flat table.
    pub fn get_book_absolute_positions(&self, book: BookId) -> Vec<usize> {
        if !self.built {
            return Vec::new();
        }
        match self.storage.list_book_positions(&self.table, book) {
            Ok(positions) => positions,
            Err(err) => {
                tracing::warn!(%book, "could not look up book rows: {err:#}");
                Vec::new()
            }
        }
    }

    pub fn get_position(&self, absolute: usize) -> Option<usize> {
        self.index.position_of(absolute)
    }

    pub fn nearest_visible(&self, absolute: usize) -> Option<usize> {
        self.index.nearest_visible(absolute)
    }

    /// Where the list should scroll after a build: the occurrence of `mark`
    /// nearest the previous top row, else the previous top row clamped.
    pub fn target_position(
        &mut self,
        previous_top: usize,
        mark: Option<BookId>,
    ) -> Result<ScrollTarget> {
        if let Some(book) = mark {
            let positions = self.get_book_absolute_positions(book);
            for &absolute in &positions {
                self.ensure_absolute_position_visible(absolute)?;
            }
            let candidates: Vec<usize> = positions
                .iter()
                .filter_map(|&absolute| self.get_position(absolute))
                .collect();
            if let Some(position) = closest_to(previous_top, &candidates) {
                return Ok(ScrollTarget {
                    position,
                    mark_found: true,
                });
            }
            tracing::debug!(%book, "marked book is not in the list");
        }
        Ok(ScrollTarget {
            position: clamp_top(previous_top, self.visible_count()),
            mark_found: false,
        })
    }

    pub fn save_node_settings(&mut self) -> Result<()> {
        if self.dirty_nodes.is_empty() {
            return Ok(());
        }
        let mut entries: Vec<(String, bool)> = self
            .dirty_nodes
            .iter()
            .filter_map(|key| self.node_states.get(key).map(|expanded| (key.clone(), *expanded)))
            .collect();
        entries.sort();
        self.storage.save_node_settings(&self.style.name, &entries)?;
        self.dirty_nodes.clear();
        Ok(())
    }

    /// Drops the flat table and forgets the current generation.
    pub fn close(&mut self) -> Result<()> {
        self.storage.drop_list_table(&self.table)?;
        self.rows = Arc::new(Vec::new());
        self.expanded = Arc::new(Vec::new());
        self.visible.clear();
        self.index = Arc::new(PositionIndex::default());
        self.built = false;
        self.structure_stale = true;
        tracing::debug!(table = self.table.name(), "closed book list");
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            generation: self.generation,
            rows: Arc::clone(&self.rows),
            expanded: Arc::clone(&self.expanded),
            index: Arc::clone(&self.index),
            num_levels: self.style.num_levels(),
            domains: self.domains.iter().map(|domain| domain.name.clone()).collect(),
        }
    }
}

fn row_visible(rows: &[FlatRow], expanded: &[bool], visible: &[bool], position: usize) -> bool {
    match rows[position].parent {
        Some(parent) => visible[parent] && expanded[parent],
        None => true,
    }
}
