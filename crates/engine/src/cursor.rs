//! Read-only, position-seekable view over a built list.

use std::fmt;
use std::sync::Arc;

use booklist_core::{BookId, DomainValue, FlatRow, RowKind};
use parking_lot::{Mutex, MutexGuard};

use crate::builder::BooklistBuilder;
use crate::error::{BooklistError, Result};
use crate::position::PositionIndex;

/// Shared ownership of a builder, so cursors can reach back to it for
/// structural operations.
#[derive(Clone)]
pub struct BuilderHandle {
    inner: Arc<Mutex<BooklistBuilder>>,
}

impl BuilderHandle {
    pub fn new(builder: BooklistBuilder) -> Self {
        Self {
            inner: Arc::new(Mutex::new(builder)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, BooklistBuilder> {
        self.inner.lock()
    }

    /// A cursor over the builder's current rows and expansion state.
    pub fn get_list(&self) -> BooklistCursor {
        let snapshot = self.lock().snapshot();
        BooklistCursor {
            handle: self.clone(),
            snapshot,
            position: None,
        }
    }
}

impl fmt::Debug for BuilderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderHandle").finish_non_exhaustive()
    }
}

/// Copy-on-write capture of one builder state. Rows are shared with the
/// builder until it next mutates them.
#[derive(Debug, Clone)]
pub(crate) struct ListSnapshot {
    pub generation: u64,
    pub rows: Arc<Vec<FlatRow>>,
    pub expanded: Arc<Vec<bool>>,
    pub index: Arc<PositionIndex>,
    pub num_levels: usize,
    pub domains: Vec<String>,
}

#[derive(Debug)]
pub struct BooklistCursor {
    handle: BuilderHandle,
    snapshot: ListSnapshot,
    position: Option<usize>,
}

impl BooklistCursor {
    /// Number of visible rows.
    pub fn count(&self) -> usize {
        self.snapshot.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.index.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    pub fn num_levels(&self) -> usize {
        self.snapshot.num_levels
    }

    pub fn builder(&self) -> &BuilderHandle {
        &self.handle
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn move_to_position(&mut self, position: usize) -> Result<()> {
        let count = self.count();
        if position >= count {
            return Err(BooklistError::OutOfBounds { position, count });
        }
        self.position = Some(position);
        Ok(())
    }

    /// Advances one row; false once past the end.
    pub fn move_to_next(&mut self) -> bool {
        let next = self.position.map_or(0, |position| position + 1);
        if next < self.count() {
            self.position = Some(next);
            true
        } else {
            self.position = None;
            false
        }
    }

    /// The row at the current position.
    pub fn row_view(&self) -> Option<RowView<'_>> {
        self.position.and_then(|position| self.row_at(position))
    }

    pub fn row_at(&self, position: usize) -> Option<RowView<'_>> {
        let absolute = self.snapshot.index.absolute_at(position)?;
        Some(RowView {
            row: &self.snapshot.rows[absolute],
            expanded: self.snapshot.expanded[absolute],
            domains: &self.snapshot.domains,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        (0..self.count()).filter_map(|position| self.row_at(position))
    }

    /// Picks up the builder's current expansion state, keeping the position
    /// when it is still in range.
    pub fn requery(&mut self) {
        self.snapshot = self.handle.lock().snapshot();
        let count = self.count();
        self.position = self
            .position
            .filter(|_| count > 0)
            .map(|position| position.min(count - 1));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    row: &'a FlatRow,
    expanded: bool,
    domains: &'a [String],
}

impl<'a> RowView<'a> {
    pub fn kind(&self) -> RowKind {
        self.row.kind
    }

    pub fn level(&self) -> usize {
        self.row.level
    }

    /// Only book rows carry a book id.
    pub fn book_id(&self) -> Option<BookId> {
        self.row.book_id
    }

    pub fn level_1_data(&self) -> Option<&'a str> {
        self.row.level_text(1)
    }

    pub fn level_2_data(&self) -> Option<&'a str> {
        self.row.level_text(2)
    }

    pub fn absolute_position(&self) -> usize {
        self.row.absolute_position
    }

    pub fn display(&self) -> &'a str {
        &self.row.display
    }

    pub fn node_key(&self) -> &'a str {
        &self.row.node_key
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn domain(&self, name: &str) -> Option<&'a DomainValue> {
        let index = self.domains.iter().position(|domain| domain == name)?;
        self.row.extras.get(index)
    }
}
