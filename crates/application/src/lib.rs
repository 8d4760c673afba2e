//! Application orchestration layer for Booklist.

pub mod coordinator;

use std::time::Duration;

use booklist_core::{BookFilter, BookId, DEFAULT_STYLE, SearchCriteria, Settings, Style};
use booklist_storage::Storage;
use booklist_engine::style::resolve_style;
use booklist_engine::{BooklistBuilder, BooklistCursor, BuilderHandle, Result};

pub use coordinator::{
    BuildCoordinator, BuildKind, BuildRequest, BuildResult, ListReady, TaskState,
};

pub const BUILD_FAILED_NOTICE: &str = "Could not build list";

/// One book list screen: its preferences, the builder behind it and the list
/// currently on display.
#[derive(Debug)]
pub struct BooklistScreen {
    settings: Settings,
    criteria: SearchCriteria,
    handle: BuilderHandle,
    coordinator: BuildCoordinator,
    cursor: Option<BooklistCursor>,
    mark: Option<BookId>,
    error: Option<String>,
    notice: Option<String>,
}

impl BooklistScreen {
    /// Opens a screen over `storage` with the saved preferences. A saved style
    /// that no longer resolves falls back to the default one.
    pub fn open(storage: Storage, namespace: &str) -> anyhow::Result<Self> {
        let mut settings = storage.load_settings()?;
        settings.normalize();
        let style = match resolve_style(&storage, &settings.style) {
            Ok(style) => style,
            Err(err) => {
                tracing::warn!(style = %settings.style, "falling back to the default style: {err}");
                settings.style = DEFAULT_STYLE.to_string();
                default_style()
            }
        };
        let builder = BooklistBuilder::new(storage, namespace, style)?;
        let handle = BuilderHandle::new(builder);
        let coordinator = BuildCoordinator::new(handle.clone())?;
        Ok(Self {
            settings,
            criteria: SearchCriteria::default(),
            handle,
            coordinator,
            cursor: None,
            mark: None,
            error: None,
            notice: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    pub fn builder(&self) -> &BuilderHandle {
        &self.handle
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    /// The list on display, if any.
    pub fn cursor(&self) -> Option<&BooklistCursor> {
        self.cursor.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn mark(&self) -> Option<BookId> {
        self.mark
    }

    pub fn set_mark(&mut self, book: Option<BookId>) {
        self.mark = book;
    }

    /// Remembers the first visible row, used to keep the scroll position.
    pub fn set_top_row(&mut self, position: usize) {
        self.settings.top_row = position;
    }

    pub fn set_bookshelf(&mut self, bookshelf: &str) -> u64 {
        self.settings.bookshelf = bookshelf.trim().to_string();
        self.settings.top_row = 0;
        self.request_build()
    }

    pub fn set_style(&mut self, style: &str) -> u64 {
        self.settings.style = style.trim().to_string();
        self.settings.normalize();
        self.settings.top_row = 0;
        self.request_build()
    }

    pub fn set_search(&mut self, criteria: SearchCriteria) -> u64 {
        self.criteria = criteria;
        self.criteria.normalize();
        self.settings.top_row = 0;
        self.request_build()
    }

    fn filter(&self) -> BookFilter {
        BookFilter::bookshelf(self.settings.bookshelf.clone()).with_criteria(self.criteria.clone())
    }

    /// Queues a full build for the current shelf, style and search.
    pub fn request_build(&mut self) -> u64 {
        let request = BuildRequest::build(self.filter(), Some(self.settings.style.clone()))
            .with_mark(self.mark)
            .with_previous_top(self.settings.top_row);
        self.coordinator.submit(request)
    }

    pub fn request_rebuild(&mut self) -> u64 {
        let request = BuildRequest::rebuild()
            .with_mark(self.mark)
            .with_previous_top(self.settings.top_row);
        self.coordinator.submit(request)
    }

    /// Rebuilds after a book changed, keeping it in view.
    pub fn book_edited(&mut self, book: BookId) -> u64 {
        self.mark = Some(book);
        self.request_rebuild()
    }

    pub fn book_deleted(&mut self, book: BookId) -> u64 {
        if self.mark == Some(book) {
            self.mark = None;
        }
        self.request_rebuild()
    }

    /// Displays the newest finished build, if one is waiting.
    pub fn poll(&mut self) -> bool {
        match self.coordinator.try_result() {
            Some(result) => {
                self.display_list(result);
                true
            }
            None => false,
        }
    }

    pub fn wait_for_list(&mut self, timeout: Duration) -> bool {
        match self.coordinator.wait_result(timeout) {
            Some(result) => {
                self.display_list(result);
                true
            }
            None => false,
        }
    }

    /// Shows a finished build. A configuration error clears the list, a
    /// storage error keeps the previous one. Showing a list consumes the mark.
    pub fn display_list(&mut self, result: BuildResult) {
        match result.outcome {
            Ok(ready) => {
                self.settings.top_row = ready.target.position;
                self.cursor = Some(ready.cursor);
                // The mark has been scrolled to; later rebuilds keep the user's view.
                self.mark = None;
                self.error = None;
                self.notice = None;
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) if err.is_fatal() => {
                tracing::warn!(generation = result.generation, "book list unavailable: {err}");
                self.cursor = None;
                self.error = Some(err.to_string());
            }
            Err(err) => {
                tracing::warn!(generation = result.generation, "book list build failed: {err:#}");
                self.notice = Some(BUILD_FAILED_NOTICE.to_string());
            }
        }
    }

    /// Expands or collapses the group at visible `position`. Returns false
    /// when the row is not a group.
    pub fn toggle_visible(&mut self, position: usize) -> Result<bool> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(false);
        };
        let Some(absolute) = cursor.row_at(position).map(|row| row.absolute_position()) else {
            return Ok(false);
        };
        let toggled = {
            let mut builder = self.handle.lock();
            // Positions of an older list do not address the builder's rows.
            if builder.generation() != cursor.generation() {
                tracing::debug!(position, "ignoring toggle on a superseded list");
                return Ok(false);
            }
            builder.toggle_expand_node(absolute)?
        };
        if toggled {
            cursor.requery();
        }
        Ok(toggled)
    }

    pub fn expand_all(&mut self, expand: bool) -> Result<()> {
        self.handle.lock().expand_all(expand)?;
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.requery();
        }
        Ok(())
    }

    /// Saves expansion state and preferences.
    pub fn pause(&mut self) -> Result<()> {
        let mut builder = self.handle.lock();
        builder.save_node_settings()?;
        builder.storage().save_settings(&self.settings)?;
        tracing::debug!(
            style = %self.settings.style,
            top_row = self.settings.top_row,
            "screen paused"
        );
        Ok(())
    }

    /// Cancels outstanding builds, stops the worker and drops the list.
    pub fn destroy(mut self) -> Result<()> {
        self.coordinator.cancel();
        self.coordinator.shutdown();
        self.cursor = None;
        let mut builder = self.handle.lock();
        builder.save_node_settings()?;
        builder.close()
    }
}

fn default_style() -> Style {
    Style::builtin_named(DEFAULT_STYLE)
        .unwrap_or_else(|| Style::new(DEFAULT_STYLE, Vec::new()))
}

#[cfg(test)]
mod testing;
