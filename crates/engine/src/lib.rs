//! Flattened book-list engine.
//!
//! [`BooklistBuilder`] groups books by the levels of a [`Style`] into a
//! depth-first row sequence persisted in a per-builder table. Group headers
//! can be expanded and collapsed; [`position::PositionIndex`] maps the rows
//! that are currently shown to their absolute positions, and
//! [`BooklistCursor`] reads them.
//!
//! [`Style`]: booklist_core::Style

mod builder;
mod control;
mod cursor;
mod error;
mod flatten;
pub mod position;
pub mod style;

pub use builder::{BooklistBuilder, BuildSummary, DomainSpec};
pub use control::{BuildControl, BuildPhase, BuildProgress};
pub use cursor::{BooklistCursor, BuilderHandle, RowView};
pub use error::{BooklistError, Result};
pub use position::ScrollTarget;

#[cfg(test)]
mod testing;
