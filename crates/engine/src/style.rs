//! Style lookup: user styles from the style store, then the built-in set.

use booklist_core::Style;
use booklist_storage::Storage;

use crate::error::{BooklistError, Result};

pub fn resolve_style(storage: &Storage, name: &str) -> Result<Style> {
    if let Some(json) = storage.load_style_json(name)? {
        return parse_style(name, &json);
    }
    Style::builtin_named(name)
        .ok_or_else(|| BooklistError::configuration(format!("unknown style {name:?}")))
}

pub fn parse_style(name: &str, json: &str) -> Result<Style> {
    let style: Style = serde_json::from_str(json).map_err(|err| {
        BooklistError::configuration(format!("style {name:?} cannot be loaded: {err}"))
    })?;
    Ok(style)
}

pub fn save_style(storage: &Storage, style: &Style) -> Result<()> {
    let json = serde_json::to_string(style).map_err(anyhow::Error::from)?;
    storage.save_style_json(&style.name, &json)?;
    Ok(())
}

/// Built-in style names followed by stored ones not shadowing them.
pub fn style_names(storage: &Storage) -> Result<Vec<String>> {
    let mut names: Vec<String> = Style::builtin().into_iter().map(|style| style.name).collect();
    for name in storage.list_style_names()? {
        if !names.iter().any(|known| known.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Checks every column the style and the extra domains read from.
pub(crate) fn check_schema(
    storage: &Storage,
    style: &Style,
    domain_columns: &[&str],
) -> Result<()> {
    for level in &style.levels {
        for (table, column) in level.kind.source_columns() {
            if !storage.has_column(table, column)? {
                return Err(BooklistError::configuration(format!(
                    "style {:?} groups by {} but column {table}.{column} does not exist",
                    style.name, level.kind
                )));
            }
        }
    }
    for column in domain_columns {
        let known = is_column_name(column) && storage.has_column("books", column)?;
        if !known {
            return Err(BooklistError::configuration(format!(
                "required domain column books.{column} does not exist"
            )));
        }
    }
    Ok(())
}

fn is_column_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
