//! Mapping between absolute rows and the positions the list actually shows.

/// Sorted absolute positions of the currently visible rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionIndex {
    visible: Vec<usize>,
}

impl PositionIndex {
    pub fn from_flags(visible: &[bool]) -> Self {
        Self {
            visible: visible
                .iter()
                .enumerate()
                .filter(|(_, visible)| **visible)
                .map(|(position, _)| position)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn absolute_at(&self, position: usize) -> Option<usize> {
        self.visible.get(position).copied()
    }

    /// Visible position of `absolute`, or `None` while an ancestor is collapsed.
    pub fn position_of(&self, absolute: usize) -> Option<usize> {
        self.visible.binary_search(&absolute).ok()
    }

    /// Visible position of `absolute` or of the closest visible row above it.
    ///
    /// Rows are stored depth first, so for a hidden row this is the collapsed
    /// ancestor that hides it.
    pub fn nearest_visible(&self, absolute: usize) -> Option<usize> {
        match self.visible.binary_search(&absolute) {
            Ok(position) => Some(position),
            Err(0) => None,
            Err(insert_at) => Some(insert_at - 1),
        }
    }

    /// Replaces the visible entries within `first..=last` with `replacement`,
    /// which must be sorted and lie inside the same range.
    pub fn splice(&mut self, first: usize, last: usize, replacement: Vec<usize>) {
        debug_assert!(replacement.iter().all(|p| (first..=last).contains(p)));
        let start = self.visible.partition_point(|&p| p < first);
        let end = self.visible.partition_point(|&p| p <= last);
        self.visible.splice(start..end, replacement);
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.visible.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollTarget {
    pub position: usize,
    /// Whether the position is an occurrence of the marked book.
    pub mark_found: bool,
}

/// The candidate nearest to `previous_top`; ties go to the lower position.
pub fn closest_to(previous_top: usize, candidates: &[usize]) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .min_by_key(|&candidate| (candidate.abs_diff(previous_top), candidate))
}

pub fn clamp_top(previous_top: usize, count: usize) -> usize {
    previous_top.min(count.saturating_sub(1))
}
