use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opacity of unselected marks while anything is selected.
pub const DIMMED_OPACITY: f64 = 0.2;

/// Countries picked by clicking marks in either view. Shared by the map
/// and the bar chart of one session, and untouched by filter changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    selected: BTreeSet<u32>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` if absent, removes it if present. Returns whether the id
    /// is selected afterwards.
    pub fn toggle(&mut self, id: u32) -> bool {
        if self.selected.remove(&id) {
            false
        } else {
            self.selected.insert(id);
            true
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.selected.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.selected.iter().copied()
    }

    /// The part of the selection that has a mark among `ids`. Selected
    /// countries without a mark keep their place in the full set but have
    /// no effect on rendering.
    pub fn visible_in<I>(&self, ids: I) -> SelectionState
    where
        I: IntoIterator<Item = u32>,
    {
        SelectionState {
            selected: ids.into_iter().filter(|id| self.contains(*id)).collect(),
        }
    }

    pub fn opacity_for(&self, id: u32) -> f64 {
        if self.is_empty() || self.contains(id) {
            1.0
        } else {
            DIMMED_OPACITY
        }
    }
}
