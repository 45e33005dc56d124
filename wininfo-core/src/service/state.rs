use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::Category;

/// Lifecycle of one resource category.
///
/// `Uninitialized → Detecting → Idle ⇄ Detecting`, and any state may move to
/// the terminal `Deactivated`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CategoryState {
    Uninitialized,
    Detecting,
    Idle,
    Deactivated,
}

impl CategoryState {
    pub fn can_transition(self, to: CategoryState) -> bool {
        use CategoryState::*;
        matches!(
            (self, to),
            (Uninitialized, Detecting)
                | (Detecting, Idle)
                | (Idle, Detecting)
                | (Uninitialized | Detecting | Idle | Deactivated, Deactivated)
        )
    }
}

/// Shared view of every category's state.
#[derive(Clone, Default)]
pub struct StateTracker {
    states: Arc<RwLock<HashMap<Category, CategoryState>>>,
}

impl fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("StateTracker");
        for category in Category::ALL {
            debug.field(category.as_str(), &self.get(category));
        }
        debug.finish()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: Category) -> CategoryState {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .copied()
            .unwrap_or(CategoryState::Uninitialized)
    }

    /// Apply `to` if the transition is legal. Returns whether it was applied.
    pub fn transition(&self, category: Category, to: CategoryState) -> bool {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let from = states
            .get(&category)
            .copied()
            .unwrap_or(CategoryState::Uninitialized);
        if !from.can_transition(to) {
            trace!(%category, ?from, ?to, "state transition refused");
            return false;
        }
        states.insert(category, to);
        trace!(%category, ?from, ?to, "state transition");
        true
    }

    /// Enter `Detecting`; false once the category is deactivated.
    pub fn begin(&self, category: Category) -> bool {
        self.transition(category, CategoryState::Detecting)
    }

    /// Return to `Idle` after a pass (committed or not).
    pub fn finish(&self, category: Category) -> bool {
        self.transition(category, CategoryState::Idle)
    }

    pub fn deactivate_all(&self) {
        for category in Category::ALL {
            self.transition(category, CategoryState::Deactivated);
        }
    }

    pub fn is_deactivated(&self, category: Category) -> bool {
        self.get(category) == CategoryState::Deactivated
    }
}
