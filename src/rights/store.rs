use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::case::{CaseId, RightsCase};

/// Durable home of rights-case state.
///
/// Per-subtask completion is persisted here so that a retried case only
/// re-invokes subtasks that have not succeeded. The in-memory implementation
/// is the default; a database-backed one plugs in behind the same trait.
pub trait CaseStore: Send + Sync {
    fn insert(&self, case: RightsCase);

    /// Snapshot of a case, if known.
    fn get(&self, id: CaseId) -> Option<RightsCase>;

    /// Apply a mutation to a stored case. Returns false when unknown.
    fn update(&self, id: CaseId, mutate: &mut dyn FnMut(&mut RightsCase)) -> bool;
}

/// In-memory case store.
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    cases: RwLock<HashMap<CaseId, RightsCase>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        MemoryCaseStore::default()
    }

    pub fn len(&self) -> usize {
        self.cases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.read().is_empty()
    }
}

impl CaseStore for MemoryCaseStore {
    fn insert(&self, case: RightsCase) {
        self.cases.write().insert(case.id, case);
    }

    fn get(&self, id: CaseId) -> Option<RightsCase> {
        self.cases.read().get(&id).cloned()
    }

    fn update(&self, id: CaseId, mutate: &mut dyn FnMut(&mut RightsCase)) -> bool {
        let mut cases = self.cases.write();
        match cases.get_mut(&id) {
            Some(case) => {
                mutate(case);
                true
            }
            None => false,
        }
    }
}
