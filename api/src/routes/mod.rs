pub mod chat;
pub mod countdowns;
pub mod health;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use waitwith_core::clock::FixedClock;
    use waitwith_core::engine::ResolutionEngine;
    use waitwith_core::planner::HeuristicPlanner;
    use waitwith_core::store::MemoryStore;
    use waitwith_core::testing::{ScriptedResolver, date};

    use crate::state::AppState;

    /// State over an in-memory store with today fixed at 2026-02-18.
    pub fn state(resolver: ScriptedResolver) -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = ResolutionEngine::new(
            store.clone(),
            Arc::new(resolver),
            Arc::new(HeuristicPlanner),
            Arc::new(FixedClock(date(2026, 2, 18))),
        );
        (AppState::new(engine, "memory"), store)
    }
}
