use std::sync::Arc;

use waitwith_core::engine::ResolutionEngine;
use waitwith_core::store::CountdownStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ResolutionEngine>,
    pub store: Arc<dyn CountdownStore>,
    /// "postgres" or "memory", reported by the health check
    pub store_kind: &'static str,
}

impl AppState {
    pub fn new(engine: ResolutionEngine, store_kind: &'static str) -> Self {
        let store = engine.store().clone();
        Self {
            engine: Arc::new(engine),
            store,
            store_kind,
        }
    }
}
