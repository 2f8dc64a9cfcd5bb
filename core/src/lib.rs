pub mod clock;
pub mod countdown;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod planner;
pub mod protocol;
pub mod query;
pub mod session;
pub mod store;
pub mod tool;
pub mod turn;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
