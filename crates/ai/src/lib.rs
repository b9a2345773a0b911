//! NPC decision making.
//!
//! Behavior trees are plain tagged enums shared per archetype; everything
//! an individual NPC remembers between ticks, including an in-progress path
//! search, lives in its `Brain` component. Each NPC gets one synchronous,
//! non-blocking pass per tick and path searches are budgeted and resumable.
//!
//! # Invariants
//! - An unreachable goal is a normal outcome, never an error.
//! - Evaluation order is ascending entity id; ties in targeting break on id.

mod behavior;
mod config;
mod pathfinding;
mod system;

pub use behavior::{ActionLeaf, BehaviorLibrary, BehaviorNode, Condition, Status};
pub use config::AiConfig;
pub use pathfinding::{NavOutcome, PathOutcome, expand_search, navigate};
pub use system::AiSystem;

pub fn crate_info() -> &'static str {
    "emberfall-ai v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("ai"));
    }
}
