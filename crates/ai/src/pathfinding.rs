//! Budgeted, resumable A* over the tile grid.
//!
//! A search expands at most a fixed number of nodes per call and keeps its
//! open set in `SearchState`, so it can continue on the next tick. Only
//! active chunks are walkable; absent chunks read as solid, which bounds the
//! search to the loaded region.

use crate::config::AiConfig;
use emberfall_common::{Tick, TileCoord};
use emberfall_ecs::{Brain, PathState, SearchState};
use emberfall_physics::TerrainView;
use glam::Vec2;
use std::cmp::Reverse;

/// Result of one bounded expansion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    /// Tiles after the start up to and including the goal.
    Found(Vec<TileCoord>),
    /// The open set ran dry: no route exists inside the active region.
    Unreachable,
    /// The search hit its lifetime expansion cap.
    BudgetExhausted,
    /// Budget for this pass is spent; call again next tick.
    Pending,
}

/// Expands up to `budget` nodes. Returns the outcome and the number of
/// expansions spent.
pub fn expand_search(search: &mut SearchState, terrain: &TerrainView, budget: u32, max_total: u32) -> (PathOutcome, u32) {
    if search.start == search.goal {
        return (PathOutcome::Found(Vec::new()), 0);
    }
    if terrain.is_solid(search.goal) {
        return (PathOutcome::Unreachable, 0);
    }
    let mut used = 0;
    while used < budget {
        if search.expanded >= max_total {
            return (PathOutcome::BudgetExhausted, used);
        }
        let Some(Reverse(entry)) = search.open.pop() else {
            return (PathOutcome::Unreachable, used);
        };
        let tile = entry.tile;
        if search.closed.contains(&tile) {
            continue;
        }
        if tile == search.goal {
            return (PathOutcome::Found(search.trace(tile)), used);
        }
        search.closed.insert(tile);
        search.expanded += 1;
        used += 1;
        let g = search.g.get(&tile).copied().unwrap_or(0);
        if entry.h < search.best_h {
            search.best_h = entry.h;
            search.best = tile;
        }
        for next in tile.neighbors4() {
            if search.closed.contains(&next) || terrain.is_solid(next) {
                continue;
            }
            let ng = g + 1;
            if search.g.get(&next).is_some_and(|old| *old <= ng) {
                continue;
            }
            let h = next.manhattan(search.goal);
            search.g.insert(next, ng);
            search.parent.insert(next, tile);
            search.open.push(Reverse(emberfall_ecs::OpenEntry { f: ng + h, h, tile: next }));
        }
    }
    if search.open.is_empty() {
        return (PathOutcome::Unreachable, used);
    }
    (PathOutcome::Pending, used)
}

/// What the NPC should do this tick to approach a goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavOutcome {
    /// Unit direction to walk in.
    Moving(Vec2),
    Arrived,
    /// No route; the brain has entered its fallback window.
    Failed,
    /// The goal left the active region and the search was dropped.
    Abandoned,
}

const ARRIVE_RADIUS: f32 = 0.3;

/// Steers `brain` toward `goal`, starting, resuming or following a path as
/// needed. `budget` is the shared per-tick expansion pool and is debited.
pub fn navigate(
    brain: &mut Brain,
    position: Vec2,
    goal: Vec2,
    terrain: &TerrainView,
    tick: Tick,
    config: &AiConfig,
    budget: &mut u32,
) -> NavOutcome {
    let scale = terrain.scale();
    let here = scale.tile_of(position);
    let goal_tile = scale.tile_of(goal);

    if !terrain.is_active(scale.chunk_of_tile(goal_tile)) {
        if !matches!(brain.path, PathState::None) {
            tracing::debug!(goal = ?goal_tile, "goal chunk inactive, dropping path");
        }
        brain.path = PathState::None;
        return NavOutcome::Abandoned;
    }

    if here == goal_tile {
        brain.path = PathState::None;
        let d = goal - position;
        if d.length() <= ARRIVE_RADIUS {
            return NavOutcome::Arrived;
        }
        return NavOutcome::Moving(d.normalize_or_zero());
    }

    let keep = match &brain.path {
        PathState::None => false,
        PathState::Failed { goal, .. } => {
            if *goal == goal_tile && brain.is_recovering(tick) {
                return NavOutcome::Failed;
            }
            false
        }
        PathState::Searching(s) => s.goal.manhattan(goal_tile) <= config.repath_tiles,
        PathState::Following { goal, waypoints, next } => {
            goal.manhattan(goal_tile) <= config.repath_tiles
                && waypoints.get(*next..).is_some_and(|rest| rest.iter().all(|t| !terrain.is_solid(*t)))
        }
    };
    if !keep {
        brain.path = PathState::Searching(Box::new(SearchState::new(here, goal_tile, tick)));
    }

    if let PathState::Searching(search) = &mut brain.path {
        let allowance = config.expansions_per_tick.min(*budget);
        let (outcome, used) = expand_search(search, terrain, allowance, config.max_expansions);
        *budget -= used;
        match outcome {
            PathOutcome::Found(waypoints) => {
                let found_goal = search.goal;
                brain.path = PathState::Following {
                    goal: found_goal,
                    waypoints,
                    next: 0,
                };
            }
            PathOutcome::Unreachable | PathOutcome::BudgetExhausted => {
                tracing::debug!(goal = ?goal_tile, ?outcome, expanded = search.expanded, "path failed");
                let failed_goal = search.goal;
                brain.path = PathState::Failed {
                    goal: failed_goal,
                    at: tick,
                };
                brain.fallback_until = tick + config.fallback_ticks;
                return NavOutcome::Failed;
            }
            PathOutcome::Pending => {
                // Make progress toward the most promising node so far.
                let toward = scale.tile_center(search.best) - position;
                return NavOutcome::Moving(toward.normalize_or_zero());
            }
        }
    }

    if let PathState::Following { waypoints, next, .. } = &mut brain.path {
        while let Some(tile) = waypoints.get(*next) {
            if *tile == here || scale.tile_center(*tile).distance(position) <= ARRIVE_RADIUS {
                *next += 1;
            } else {
                break;
            }
        }
        let waypoint = waypoints.get(*next).map(|tile| scale.tile_center(*tile));
        return match waypoint {
            Some(center) => NavOutcome::Moving((center - position).normalize_or_zero()),
            None => {
                brain.path = PathState::None;
                NavOutcome::Moving((goal - position).normalize_or_zero())
            }
        };
    }
    NavOutcome::Moving(Vec2::ZERO)
}
