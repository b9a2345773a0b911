//! Resumable path-search state carried inside `Brain`.
//!
//! The search algorithm lives in the AI crate; this is only the data, so it
//! can be stored per entity and dropped together with the component.

use crate::component::StateHash;
use emberfall_common::{Fnv1a, Tick, TileCoord};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Open-set entry. Ordering is `(f, h, tile)` so ties break on the
/// heuristic and then on tile coordinates, never on insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpenEntry {
    pub f: u32,
    pub h: u32,
    pub tile: TileCoord,
}

#[derive(Debug, Clone)]
pub struct SearchState {
    pub start: TileCoord,
    pub goal: TileCoord,
    pub open: BinaryHeap<Reverse<OpenEntry>>,
    pub g: HashMap<TileCoord, u32>,
    pub parent: HashMap<TileCoord, TileCoord>,
    pub closed: HashSet<TileCoord>,
    /// Closest node to the goal seen so far, by heuristic then cost.
    pub best: TileCoord,
    pub best_h: u32,
    pub expanded: u32,
    pub started_at: Tick,
}

impl SearchState {
    pub fn new(start: TileCoord, goal: TileCoord, tick: Tick) -> Self {
        let h = start.manhattan(goal);
        let mut open = BinaryHeap::new();
        open.push(Reverse(OpenEntry { f: h, h, tile: start }));
        let mut g = HashMap::new();
        g.insert(start, 0);
        Self {
            start,
            goal,
            open,
            g,
            parent: HashMap::new(),
            closed: HashSet::new(),
            best: start,
            best_h: h,
            expanded: 0,
            started_at: tick,
        }
    }

    /// Tiles from the start (exclusive) to `end` (inclusive).
    pub fn trace(&self, end: TileCoord) -> Vec<TileCoord> {
        let mut out = vec![end];
        let mut cur = end;
        while let Some(prev) = self.parent.get(&cur) {
            if *prev == self.start {
                break;
            }
            out.push(*prev);
            cur = *prev;
        }
        if end == self.start {
            out.clear();
        }
        out.reverse();
        out
    }
}

#[derive(Debug, Clone, Default)]
pub enum PathState {
    #[default]
    None,
    Searching(Box<SearchState>),
    Following {
        goal: TileCoord,
        waypoints: Vec<TileCoord>,
        next: usize,
    },
    Failed {
        goal: TileCoord,
        at: Tick,
    },
}

impl PathState {
    pub fn goal(&self) -> Option<TileCoord> {
        match self {
            PathState::None => None,
            PathState::Searching(s) => Some(s.goal),
            PathState::Following { goal, .. } | PathState::Failed { goal, .. } => Some(*goal),
        }
    }
}

impl StateHash for PathState {
    fn hash_state(&self, h: &mut Fnv1a) {
        match self {
            PathState::None => h.write_u8(0),
            PathState::Searching(s) => {
                h.write_u8(1);
                h.write_u32(s.goal.x as u32);
                h.write_u32(s.goal.y as u32);
                h.write_u32(s.expanded);
            }
            PathState::Following { goal, next, .. } => {
                h.write_u8(2);
                h.write_u32(goal.x as u32);
                h.write_u32(goal.y as u32);
                h.write_u64(*next as u64);
            }
            PathState::Failed { at, .. } => {
                h.write_u8(3);
                h.write_u64(*at);
            }
        }
    }
}
