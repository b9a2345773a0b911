//! The closed set of component types.

use crate::column::Column;
use crate::entity::EntityId;
use crate::path::PathState;
use emberfall_common::{BehaviorId, ConnectionId, DetRng, Fnv1a, Tick};
use glam::Vec2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Tag for every component type the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentKind {
    Transform = 0,
    Velocity = 1,
    Health = 2,
    Brain = 3,
    Intent = 4,
    NetworkId = 5,
    Visual = 6,
    Body = 7,
    Combat = 8,
    Projectile = 9,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 10] = [
        ComponentKind::Transform,
        ComponentKind::Velocity,
        ComponentKind::Health,
        ComponentKind::Brain,
        ComponentKind::Intent,
        ComponentKind::NetworkId,
        ComponentKind::Visual,
        ComponentKind::Body,
        ComponentKind::Combat,
        ComponentKind::Projectile,
    ];

    #[inline]
    pub fn bit(self) -> u16 {
        1 << self as u8
    }
}

/// Bit set of component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ComponentMask(u16);

impl ComponentMask {
    pub const EMPTY: ComponentMask = ComponentMask(0);

    pub fn of(kinds: &[ComponentKind]) -> Self {
        kinds.iter().fold(Self::EMPTY, |m, k| m.with(*k))
    }

    #[must_use]
    pub fn with(self, kind: ComponentKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(self, kind: ComponentKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn contains_all(self, other: ComponentMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ComponentMask) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn union(self, other: ComponentMask) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn difference(self, other: ComponentMask) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn kinds(self) -> impl Iterator<Item = ComponentKind> {
        ComponentKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

/// Folds a component's simulation-relevant state into a state hash.
pub trait StateHash {
    fn hash_state(&self, h: &mut Fnv1a);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec2,
    /// Unit facing direction; kept when the entity stops.
    pub facing: Vec2,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            facing: Vec2::Y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    /// World units per second.
    pub linear: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
    pub regen_per_tick: f32,
    /// Tick of the most recent damage, if any.
    pub last_hit: Option<Tick>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            current: 100.0,
            max: 100.0,
            regen_per_tick: 0.0,
            last_hit: None,
        }
    }
}

impl Health {
    pub fn fraction(&self) -> f32 {
        if self.max > 0.0 {
            self.current / self.max
        } else {
            0.0
        }
    }

    pub fn is_dead(&self) -> bool {
        self.current <= 0.0
    }
}

/// Behavior mode an NPC is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiMode {
    #[default]
    Idle,
    Wander,
    Patrol,
    Chase,
    Attack,
    Flee,
    ReturnHome,
}

/// Per-NPC decision state. The behavior tree itself is shared; everything
/// an individual NPC remembers between ticks lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brain {
    pub behavior: BehaviorId,
    pub mode: AiMode,
    pub home: Vec2,
    #[serde(default)]
    pub patrol: Vec<Vec2>,
    #[serde(default)]
    pub patrol_index: u32,
    #[serde(default)]
    pub target: Option<EntityId>,
    #[serde(default)]
    pub rng: DetRng,
    /// The NPC idles instead of pathing until this tick after a failed search.
    #[serde(default)]
    pub fallback_until: Tick,
    #[serde(default)]
    pub wander_until: Tick,
    #[serde(default)]
    pub wander_dir: Vec2,
    #[serde(skip)]
    pub path: PathState,
}

impl Default for Brain {
    fn default() -> Self {
        Self {
            behavior: BehaviorId(0),
            mode: AiMode::Idle,
            home: Vec2::ZERO,
            patrol: Vec::new(),
            patrol_index: 0,
            target: None,
            rng: DetRng::default(),
            fallback_until: 0,
            wander_until: 0,
            wander_dir: Vec2::ZERO,
            path: PathState::default(),
        }
    }
}

impl Brain {
    pub fn is_recovering(&self, tick: Tick) -> bool {
        tick < self.fallback_until
    }
}

/// What an entity wants to do this tick. Written by input and AI, consumed
/// by movement and combat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Desired direction; zero or unit length.
    pub movement: Vec2,
    /// Fraction of `Body::speed` to move at, in `[0, 1]`.
    pub speed_scale: f32,
    pub attack: bool,
    pub target: Option<EntityId>,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            movement: Vec2::ZERO,
            speed_scale: 1.0,
            attack: false,
            target: None,
        }
    }
}

impl Intent {
    pub fn idle() -> Self {
        Self {
            speed_scale: 0.0,
            ..Self::default()
        }
    }

    pub fn walk(direction: Vec2, speed_scale: f32) -> Self {
        Self {
            movement: direction.normalize_or_zero(),
            speed_scale: speed_scale.clamp(0.0, 1.0),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkId {
    pub connection: ConnectionId,
}

impl Default for NetworkId {
    fn default() -> Self {
        Self {
            connection: ConnectionId(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnimationState {
    #[default]
    Idle,
    Walking,
    Running,
    Attacking,
    Hurt,
    Dead,
}

/// Draw layer, back to front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum RenderLayer {
    Ground,
    #[default]
    Actors,
    Projectiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Visual {
    pub animation: AnimationState,
    pub layer: RenderLayer,
}

/// Collision shape and locomotion limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub radius: f32,
    /// Maximum speed in world units per second.
    pub speed: f32,
    /// Solid bodies block each other and stop projectiles.
    pub solid: bool,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            radius: 0.4,
            speed: 4.0,
            solid: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Combat {
    pub damage: f32,
    pub reach: f32,
    pub cooldown_ticks: u32,
    pub ready_at: Tick,
    /// Ranged attackers fire a projectile instead of striking in reach.
    #[serde(default)]
    pub ranged: bool,
    #[serde(default)]
    pub projectile_speed: f32,
}

impl Default for Combat {
    fn default() -> Self {
        Self {
            damage: 10.0,
            reach: 1.2,
            cooldown_ticks: 30,
            ready_at: 0,
            ranged: false,
            projectile_speed: 0.0,
        }
    }
}

impl Combat {
    pub fn is_ready(&self, tick: Tick) -> bool {
        tick >= self.ready_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub owner: Option<EntityId>,
    pub remaining_ticks: u32,
    pub damage: f32,
}

impl Default for Projectile {
    fn default() -> Self {
        Self {
            owner: None,
            remaining_ticks: 60,
            damage: 5.0,
        }
    }
}

impl StateHash for Transform {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_vec2(self.position);
        h.write_vec2(self.facing);
    }
}

impl StateHash for Velocity {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_vec2(self.linear);
    }
}

impl StateHash for Health {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_f32(self.current);
        h.write_f32(self.max);
        h.write_f32(self.regen_per_tick);
        h.write_u64(self.last_hit.map_or(u64::MAX, |t| t));
    }
}

impl StateHash for Brain {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_u32(self.behavior.0 as u32);
        h.write_u8(self.mode as u8);
        h.write_vec2(self.home);
        h.write_u32(self.patrol_index);
        h.write_u64(self.target.map_or(u64::MAX, EntityId::to_raw));
        h.write_u64(self.rng.0);
        h.write_u64(self.fallback_until);
        h.write_u64(self.wander_until);
        h.write_vec2(self.wander_dir);
        self.path.hash_state(h);
    }
}

impl StateHash for Intent {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_vec2(self.movement);
        h.write_f32(self.speed_scale);
        h.write_u8(self.attack as u8);
        h.write_u64(self.target.map_or(u64::MAX, EntityId::to_raw));
    }
}

impl StateHash for NetworkId {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_u32(self.connection.0);
    }
}

impl StateHash for Visual {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_u8(self.animation as u8);
        h.write_u8(self.layer as u8);
    }
}

impl StateHash for Body {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_f32(self.radius);
        h.write_f32(self.speed);
        h.write_u8(self.solid as u8);
    }
}

impl StateHash for Combat {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_f32(self.damage);
        h.write_f32(self.reach);
        h.write_u32(self.cooldown_ticks);
        h.write_u64(self.ready_at);
        h.write_u8(self.ranged as u8);
        h.write_f32(self.projectile_speed);
    }
}

impl StateHash for Projectile {
    fn hash_state(&self, h: &mut Fnv1a) {
        h.write_u64(self.owner.map_or(u64::MAX, EntityId::to_raw));
        h.write_u32(self.remaining_ticks);
        h.write_f32(self.damage);
    }
}

/// A component type stored in its own column.
pub trait Component: StateHash + Clone + Send + Sync + 'static {
    const KIND: ComponentKind;

    fn column(columns: &Columns) -> &RwLock<Column<Self>>;
    fn column_mut(columns: &mut Columns) -> &mut RwLock<Column<Self>>;
    fn slot(snapshot: &ComponentSnapshot) -> Option<&Self>;
    fn slot_mut(snapshot: &mut ComponentSnapshot) -> &mut Option<Self>;
}

macro_rules! component_table {
    ($($ty:ident => $field:ident),* $(,)?) => {
        /// One optional value per component type. Used for archetype
        /// defaults, spawn overrides, persisted entities and captures.
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        pub struct ComponentSnapshot {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl ComponentSnapshot {
            pub fn mask(&self) -> ComponentMask {
                let mut mask = ComponentMask::EMPTY;
                $(
                    if self.$field.is_some() {
                        mask = mask.with(ComponentKind::$ty);
                    }
                )*
                mask
            }

            /// Replaces every component that `other` carries.
            pub fn overlay(&mut self, other: ComponentSnapshot) {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            }
        }

        /// Column table of the component store.
        #[derive(Debug, Default)]
        pub struct Columns {
            $($field: RwLock<Column<$ty>>,)*
        }

        impl Columns {
            pub(crate) fn insert_snapshot(&mut self, id: EntityId, snapshot: ComponentSnapshot) {
                $(
                    if let Some(value) = snapshot.$field {
                        self.$field.get_mut().insert(id, value);
                    }
                )*
            }

            pub(crate) fn remove_all(&mut self, id: EntityId) -> ComponentSnapshot {
                ComponentSnapshot {
                    $($field: self.$field.get_mut().remove(id),)*
                }
            }

            pub(crate) fn capture(&self, id: EntityId) -> ComponentSnapshot {
                ComponentSnapshot {
                    $($field: self.$field.read().get(id).cloned(),)*
                }
            }

            pub(crate) fn mask_of(&self, id: EntityId) -> ComponentMask {
                let mut mask = ComponentMask::EMPTY;
                $(
                    if self.$field.read().contains(id) {
                        mask = mask.with(ComponentKind::$ty);
                    }
                )*
                mask
            }

            pub(crate) fn hash_entity(&self, id: EntityId, h: &mut Fnv1a) {
                $(
                    if let Some(value) = self.$field.read().get(id) {
                        h.write_u8(ComponentKind::$ty as u8);
                        value.hash_state(h);
                    }
                )*
            }

            /// Ids present in any column, with the kind they were found in.
            pub(crate) fn all_entries(&self) -> Vec<(EntityId, ComponentKind)> {
                let mut out = Vec::new();
                $(
                    out.extend(self.$field.read().ids().iter().map(|id| (*id, ComponentKind::$ty)));
                )*
                out
            }
        }

        $(
            impl Component for $ty {
                const KIND: ComponentKind = ComponentKind::$ty;

                fn column(columns: &Columns) -> &RwLock<Column<Self>> {
                    &columns.$field
                }

                fn column_mut(columns: &mut Columns) -> &mut RwLock<Column<Self>> {
                    &mut columns.$field
                }

                fn slot(snapshot: &ComponentSnapshot) -> Option<&Self> {
                    snapshot.$field.as_ref()
                }

                fn slot_mut(snapshot: &mut ComponentSnapshot) -> &mut Option<Self> {
                    &mut snapshot.$field
                }
            }
        )*
    };
}

component_table! {
    Transform => transform,
    Velocity => velocity,
    Health => health,
    Brain => brain,
    Intent => intent,
    NetworkId => network_id,
    Visual => visual,
    Body => body,
    Combat => combat,
    Projectile => projectile,
}
