use crate::terrain::TerrainView;
use emberfall_ecs::*;
use glam::Vec2;
use std::collections::HashMap;

/// Desired position after one step of `intent`, ignoring collisions.
///
/// Shared by the server and by client-side prediction so both integrate
/// identically.
pub fn integrate_intent(position: Vec2, intent: &Intent, body: &Body, dt: f32) -> Vec2 {
    let step = body.speed * intent.speed_scale.clamp(0.0, 1.0) * dt;
    position + intent.movement * step
}

/// Moves a circle from `from` toward `to`, one axis at a time, so that a
/// blocked axis slides along the other. Returns the resolved position.
pub fn resolve_against_terrain(terrain: &TerrainView, from: Vec2, to: Vec2, radius: f32) -> Vec2 {
    if terrain.circle_blocked(from, radius) {
        // Already embedded (e.g. spawned on a wall edge): allow moves that
        // free the body, otherwise stay.
        return if terrain.circle_blocked(to, radius) { from } else { to };
    }
    let mut pos = from;
    let try_x = Vec2::new(to.x, pos.y);
    if !terrain.circle_blocked(try_x, radius) {
        pos = try_x;
    }
    let try_y = Vec2::new(pos.x, to.y);
    if !terrain.circle_blocked(try_y, radius) {
        pos = try_y;
    }
    pos
}

type Cell = (i32, i32);

/// Uniform-grid broadphase over solid bodies, built once per tick.
struct Broadphase {
    cell: f32,
    buckets: HashMap<Cell, Vec<EntityId>>,
}

impl Broadphase {
    fn cell_of(&self, p: Vec2) -> Cell {
        ((p.x / self.cell).floor() as i32, (p.y / self.cell).floor() as i32)
    }

    fn insert(&mut self, id: EntityId, p: Vec2) {
        let c = self.cell_of(p);
        self.buckets.entry(c).or_default().push(id);
    }

    /// Candidates around `p`, ascending by id.
    fn near(&self, p: Vec2) -> Vec<EntityId> {
        let (cx, cy) = self.cell_of(p);
        let mut out = Vec::new();
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(ids) = self.buckets.get(&(cx + dx, cy + dy)) {
                    out.extend_from_slice(ids);
                }
            }
        }
        out.sort_unstable_by_key(|id| id.index());
        out
    }
}

fn overlaps(a: Vec2, ra: f32, b: Vec2, rb: f32) -> bool {
    let d = a - b;
    let r = ra + rb;
    d.x * d.x + d.y * d.y < r * r
}

/// Integrates intents and projectiles, resolving tile and body collisions.
pub struct MovementSystem {
    broadphase_cell: f32,
}

impl MovementSystem {
    pub fn new(broadphase_cell: f32) -> Self {
        Self { broadphase_cell }
    }
}

impl Default for MovementSystem {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl System for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn access(&self) -> Access {
        Access::new()
            .read(ComponentKind::Intent)
            .read(ComponentKind::Body)
            .read(ComponentKind::Health)
            .write(ComponentKind::Transform)
            .write(ComponentKind::Velocity)
            .write(ComponentKind::Projectile)
    }

    fn run(&mut self, ctx: &SystemContext<'_>, commands: &mut CommandBuffer) -> Result<(), SystemError> {
        let _span = tracing::debug_span!("movement", tick = ctx.tick).entered();
        let terrain = ctx
            .resource::<TerrainView>()
            .ok_or(SystemError::MissingResource("TerrainView"))?;
        let mut transforms = ctx.write::<Transform>()?;
        let mut velocities = ctx.write::<Velocity>()?;
        let mut projectiles = ctx.write::<Projectile>()?;
        let intents = ctx.read::<Intent>()?;
        let bodies = ctx.read::<Body>()?;
        let healths = ctx.read::<Health>()?;

        let movers: Vec<EntityId> = ctx
            .query(ComponentMask::of(&[ComponentKind::Transform, ComponentKind::Body]))?
            .collect();

        let mut broadphase = Broadphase {
            cell: self.broadphase_cell,
            buckets: HashMap::new(),
        };
        for id in &movers {
            if let (Some(t), Some(b)) = (transforms.get(*id), bodies.get(*id)) {
                if b.solid && !projectiles.contains(*id) {
                    broadphase.insert(*id, t.position);
                }
            }
        }

        for id in movers {
            let Some(body) = bodies.get(id).copied() else {
                continue;
            };
            let Some(from) = transforms.get(id).map(|t| t.position) else {
                continue;
            };

            if let Some(projectile) = projectiles.get_mut(id) {
                if projectile.remaining_ticks == 0 {
                    commands.despawn(id);
                    continue;
                }
                projectile.remaining_ticks -= 1;
                let owner = projectile.owner;
                let damage = projectile.damage;
                let linear = velocities.get(id).map_or(Vec2::ZERO, |v| v.linear);
                let to = from + linear * ctx.dt;
                if terrain.circle_blocked(to, body.radius) {
                    commands.despawn(id);
                    continue;
                }
                let hit = broadphase.near(to).into_iter().find(|other| {
                    *other != id
                        && Some(*other) != owner
                        && match (transforms.get(*other), bodies.get(*other)) {
                            (Some(t), Some(b)) => overlaps(to, body.radius, t.position, b.radius),
                            _ => false,
                        }
                });
                if let Some(target) = hit {
                    commands.damage(target, damage, owner);
                    commands.despawn(id);
                    continue;
                }
                if let Some(t) = transforms.get_mut(id) {
                    t.position = to;
                }
                continue;
            }

            let intent = intents.get(id).copied().unwrap_or_else(Intent::idle);
            let dead = healths.get(id).is_some_and(|h| h.is_dead());
            let desired = if dead || body.speed <= 0.0 {
                from
            } else {
                integrate_intent(from, &intent, &body, ctx.dt)
            };
            let mut to = resolve_against_terrain(terrain, from, desired, body.radius);

            if body.solid && to != from {
                let blocked_by = |p: Vec2| {
                    broadphase.near(p).into_iter().any(|other| {
                        if other == id {
                            return false;
                        }
                        match (transforms.get(other), bodies.get(other)) {
                            // Only block moves that deepen an overlap, so
                            // bodies spawned overlapping can separate.
                            (Some(t), Some(b)) if b.solid => {
                                overlaps(p, body.radius, t.position, b.radius)
                                    && p.distance_squared(t.position) < from.distance_squared(t.position)
                            }
                            _ => false,
                        }
                    })
                };
                if blocked_by(to) {
                    let slide_x = Vec2::new(to.x, from.y);
                    let slide_y = Vec2::new(from.x, to.y);
                    to = if slide_x != from && !blocked_by(slide_x) {
                        slide_x
                    } else if slide_y != from && !blocked_by(slide_y) {
                        slide_y
                    } else {
                        from
                    };
                }
            }

            if let Some(t) = transforms.get_mut(id) {
                t.position = to;
                if !dead && intent.movement != Vec2::ZERO {
                    t.facing = intent.movement;
                }
            }
            if let Some(v) = velocities.get_mut(id) {
                v.linear = if ctx.dt > 0.0 { (to - from) / ctx.dt } else { Vec2::ZERO };
            }
        }
        Ok(())
    }
}
