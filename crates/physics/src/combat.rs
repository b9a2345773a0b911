use crate::config::PhysicsConfig;
use emberfall_ecs::*;
use glam::Vec2;

/// Resolves attack intents: melee strikes land immediately on the target's
/// `Health`; ranged attackers spawn a projectile.
pub struct CombatSystem {
    config: PhysicsConfig,
}

impl CombatSystem {
    pub fn new(config: PhysicsConfig) -> Self {
        Self { config }
    }
}

impl System for CombatSystem {
    fn name(&self) -> &str {
        "combat"
    }

    fn access(&self) -> Access {
        Access::new()
            .read(ComponentKind::Intent)
            .read(ComponentKind::Transform)
            .read(ComponentKind::Body)
            .write(ComponentKind::Health)
            .write(ComponentKind::Combat)
    }

    fn run(&mut self, ctx: &SystemContext<'_>, commands: &mut CommandBuffer) -> Result<(), SystemError> {
        let intents = ctx.read::<Intent>()?;
        let transforms = ctx.read::<Transform>()?;
        let bodies = ctx.read::<Body>()?;
        let mut healths = ctx.write::<Health>()?;
        let mut combats = ctx.write::<Combat>()?;

        let attackers: Vec<EntityId> = ctx
            .query(ComponentMask::of(&[
                ComponentKind::Intent,
                ComponentKind::Combat,
                ComponentKind::Transform,
            ]))?
            .collect();
        let targets: Vec<EntityId> = ctx
            .query(ComponentMask::of(&[
                ComponentKind::Health,
                ComponentKind::Transform,
                ComponentKind::Body,
            ]))?
            .collect();

        for id in attackers {
            let Some(intent) = intents.get(id).copied() else {
                continue;
            };
            if !intent.attack {
                continue;
            }
            if healths.get(id).is_some_and(|h| h.is_dead()) {
                continue;
            }
            let Some(combat) = combats.get(id).copied() else {
                continue;
            };
            if !combat.is_ready(ctx.tick) {
                continue;
            }
            let Some(me) = transforms.get(id).copied() else {
                continue;
            };
            let my_radius = bodies.get(id).map_or(0.0, |b| b.radius);

            let in_reach = |other: EntityId| -> Option<f32> {
                let t = transforms.get(other)?;
                let r = bodies.get(other).map_or(0.0, |b| b.radius);
                let gap = me.position.distance(t.position) - r - my_radius;
                (gap <= combat.reach).then_some(gap)
            };

            if combat.ranged {
                let aim = intent
                    .target
                    .and_then(|t| transforms.get(t))
                    .map(|t| (t.position - me.position).normalize_or_zero())
                    .filter(|d| *d != Vec2::ZERO)
                    .unwrap_or(me.facing);
                commands.spawn(
                    self.config.projectile_archetype,
                    ComponentSnapshot {
                        transform: Some(Transform {
                            position: me.position + aim * (my_radius + 0.2),
                            facing: aim,
                        }),
                        velocity: Some(Velocity {
                            linear: aim * combat.projectile_speed,
                        }),
                        projectile: Some(Projectile {
                            owner: Some(id),
                            damage: combat.damage,
                            ..Projectile::default()
                        }),
                        ..Default::default()
                    },
                );
            } else {
                // Explicit target if it is still valid, otherwise the
                // nearest body in front; ties go to the lower id.
                let target = intent
                    .target
                    .filter(|t| *t != id && targets.contains(t) && in_reach(*t).is_some())
                    .or_else(|| {
                        let mut best: Option<(f32, EntityId)> = None;
                        for other in &targets {
                            if *other == id {
                                continue;
                            }
                            let Some(gap) = in_reach(*other) else {
                                continue;
                            };
                            let ahead = transforms
                                .get(*other)
                                .is_some_and(|t| (t.position - me.position).dot(me.facing) >= 0.0);
                            if ahead && best.is_none_or(|(g, _)| gap < g) {
                                best = Some((gap, *other));
                            }
                        }
                        best.map(|(_, e)| e)
                    });
                let Some(target) = target else {
                    continue;
                };
                if let Some(h) = healths.get_mut(target) {
                    if h.is_dead() {
                        continue;
                    }
                    h.current = (h.current - combat.damage).max(0.0);
                    h.last_hit = Some(ctx.tick);
                    tracing::trace!(attacker = %id, %target, damage = combat.damage, "melee hit");
                    if h.is_dead() && !ctx.has(target, ComponentKind::NetworkId) {
                        commands.despawn(target);
                    }
                }
            }
            if let Some(c) = combats.get_mut(id) {
                c.ready_at = ctx.tick + c.cooldown_ticks as u64;
            }
        }
        Ok(())
    }
}
