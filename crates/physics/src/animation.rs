use crate::config::PhysicsConfig;
use emberfall_common::Tick;
use emberfall_ecs::*;

/// Animation state derived from what an entity is doing this tick.
pub fn animation_for(
    tick: Tick,
    speed: f32,
    max_speed: f32,
    intent: Option<&Intent>,
    health: Option<&Health>,
    config: &PhysicsConfig,
) -> AnimationState {
    if let Some(h) = health {
        if h.is_dead() {
            return AnimationState::Dead;
        }
        if h.last_hit.is_some_and(|t| tick.saturating_sub(t) < config.hurt_ticks) {
            return AnimationState::Hurt;
        }
    }
    if intent.is_some_and(|i| i.attack) {
        return AnimationState::Attacking;
    }
    if speed > 0.01 {
        if max_speed > 0.0 && speed > max_speed * config.run_fraction {
            AnimationState::Running
        } else {
            AnimationState::Walking
        }
    } else {
        AnimationState::Idle
    }
}

pub struct AnimationSystem {
    config: PhysicsConfig,
}

impl AnimationSystem {
    pub fn new(config: PhysicsConfig) -> Self {
        Self { config }
    }
}

impl System for AnimationSystem {
    fn name(&self) -> &str {
        "animation"
    }

    fn access(&self) -> Access {
        Access::new()
            .read(ComponentKind::Velocity)
            .read(ComponentKind::Intent)
            .read(ComponentKind::Health)
            .read(ComponentKind::Body)
            .write(ComponentKind::Visual)
    }

    fn run(&mut self, ctx: &SystemContext<'_>, _commands: &mut CommandBuffer) -> Result<(), SystemError> {
        let velocities = ctx.read::<Velocity>()?;
        let intents = ctx.read::<Intent>()?;
        let healths = ctx.read::<Health>()?;
        let bodies = ctx.read::<Body>()?;
        let mut visuals = ctx.write::<Visual>()?;

        for id in ctx.query(ComponentMask::of(&[ComponentKind::Visual]))? {
            let speed = velocities.get(id).map_or(0.0, |v| v.linear.length());
            let max_speed = bodies.get(id).map_or(0.0, |b| b.speed);
            let state = animation_for(
                ctx.tick,
                speed,
                max_speed,
                intents.get(id),
                healths.get(id),
                &self.config,
            );
            if let Some(v) = visuals.get_mut(id) {
                v.animation = state;
            }
        }
        Ok(())
    }
}
