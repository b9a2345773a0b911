use emberfall_ecs::*;

/// Per-tick health regeneration, clamped to max. The dead stay dead.
#[derive(Debug, Default)]
pub struct RegenSystem;

impl System for RegenSystem {
    fn name(&self) -> &str {
        "regen"
    }

    fn access(&self) -> Access {
        Access::new().write(ComponentKind::Health)
    }

    fn run(&mut self, ctx: &SystemContext<'_>, _commands: &mut CommandBuffer) -> Result<(), SystemError> {
        let mut healths = ctx.write::<Health>()?;
        for id in ctx.query(ComponentMask::of(&[ComponentKind::Health]))? {
            if let Some(h) = healths.get_mut(id) {
                if !h.is_dead() && h.current < h.max {
                    h.current = (h.current + h.regen_per_tick).min(h.max);
                }
            }
        }
        Ok(())
    }
}
