//! Staged system execution.
//!
//! Systems are grouped into stages from their declared access sets. A
//! system's stage is one past the latest stage of any earlier system it
//! conflicts with, so conflicting systems keep their declaration order and
//! systems sharing a stage never touch the same column mutably.

use emberfall_common::Tick;
use emberfall_ecs::{CommandBuffer, ComponentStore, Resources, System, SystemContext};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run multi-system stages on scoped worker threads.
    pub parallel: bool,
    /// Most ticks run back to back when the host falls behind.
    pub max_catch_up_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_catch_up_ticks: 5,
        }
    }
}

/// A system that failed or panicked during a tick. Its commands for that
/// tick are discarded; the rest of the tick runs normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFault {
    pub system: String,
    pub message: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub faults: Vec<SystemFault>,
    pub commands: usize,
    pub elapsed: Duration,
}

pub struct Scheduler {
    systems: Vec<Box<dyn System>>,
    stage_of: Vec<usize>,
    stages: Vec<Vec<usize>>,
    parallel: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stages", &self.stage_names())
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl Scheduler {
    pub fn new(systems: Vec<Box<dyn System>>, config: &SchedulerConfig) -> Self {
        let accesses: Vec<_> = systems.iter().map(|s| s.access()).collect();
        let mut stage_of = Vec::with_capacity(systems.len());
        for (i, access) in accesses.iter().enumerate() {
            let stage = (0..i)
                .filter(|&j| accesses[j].conflicts_with(access))
                .map(|j| stage_of[j] + 1)
                .max()
                .unwrap_or(0);
            stage_of.push(stage);
        }
        let count = stage_of.iter().max().map_or(0, |m| m + 1);
        let mut stages = vec![Vec::new(); count];
        for (i, &s) in stage_of.iter().enumerate() {
            stages[s].push(i);
        }
        let scheduler = Self {
            systems,
            stage_of,
            stages,
            parallel: config.parallel,
        };
        debug!(stages = ?scheduler.stage_names(), "scheduler built");
        scheduler
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// System names per stage, in execution order.
    pub fn stage_names(&self) -> Vec<Vec<String>> {
        self.stages
            .iter()
            .map(|stage| stage.iter().map(|&i| self.systems[i].name().to_string()).collect())
            .collect()
    }

    pub fn stage_of(&self, name: &str) -> Option<usize> {
        self.systems.iter().position(|s| s.name() == name).map(|i| self.stage_of[i])
    }

    /// Runs every system once. Returns the merged commands in declaration
    /// order, ready to be applied by the caller.
    pub fn run(&mut self, store: &ComponentStore, resources: &Resources, tick: Tick, dt: f32) -> (CommandBuffer, StageReport) {
        let started = Instant::now();
        let mut buffers: Vec<CommandBuffer> = (0..self.systems.len()).map(|_| CommandBuffer::new()).collect();
        let mut faults: Vec<(usize, SystemFault)> = Vec::new();

        for stage in 0..self.stages.len() {
            let jobs: Vec<(usize, &mut Box<dyn System>, &mut CommandBuffer)> = self
                .systems
                .iter_mut()
                .zip(buffers.iter_mut())
                .enumerate()
                .filter(|(i, _)| self.stage_of[*i] == stage)
                .map(|(i, (system, buffer))| (i, system, buffer))
                .collect();

            if !self.parallel || jobs.len() < 2 {
                for (i, system, buffer) in jobs {
                    if let Some(fault) = run_system(system.as_mut(), store, resources, tick, dt, buffer) {
                        faults.push((i, fault));
                    }
                }
                continue;
            }

            std::thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .into_iter()
                    .map(|(i, system, buffer)| {
                        let name = system.name().to_string();
                        let handle = scope.spawn(move || run_system(system.as_mut(), store, resources, tick, dt, buffer));
                        (i, name, handle)
                    })
                    .collect();
                for (i, name, handle) in handles {
                    match handle.join() {
                        Ok(Some(fault)) => faults.push((i, fault)),
                        Ok(None) => {}
                        Err(_) => faults.push((
                            i,
                            SystemFault {
                                system: name,
                                message: "worker thread died".into(),
                                panicked: true,
                            },
                        )),
                    }
                }
            });
        }

        faults.sort_by_key(|(i, _)| *i);
        let mut merged = CommandBuffer::new();
        for (i, buffer) in buffers.iter_mut().enumerate() {
            if faults.iter().any(|(f, _)| *f == i) {
                continue;
            }
            merged.append(buffer);
        }
        let report = StageReport {
            faults: faults.into_iter().map(|(_, f)| f).collect(),
            commands: merged.len(),
            elapsed: started.elapsed(),
        };
        (merged, report)
    }
}

/// Runs one system behind a panic boundary.
fn run_system(
    system: &mut dyn System,
    store: &ComponentStore,
    resources: &Resources,
    tick: Tick,
    dt: f32,
    buffer: &mut CommandBuffer,
) -> Option<SystemFault> {
    let name = system.name().to_string();
    let ctx = SystemContext::new(store, resources, system.access(), &name, tick, dt);
    let outcome = catch_unwind(AssertUnwindSafe(|| system.run(&ctx, buffer)));
    let (message, panicked) = match outcome {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => (e.to_string(), false),
        Err(payload) => (panic_message(payload.as_ref()), true),
    };
    error!(system = %name, tick, panicked, %message, "system fault");
    Some(SystemFault {
        system: name,
        message,
        panicked,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_common::ArchetypeId;
    use emberfall_ecs::*;

    const DUMMY: ArchetypeId = ArchetypeId(0);

    fn store_with(n: usize) -> (ComponentStore, Vec<EntityId>) {
        let mut s = ComponentStore::new();
        s.register_archetype(ArchetypeTemplate {
            id: DUMMY,
            name: "dummy".into(),
            kind: ArchetypeKind::Prop,
            defaults: ComponentSnapshot {
                transform: Some(Transform::default()),
                health: Some(Health {
                    current: 1.0,
                    ..Health::default()
                }),
                visual: Some(Visual::default()),
                ..Default::default()
            },
        })
        .unwrap();
        let ids = (0..n).map(|_| s.spawn(DUMMY).unwrap()).collect();
        (s, ids)
    }

    /// Applies `f` to every health value.
    struct HealthOp {
        name: &'static str,
        f: fn(f32) -> f32,
    }

    impl System for HealthOp {
        fn name(&self) -> &str {
            self.name
        }

        fn access(&self) -> Access {
            Access::new().write(ComponentKind::Health)
        }

        fn run(&mut self, ctx: &SystemContext<'_>, _commands: &mut CommandBuffer) -> Result<(), SystemError> {
            let mut healths = ctx.write::<Health>()?;
            for id in ctx.query(ComponentMask::of(&[ComponentKind::Health]))? {
                if let Some(h) = healths.get_mut(id) {
                    h.current = (self.f)(h.current);
                }
            }
            Ok(())
        }
    }

    /// Reads transforms and records one despawn command per entity.
    struct Reaper;

    impl System for Reaper {
        fn name(&self) -> &str {
            "reaper"
        }

        fn access(&self) -> Access {
            Access::new().read(ComponentKind::Transform)
        }

        fn run(&mut self, ctx: &SystemContext<'_>, commands: &mut CommandBuffer) -> Result<(), SystemError> {
            for id in ctx.query(ComponentMask::of(&[ComponentKind::Transform]))? {
                commands.despawn(id);
            }
            Ok(())
        }
    }

    struct Panics;

    impl System for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn access(&self) -> Access {
            Access::new().read(ComponentKind::Visual)
        }

        fn run(&mut self, _ctx: &SystemContext<'_>, commands: &mut CommandBuffer) -> Result<(), SystemError> {
            commands.despawn(EntityId::new(0, 0));
            panic!("boom");
        }
    }

    /// Declares only Visual but writes Health.
    struct Sneaky;

    impl System for Sneaky {
        fn name(&self) -> &str {
            "sneaky"
        }

        fn access(&self) -> Access {
            Access::new().read(ComponentKind::Visual)
        }

        fn run(&mut self, ctx: &SystemContext<'_>, _commands: &mut CommandBuffer) -> Result<(), SystemError> {
            ctx.write::<Health>()?;
            Ok(())
        }
    }

    fn parallel() -> SchedulerConfig {
        SchedulerConfig {
            parallel: true,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn health_writers_run_in_declaration_order() {
        for _ in 0..20 {
            let (store, ids) = store_with(8);
            let mut scheduler = Scheduler::new(
                vec![
                    Box::new(HealthOp {
                        name: "set",
                        f: |_| 10.0,
                    }),
                    Box::new(Reaper),
                    Box::new(HealthOp {
                        name: "double",
                        f: |h| h * 2.0,
                    }),
                ],
                &parallel(),
            );
            assert_eq!(scheduler.stage_of("set"), Some(0));
            assert_eq!(scheduler.stage_of("reaper"), Some(0));
            assert_eq!(scheduler.stage_of("double"), Some(1));
            let (commands, report) = scheduler.run(&store, &Resources::new(), 1, 0.05);
            assert!(report.faults.is_empty());
            assert_eq!(commands.len(), 8);
            for id in &ids {
                assert_eq!(store.get::<Health>(*id).unwrap().current, 20.0);
            }
        }
    }

    #[test]
    fn panicking_system_is_contained() {
        let (store, ids) = store_with(2);
        let mut scheduler = Scheduler::new(
            vec![
                Box::new(Panics),
                Box::new(HealthOp {
                    name: "heal",
                    f: |h| h + 1.0,
                }),
            ],
            &parallel(),
        );
        assert_eq!(scheduler.stage_count(), 1);
        let (commands, report) = scheduler.run(&store, &Resources::new(), 3, 0.05);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].system, "panics");
        assert!(report.faults[0].panicked);
        assert!(report.faults[0].message.contains("boom"));
        // The faulted system's commands are discarded.
        assert!(commands.is_empty());
        assert_eq!(store.get::<Health>(ids[0]).unwrap().current, 2.0);
    }

    #[test]
    fn undeclared_access_is_a_fault() {
        let (store, _) = store_with(1);
        let mut scheduler = Scheduler::new(
            vec![Box::new(Sneaky)],
            &SchedulerConfig {
                parallel: false,
                ..SchedulerConfig::default()
            },
        );
        let (_, report) = scheduler.run(&store, &Resources::new(), 1, 0.05);
        assert_eq!(report.faults.len(), 1);
        assert!(!report.faults[0].panicked);
        assert!(report.faults[0].message.contains("without declaring"));
    }

    #[test]
    fn merged_commands_follow_declaration_order_not_timing() {
        let (store, ids) = store_with(3);
        struct Tagger(&'static str, ComponentKind);
        impl System for Tagger {
            fn name(&self) -> &str {
                self.0
            }
            fn access(&self) -> Access {
                Access::new().read(self.1)
            }
            fn run(&mut self, ctx: &SystemContext<'_>, commands: &mut CommandBuffer) -> Result<(), SystemError> {
                let ids: Vec<EntityId> = ctx.query(ComponentMask::of(&[self.1]))?.collect();
                if self.0 == "first" {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    commands.despawn(ids[0]);
                } else {
                    commands.despawn(ids[2]);
                }
                Ok(())
            }
        }
        let mut scheduler = Scheduler::new(
            vec![
                Box::new(Tagger("first", ComponentKind::Transform)),
                Box::new(Tagger("second", ComponentKind::Visual)),
            ],
            &parallel(),
        );
        let (commands, _) = scheduler.run(&store, &Resources::new(), 1, 0.05);
        let order: Vec<EntityId> = commands
            .iter()
            .filter_map(|c| match c {
                Command::Despawn(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![ids[0], ids[2]]);
    }
}
