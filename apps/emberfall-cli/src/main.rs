use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use emberfall_common::DetRng;
use emberfall_kernel::{FixedStepper, SimConfig, Simulation};
use emberfall_net::{ClientLink, ClientSync};
use emberfall_render::{DebugTextRenderer, RenderView, Renderer};
use glam::Vec2;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emberfall", about = "Headless emberfall simulation driver")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Simulation config (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Print the effective configuration as JSON
    Config,
    /// Run the simulation with scripted players
    Run {
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "600")]
        ticks: u64,
        /// Scripted players to connect
        #[arg(short, long, default_value = "2")]
        players: u32,
        /// Seed for the scripted inputs
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Pace ticks against the wall clock instead of running flat out
        #[arg(long)]
        realtime: bool,
    },
    /// Run the same script twice and compare state hashes tick by tick
    Determinism {
        #[arg(short, long, default_value = "300")]
        ticks: u64,
        #[arg(short, long, default_value = "2")]
        players: u32,
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Run, then print the visual frame around the first player
    Frame {
        #[arg(short, long, default_value = "40")]
        ticks: u64,
        #[arg(short, long, default_value = "7")]
        seed: u64,
    },
}

/// A connected client fed by a seeded random walk.
struct Bot {
    client: ClientSync,
    link: ClientLink,
    rng: DetRng,
    heading: Vec2,
}

impl Bot {
    fn step(&mut self, tick: u64) -> anyhow::Result<()> {
        if tick % 20 == 0 {
            let angle = self.rng.unit_f32() * std::f32::consts::TAU;
            self.heading = Vec2::from_angle(angle);
        }
        let attack = self.rng.below(12) == 0;
        self.client.predict(self.heading, attack);
        self.link.send(&self.client.outgoing())?;
        Ok(())
    }

    fn receive(&mut self) {
        for message in self.link.poll() {
            if let Err(e) = self.client.handle(message) {
                warn!(error = %e, "client resync");
            }
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimConfig> {
    match path {
        Some(path) => SimConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(SimConfig::default()),
    }
}

fn init_logging(verbose: bool, config: &SimConfig) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn spawn_point(scale: emberfall_common::WorldScale, n: u32) -> Vec2 {
    let centre = Vec2::splat(scale.chunk_extent() * 0.5);
    centre + Vec2::new(n as f32 * 2.0, 0.0)
}

fn connect_bots(sim: &mut Simulation, players: u32, seed: u64) -> anyhow::Result<Vec<Bot>> {
    let scale = sim.catalog().scale();
    let mut bots = Vec::new();
    for n in 0..players {
        let (_, mut link) = sim.connect(spawn_point(scale, n))?;
        let mut client = ClientSync::new(sim.config().net.clone());
        for message in link.poll() {
            client.handle(message)?;
        }
        bots.push(Bot {
            client,
            link,
            rng: DetRng::new(seed.wrapping_add(n as u64)),
            heading: Vec2::ZERO,
        });
    }
    if !sim.warm_up(Duration::from_secs(10))? {
        warn!("chunks still loading after warm-up");
    }
    Ok(bots)
}

fn step(sim: &mut Simulation, bots: &mut [Bot]) -> anyhow::Result<()> {
    let tick = sim.current_tick();
    for bot in bots.iter_mut() {
        bot.step(tick)?;
    }
    let report = sim.tick()?;
    for fault in &report.faults {
        warn!(tick = report.tick, system = %fault.system, message = %fault.message, "system fault");
    }
    for bot in bots.iter_mut() {
        bot.receive();
    }
    Ok(())
}

fn scripted_hashes(config: SimConfig, ticks: u64, players: u32, seed: u64) -> anyhow::Result<Vec<u64>> {
    let mut sim = Simulation::from_config(config)?;
    let mut bots = connect_bots(&mut sim, players, seed)?;
    let mut hashes = Vec::with_capacity(ticks as usize);
    for _ in 0..ticks {
        step(&mut sim, &mut bots)?;
        hashes.push(sim.state_hash());
    }
    sim.shutdown(Duration::from_secs(10))?;
    Ok(hashes)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Info => {
            println!("emberfall v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", emberfall_common::crate_info());
            println!("ecs: {}", emberfall_ecs::crate_info());
            println!("assets: {}", emberfall_assets::crate_info());
            println!("persist: {}", emberfall_persist::crate_info());
            println!("physics: {}", emberfall_physics::crate_info());
            println!("ai: {}", emberfall_ai::crate_info());
            println!("stream: {}", emberfall_stream::crate_info());
            println!("net: {}", emberfall_net::crate_info());
            println!("render: {}", emberfall_render::crate_info());
            println!("kernel: {}", emberfall_kernel::crate_info());
        }
        Commands::Config => {
            println!("{}", config.to_json()?);
        }
        Commands::Run {
            ticks,
            players,
            seed,
            realtime,
        } => {
            let mut sim = Simulation::from_config(config)?;
            let mut bots = connect_bots(&mut sim, players, seed)?;
            let started = Instant::now();
            if realtime {
                let step_len = Duration::from_secs_f32(sim.config().dt);
                let mut stepper = FixedStepper::new(step_len, sim.config().scheduler.max_catch_up_ticks);
                let mut last = Instant::now();
                while sim.current_tick() < ticks {
                    let now = Instant::now();
                    let due = stepper.advance(now - last);
                    last = now;
                    for _ in 0..due {
                        step(&mut sim, &mut bots)?;
                    }
                    std::thread::sleep(stepper.until_next());
                }
                if stepper.dropped_steps() > 0 {
                    warn!(dropped = stepper.dropped_steps(), "fell behind real time");
                }
            } else {
                for _ in 0..ticks {
                    step(&mut sim, &mut bots)?;
                }
            }
            let elapsed = started.elapsed();
            let stats = sim.streamer().stats().clone();
            info!(
                ticks = sim.current_tick(),
                entities = sim.store().len(),
                active_chunks = stats.active,
                hash = format_args!("{:#018x}", sim.state_hash()),
                ms_per_tick = elapsed.as_secs_f64() * 1000.0 / ticks.max(1) as f64,
                "run finished"
            );
            for bot in &bots {
                info!(
                    entity = ?bot.client.local_entity(),
                    corrections = bot.client.corrections(),
                    desyncs = bot.client.desyncs(),
                    "client summary"
                );
            }
            let saved = sim.shutdown(Duration::from_secs(10))?;
            if !saved {
                bail!("chunk saves did not finish before shutdown timeout");
            }
        }
        Commands::Determinism { ticks, players, seed } => {
            let mut serial = config.clone();
            serial.stream.io_workers = 0;
            serial.scheduler.parallel = false;
            let mut parallel = serial.clone();
            parallel.scheduler.parallel = true;

            let a = scripted_hashes(serial, ticks, players, seed)?;
            let b = scripted_hashes(parallel, ticks, players, seed)?;
            match a.iter().zip(&b).position(|(x, y)| x != y) {
                Some(i) => bail!("state diverged at tick {}: {:#x} vs {:#x}", i + 1, a[i], b[i]),
                None => println!(
                    "OK: {ticks} ticks, final hash {:#018x}",
                    a.last().copied().unwrap_or_default()
                ),
            }
        }
        Commands::Frame { ticks, seed } => {
            let mut sim = Simulation::from_config(config)?;
            let mut bots = connect_bots(&mut sim, 1, seed)?;
            for _ in 0..ticks {
                step(&mut sim, &mut bots)?;
            }
            let centre = bots
                .first()
                .and_then(|b| b.client.predicted_position())
                .unwrap_or(Vec2::ZERO);
            let frame = sim.latest_frame();
            print!("{}", DebugTextRenderer.render(&frame, &RenderView::centered_on(centre)));
        }
    }

    Ok(())
}
