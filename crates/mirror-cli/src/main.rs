use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mirror_core::{
    bucket_key, Action, AstroField, Clock, FeedbackCycle, FieldHeuristic, FieldSampler,
    FieldState, ManualClock, MirrorConfig, MirrorLoop, OptOutSet, PolicySource, SystemClock,
    TimeRange, Tone,
};

#[derive(Parser)]
#[command(name = "mirror-cli", about = "Drive the mirror loop against a simulated field")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run feedback cycles against a simulated crowd and print what was learned.
    Simulate {
        #[arg(long, default_value_t = 500)]
        cycles: u32,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Start of simulated time; defaults to the wall clock.
        #[arg(long)]
        start_ms: Option<i64>,
        /// Users 0..N cycle through the loop; every Nth user is opted out.
        #[arg(long, default_value_t = 10)]
        users: u32,
    },
    /// Print the default configuration as TOML.
    DefaultConfig {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Validate a configuration file (with MIRROR_ env overrides applied).
    CheckConfig { path: PathBuf },
    /// Show the bucket key for a context.
    Bucket {
        #[arg(long)]
        ts_ms: i64,
        #[arg(long)]
        connected: u32,
        #[arg(long, num_args = 3, value_delimiter = ',')]
        pad: Vec<f64>,
    },
}

fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(d) = "mirror_core=info".parse() {
        filter = filter.add_directive(d);
    }
    fmt().with_env_filter(filter).init();
}

// ============================================================================
// Simulated crowd
// ============================================================================

/// Crowd whose mood drifts randomly and leans toward the last feedback tone.
struct SimulatedField {
    clock: Arc<ManualClock>,
    state: Mutex<SimState>,
}

struct SimState {
    field: AstroField,
    rng: StdRng,
    pending: Option<Action>,
}

impl SimulatedField {
    fn new(clock: Arc<ManualClock>, seed: u64) -> Self {
        Self {
            clock,
            state: Mutex::new(SimState {
                field: AstroField::default(),
                rng: StdRng::seed_from_u64(seed ^ 0x5eed),
                pending: None,
            }),
        }
    }

    fn deliver(&self, action: &Action) {
        self.state.lock().pending = Some(action.clone());
    }
}

impl FieldSampler for SimulatedField {
    fn sample(&self) -> FieldState {
        self.clock.advance(1_000);
        let now = self.clock.now_ms();
        let mut st = self.state.lock();

        let mut pad = [0.5, 0.4, 0.45];
        for p in pad.iter_mut() {
            *p += st.rng.gen_range(-0.3..0.3);
        }
        // warm feedback lifts pleasure, cool lifts dominance
        if let Some(action) = st.pending.take() {
            let k = action.intensity;
            match action.tone {
                Tone::Warm => {
                    pad[0] += 0.35 * k;
                    pad[2] += 0.1 * k;
                }
                Tone::Cool => {
                    pad[0] += 0.1 * k;
                    pad[2] += 0.2 * k;
                }
                Tone::Neutral => {}
            }
        }

        let connected = st.rng.gen_range(5..90);
        st.field.set_connected(connected);
        st.field.integrate(pad, now)
    }
}

// ============================================================================
// Commands
// ============================================================================

fn simulate(
    cycles: u32,
    seed: u64,
    config: Option<PathBuf>,
    start_ms: Option<i64>,
    users: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = match config {
        Some(path) => MirrorConfig::from_file_with_env(path)?,
        None => MirrorConfig::load_layered(None, None)?,
    };
    cfg.selector.seed = Some(seed);

    let start = start_ms.unwrap_or_else(|| SystemClock.now_ms());
    let clock = Arc::new(ManualClock::new(start));
    let mirror = Arc::new(MirrorLoop::with_clock(cfg, clock.clone())?);
    let world = Arc::new(SimulatedField::new(clock.clone(), seed));

    let sink = Arc::clone(&world);
    let opt_out = Arc::new(OptOutSet::new());
    let users = users.max(1);
    if users > 1 {
        opt_out.opt_out(format!("user-{}", users - 1));
    }
    let cycle = FeedbackCycle::new(
        Arc::clone(&mirror),
        world,
        Arc::new(FieldHeuristic),
        Arc::new(move |a: &Action| sink.deliver(a)),
    )
    .with_opt_out(opt_out);

    info!("simulating {} cycles from t={}ms", cycles, start);
    let mut recorded = 0u32;
    let mut sources = [0u32; 3];
    let mut passes = 0u32;
    for i in 0..cycles {
        // spacing past the per-bucket cooldown
        clock.advance(1_500);
        let user = format!("user-{}", i % users);
        let report = cycle.run(Some(&user))?;
        if report.recorded() {
            recorded += 1;
        }
        sources[match report.decision.source {
            PolicySource::Mirror => 0,
            PolicySource::Explore => 1,
            PolicySource::Fallback => 2,
        }] += 1;
        if mirror.run_scheduled().is_some() {
            passes += 1;
        }
    }
    let last = mirror.trigger_replay();

    let out = json!({
        "cycles": cycles,
        "recorded": recorded,
        "scheduled_passes": passes,
        "sources": {"mirror": sources[0], "explore": sources[1], "fallback": sources[2]},
        "final_pass": last,
        "stats": mirror.get_stats(TimeRange::all()),
        "heatmap": mirror.heatmap(),
        "policies": mirror.all_policies(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();
    match cli.cmd {
        Commands::Simulate {
            cycles,
            seed,
            config,
            start_ms,
            users,
        } => simulate(cycles, seed, config, start_ms, users)?,
        Commands::DefaultConfig { out } => {
            let cfg = MirrorConfig::default();
            match out {
                Some(path) => {
                    cfg.save_to_file(&path)?;
                    info!("wrote default config to {}", path.display());
                }
                None => print!("{}", cfg.to_toml_string()?),
            }
        }
        Commands::CheckConfig { path } => {
            let cfg = MirrorConfig::from_file_with_env(&path)?;
            println!("{} is valid", path.display());
            print!("{}", cfg.to_toml_string()?);
        }
        Commands::Bucket {
            ts_ms,
            connected,
            pad,
        } => {
            if pad.len() != 3 {
                return Err("pad needs three components".into());
            }
            let key = bucket_key(ts_ms, connected, &[pad[0], pad[1], pad[2]]);
            println!("{}", key);
        }
    }
    Ok(())
}
