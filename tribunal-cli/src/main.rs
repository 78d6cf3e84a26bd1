mod config;
mod output;

use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tribunal_core::simulation::{run_sequential, SimulationConfig, SyntheticJudges};
use tribunal_core::{
    cross_check, parse_outcome_with, Comparison, EngineError, EventLog, FileLog, ItemId,
    MemoryLog, RankingEngine,
};

use crate::config::TribunalConfig;

pub fn bail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

#[derive(Parser)]
#[command(name = "tribunal", version, about = "Rank items from pairwise judgments with a crash-safe event log")]
struct Cli {
    /// Extra config file, layered above ~/.config/tribunal/config.toml and ./tribunal.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the event log and checkpoints (overrides storage.data_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create a default config file (at ~/.config/tribunal/config.toml unless --path is given)
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Record one judgment
    Submit(SubmitArgs),
    /// Register items ahead of any judgment
    Register(RegisterArgs),
    /// Retire an item so it is no longer paired
    Retire { item: String },
    /// Print the current ranking
    Rank {
        /// Only show these items (repeatable)
        #[arg(long = "item")]
        items: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the next recommended comparison
    Next {
        #[arg(long)]
        json: bool,
    },
    /// Print engine status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Dump logged events as JSON lines
    Log {
        /// First sequence number to print
        #[arg(long, default_value_t = 1)]
        from: u64,
    },
    /// Write a checkpoint of the current state
    Checkpoint,
    /// Refit a batch Bradley-Terry model over the whole log and compare orderings
    Audit {
        #[arg(long)]
        json: bool,
    },
    /// Run synthetic judges with hidden merits against a fresh engine
    Simulate(SimulateArgs),
}

#[derive(Parser)]
struct SubmitArgs {
    left: String,
    right: String,
    /// left, right, tie, a likert letter A-E, or a probability that left wins
    outcome: String,
    #[arg(long, default_value = "cli")]
    judge: String,
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct RegisterArgs {
    /// Item IDs
    items: Vec<String>,

    /// File with one item per line, or a JSON array of strings
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Parser)]
struct SimulateArgs {
    #[arg(long, default_value_t = 20)]
    items: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Concurrent judges submitting against the same engine
    #[arg(long, default_value_t = 4)]
    judges: usize,

    /// Maximum number of comparisons across all judges
    #[arg(long, default_value_t = 2000)]
    budget: u64,

    /// Standard deviation of each judge's perception error
    #[arg(long, default_value_t = 0.5)]
    noise: f64,

    /// Judges report win probabilities instead of decisive verdicts
    #[arg(long)]
    soft: bool,

    /// Sample the trajectory every N comparisons (single judge only)
    #[arg(long, default_value_t = 50)]
    sample_every: u64,

    /// Write events to the data directory instead of memory
    #[arg(long)]
    persist: bool,

    #[arg(long)]
    json: bool,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn load_config(cli: &Cli) -> TribunalConfig {
    let mut cfg = TribunalConfig::load(cli.config.as_deref()).unwrap_or_else(|e| bail(e));
    if let Some(dir) = &cli.data_dir {
        cfg.storage.data_dir = dir.clone();
    }
    cfg
}

fn open_engine(cfg: &TribunalConfig) -> RankingEngine<FileLog> {
    let dir = &cfg.storage.data_dir;
    let log = FileLog::open(dir, cfg.log_options())
        .unwrap_or_else(|e| bail(format!("Failed to open event log in {}: {e}", dir.display())));
    RankingEngine::open(Arc::new(log), cfg.engine_config()).unwrap_or_else(|e| bail(e))
}

/// Parse a string as either a JSON array of strings or plain text (one item per line).
fn parse_items_from_str(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    if trimmed.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(trimmed)
            .unwrap_or_else(|e| bail(format!("File looks like JSON but failed to parse: {e}")));
        items.into_iter().filter(|s| !s.trim().is_empty()).collect()
    } else {
        trimmed
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Load items from --file, positional arguments, or stdin.
fn load_items(args: &RegisterArgs) -> Vec<String> {
    let mut items = Vec::new();

    if let Some(ref path) = args.file {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| bail(format!("Failed to read items file {}: {e}", path.display())));
        items = parse_items_from_str(&content);
    }

    items.extend(args.items.iter().cloned());

    if items.is_empty() {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            bail("No items provided. Pass item IDs, --file <path>, or pipe items via stdin.");
        }
        let content = stdin
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| bail(format!("Failed to read from stdin: {e}")))
            .join("\n");
        items = parse_items_from_str(&content);
    }
    items
}

/// Write every logged event with sequence `from` or later as one JSON line.
fn write_events<L: EventLog>(engine: &RankingEngine<L>, from: u64, out: &mut impl Write) -> Result<(), String> {
    let events = engine.audit(from.saturating_sub(1)).map_err(|e| e.to_string())?;
    for event in events {
        let event = event.map_err(|e| e.to_string())?;
        serde_json::to_writer(&mut *out, &event)
            .map_err(|e| format!("Failed to encode event {}: {e}", event.sequence))?;
        writeln!(out).map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Init { path } => {
            let path = config::create_default_config(path.as_deref()).unwrap_or_else(|e| bail(e));
            println!("Created config at {}", path.display());
        }
        Commands::Submit(args) => run_submit(&load_config(&cli), args),
        Commands::Register(args) => {
            let engine = open_engine(&load_config(&cli));
            for item in load_items(args) {
                let seq = engine.register_item(&item).unwrap_or_else(|e| bail(e));
                println!("{seq}\t{item}");
            }
        }
        Commands::Retire { item } => {
            let engine = open_engine(&load_config(&cli));
            let seq = engine.retire_item(item).unwrap_or_else(|e| bail(e));
            println!("{seq}\t{item} retired");
        }
        Commands::Rank { items, json } => {
            let engine = open_engine(&load_config(&cli));
            let subset: Vec<ItemId> = items
                .iter()
                .map(|raw| ItemId::parse(raw).unwrap_or_else(|e| bail(e)))
                .collect();
            let report = engine.ranking((!subset.is_empty()).then_some(subset.as_slice()));
            if *json {
                output::print_json(&report);
            } else {
                output::print_ranking_table(&report);
            }
        }
        Commands::Next { json } => {
            let engine = open_engine(&load_config(&cli));
            let pair = engine.next_pair();
            if *json {
                output::print_json(&pair);
            } else {
                output::print_pair(pair.as_ref());
            }
        }
        Commands::Status { json } => {
            let engine = open_engine(&load_config(&cli));
            let status = engine.status();
            if *json {
                output::print_json(&status);
            } else {
                output::print_status(&status);
            }
        }
        Commands::Log { from } => {
            let engine = open_engine(&load_config(&cli));
            write_events(&engine, *from, &mut io::stdout().lock()).unwrap_or_else(|e| bail(e));
        }
        Commands::Checkpoint => {
            let engine = open_engine(&load_config(&cli));
            let seq = engine.checkpoint_now().unwrap_or_else(|e| bail(e));
            println!("Checkpoint written at sequence {seq}");
        }
        Commands::Audit { json } => {
            let engine = open_engine(&load_config(&cli));
            let check = cross_check(engine.log().as_ref(), &engine.snapshot()).unwrap_or_else(|e| bail(e));
            if *json {
                output::print_json(&check);
            } else {
                output::print_audit_table(&check);
            }
        }
        Commands::Simulate(args) => run_simulate(&load_config(&cli), args).await,
    }
}

fn run_submit(cfg: &TribunalConfig, args: &SubmitArgs) {
    let left = ItemId::parse(&args.left).unwrap_or_else(|e| bail(e));
    let right = ItemId::parse(&args.right).unwrap_or_else(|e| bail(e));
    let outcome = parse_outcome_with(&args.outcome, cfg.input.narrow_win).unwrap_or_else(|e| bail(e));

    let engine = open_engine(cfg);
    let ack = engine
        .submit_comparison(Comparison { left, right, outcome, judge: args.judge.clone() })
        .unwrap_or_else(|e| {
            if e.is_retryable() {
                bail(format!("{e} (safe to retry)"))
            }
            bail(e)
        });

    if args.json {
        output::print_json(&ack);
        return;
    }
    println!("Accepted as event {}", ack.sequence);
    match ack.next_pair {
        Some((l, r)) => println!("Next: {l} vs {r}"),
        None => println!("Ranking is settled."),
    }
}

async fn run_simulate(cfg: &TribunalConfig, args: &SimulateArgs) {
    if args.judges == 0 {
        bail("--judges must be at least 1");
    }
    let judges = Arc::new(SyntheticJudges::new(SimulationConfig {
        items: args.items,
        seed: args.seed,
        judge_noise: args.noise,
        soft_verdicts: args.soft,
        ..SimulationConfig::default()
    }));

    if args.persist {
        let engine = Arc::new(open_engine(cfg));
        simulate_with(engine, judges, args).await;
    } else {
        let engine = RankingEngine::open(Arc::new(MemoryLog::new()), cfg.engine_config())
            .unwrap_or_else(|e| bail(e));
        simulate_with(Arc::new(engine), judges, args).await;
    }
}

async fn simulate_with<L: EventLog + 'static>(
    engine: Arc<RankingEngine<L>>,
    judges: Arc<SyntheticJudges>,
    args: &SimulateArgs,
) {
    if args.judges == 1 {
        let report = run_sequential(&engine, &judges, args.budget, args.sample_every).unwrap_or_else(|e| bail(e));
        if args.json {
            output::print_json(&report);
        } else {
            output::print_trajectory(&report.trajectory);
            println!(
                "\n{} comparisons, confident: {}, Kendall tau vs hidden merit: {:.3}",
                report.comparisons, report.confident, report.final_kendall_tau,
            );
        }
        return;
    }

    for item in judges.items() {
        engine.register_item(item.as_str()).unwrap_or_else(|e| bail(e));
    }
    tracing::info!(judges = args.judges, budget = args.budget, items = args.items, "starting concurrent simulation");

    let issued = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(args.judges);
    for judge_idx in 0..args.judges {
        let engine = engine.clone();
        let judges = judges.clone();
        let issued = issued.clone();
        let budget = args.budget;
        let seed = args.seed.wrapping_add(judge_idx as u64 + 1);

        handles.push(tokio::task::spawn_blocking(move || -> Result<u64, EngineError> {
            let mut rng = SmallRng::seed_from_u64(seed);
            let name = format!("synthetic-{judge_idx}");
            let mut made = 0;
            while let Some((left, right)) = engine.next_pair() {
                if issued.fetch_add(1, Ordering::SeqCst) >= budget {
                    break;
                }
                let outcome = judges.judge(&left, &right, &mut rng);
                engine.submit_comparison(Comparison { left, right, outcome, judge: name.clone() })?;
                made += 1;
            }
            Ok(made)
        }));
    }

    let mut total = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(made)) => total += made,
            Ok(Err(e)) => bail(e),
            Err(e) => bail(format!("Judge task failed: {e}")),
        }
    }

    let report = engine.ranking(None);
    let tau = judges.agreement(&report.ranking.order());
    if args.json {
        output::print_json(&serde_json::json!({
            "comparisons": total,
            "confident": report.confident,
            "final_kendall_tau": tau,
            "history": engine.history(),
        }));
    } else {
        output::print_history(&engine.history());
        println!(
            "\n{} comparisons from {} judges, confident: {}, Kendall tau vs hidden merit: {:.3}",
            total, args.judges, report.confident, tau,
        );
    }
}
