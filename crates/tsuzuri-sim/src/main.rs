//! tsuzuri-sim: drive the window pipeline against a simulated conversation.
//!
//! Seeds an in-memory store, spawns a pipeline with a scripted consumer, and
//! plays random activity against both: new messages, edits, deletions,
//! paging, jumps, typing and viewport changes. Every landing is replayed
//! onto a mirrored list, so a wrong edit script shows up as a mismatch.
//!
//! ```bash
//! cargo run -p tsuzuri-sim -- --entries 2000 --steps 500 --seed 7
//! cargo run -p tsuzuri-sim -- --config crates/tsuzuri-sim/pipeline.ron --json
//! RUST_LOG=tsuzuri_window=debug cargo run -p tsuzuri-sim
//! ```

mod consumer;
mod feed;
mod script;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use tsuzuri_window::{
    EntryCache, LandingOutcome, LoadIntent, MemoryEntryCache, MemoryStore, PipelineConfig,
    PipelineEvent, PipelineHandle, PipelineStatus, Style, spawn_pipeline,
};

use consumer::{ConsumerStats, SimConsumer};
use script::{Action, Script};

/// Drive the tsuzuri window pipeline against a simulated conversation.
#[derive(Parser, Debug)]
#[command(name = "tsuzuri-sim")]
#[command(about = "Simulate conversation activity against the window pipeline")]
struct Args {
    /// RON pipeline config (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entries in the conversation before the first load
    #[arg(long, default_value_t = 1000)]
    entries: usize,

    /// Simulated actions to play
    #[arg(long, default_value_t = 300)]
    steps: usize,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Viewport width in points
    #[arg(long, default_value_t = 390.0)]
    width: f64,

    /// Viewport height in points
    #[arg(long, default_value_t = 844.0)]
    height: f64,

    /// Max milliseconds to pause between actions
    #[arg(long, default_value_t = 3)]
    pause_ms: u64,

    /// Print the summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Serialize)]
struct EventStats {
    builds: usize,
    failures: usize,
    fallbacks: usize,
    land_timeouts: usize,
    superseded: usize,
}

#[derive(Debug, Serialize)]
struct Summary {
    seed: u64,
    steps: usize,
    store_len: usize,
    window_len: usize,
    can_load_older: bool,
    can_load_newer: bool,
    elapsed_ms: u128,
    consumer: ConsumerStats,
    events: EventStats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = tsuzuri_telemetry::init_tracing("tsuzuri-sim");
    let args = Args::parse();

    match run(args).await {
        Ok(summary) if summary.consumer.mismatches == 0 && summary.consumer.out_of_order == 0 => {
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            warn!(
                mismatches = summary.consumer.mismatches,
                out_of_order = summary.consumer.out_of_order,
                "landings did not replay cleanly"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("simulation failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<Summary> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let style = Style::new(args.width, args.height);
    if !style.is_ready() {
        bail!("viewport width must be positive, got {}", args.width);
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let store = Arc::new(MemoryStore::with_entries(
        (0..args.entries).map(|_| Script::message(&mut rng)),
    ));
    info!(
        entries = args.entries,
        seed = args.seed,
        max_window = config.max_window,
        "store seeded"
    );

    let consumer = Arc::new(SimConsumer::new());
    let caches: Vec<Arc<dyn EntryCache>> =
        vec![Arc::new(MemoryEntryCache::with_capacity(config.cache_capacity))];
    let handle = spawn_pipeline(config, store.clone(), caches, consumer.clone(), style);
    consumer.attach(handle.clone());

    let events = Arc::new(Mutex::new(EventStats::default()));
    let event_task = spawn_event_tally(&handle, events.clone());
    let feed_task = feed::spawn_change_feed(&store, handle.clone());

    let started = Instant::now();
    handle.submit(LoadIntent::Initial { focus: None })?;
    settle(&handle).await?;

    let mut script = Script::new(rng, style);
    for step in 0..args.steps {
        let action = script.next(&store);
        play(&store, &handle, action)?;
        if args.pause_ms > 0 && step % 4 == 0 {
            tokio::time::sleep(Duration::from_millis(args.pause_ms)).await;
        }
    }
    settle(&handle).await?;

    let state = handle.render_state();
    let consumer_stats = consumer.stats();
    if consumer.mirrored_ids() != state.ids() {
        warn!("mirrored list diverged from the final render state");
    }

    feed_task.abort();
    event_task.abort();
    handle.shutdown().await?;

    let events = std::mem::take(&mut *events.lock());
    let summary = Summary {
        seed: args.seed,
        steps: args.steps,
        store_len: store.len(),
        window_len: state.len(),
        can_load_older: state.can_load_older,
        can_load_newer: state.can_load_newer,
        elapsed_ms: started.elapsed().as_millis(),
        consumer: consumer_stats,
        events,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            window = summary.window_len,
            store = summary.store_len,
            landings = summary.consumer.landings,
            diffs = summary.consumer.diffs,
            reloads = summary.consumer.reloads,
            animated = summary.consumer.animated,
            mismatches = summary.consumer.mismatches,
            fallbacks = summary.events.fallbacks,
            elapsed_ms = summary.elapsed_ms,
            "simulation finished"
        );
    }
    Ok(summary)
}

fn play(store: &MemoryStore, handle: &PipelineHandle, action: Action) -> Result<()> {
    // store writes reach the pipeline through the change feed
    match action {
        Action::Append(entry) => {
            store.append(entry);
        }
        Action::Edit(entry) => {
            store.update(entry);
        }
        Action::Delete(id) => {
            store.delete(&id);
        }
        Action::DeleteSilently(id) => store.delete_silently(&[id]),
        Action::Submit(intent) => handle.submit(intent)?,
        Action::SetView(view) => handle.set_view(view)?,
        Action::SetStyle(style) => handle.set_style(style)?,
    }
    Ok(())
}

/// Wait for the pipeline to go idle.
async fn settle(handle: &PipelineHandle) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            handle.flush().await?;
            if handle.status() == PipelineStatus::Idle {
                return Ok::<_, anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .context("pipeline did not go idle")?
}

fn spawn_event_tally(
    handle: &PipelineHandle,
    stats: Arc<Mutex<EventStats>>,
) -> tokio::task::JoinHandle<()> {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event tally lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let mut stats = stats.lock();
            match event {
                PipelineEvent::BuildStarted { .. } => stats.builds += 1,
                PipelineEvent::BuildFailed { .. } => stats.failures += 1,
                PipelineEvent::FellBack { .. } => stats.fallbacks += 1,
                PipelineEvent::LandSafetyTimedOut { .. } => stats.land_timeouts += 1,
                PipelineEvent::LandingFinished {
                    outcome: LandingOutcome::Superseded,
                    ..
                } => stats.superseded += 1,
                _ => {}
            }
        }
    })
}
