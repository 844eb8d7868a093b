// FILE: crates/cli/src/simulate.rs
//! Several clients editing one collection against a flaky server

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use console::style;
use mirrorsync_config::{Config, SyncConfig};
use mirrorsync_core::{CollectionKey, Record, ServerId};
use mirrorsync_engine::memory::{FaultConfig, MemoryBackend};
use mirrorsync_engine::{Store, SyncEngine, SyncResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const COLLECTION: &str = "items";
const MAX_DRAIN_ROUNDS: usize = 10;

/// Knobs of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub clients: usize,
    pub ops: usize,
    pub max_latency: Duration,
    pub failure_rate: f64,
    pub seed: u64,
}

impl SimulationOptions {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let clients = matches.get_one::<usize>("clients").copied().unwrap_or(3);
        let ops = matches.get_one::<usize>("ops").copied().unwrap_or(1000);
        let latency_ms = matches.get_one::<u64>("latency-ms").copied().unwrap_or(2);
        let failure_rate = matches.get_one::<f64>("failure-rate").copied().unwrap_or(0.1);
        let seed = matches
            .get_one::<u64>("seed")
            .copied()
            .unwrap_or_else(rand::random);

        let options = Self {
            clients,
            ops,
            max_latency: Duration::from_millis(latency_ms),
            failure_rate,
            seed,
        };
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        if self.clients == 0 {
            bail!("--clients must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!("--failure-rate must be in [0, 1], got {}", self.failure_rate);
        }
        Ok(())
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    /// Live rows on the server at the end
    pub server_records: usize,
    /// Server calls that failed by injection
    pub injected_failures: usize,
    /// Conflicts settled in favour of the server while draining
    pub resolved_conflicts: usize,
    /// Fault-free rounds needed to empty every queue
    pub drain_rounds: usize,
    /// Indexes of clients whose view differs from the server
    pub diverged: Vec<usize>,
}

impl SimulationSummary {
    pub fn converged(&self) -> bool {
        self.diverged.is_empty()
    }
}

/// Runs a simulation and prints the outcome
pub async fn run(config: &Config, options: &SimulationOptions) -> Result<()> {
    println!("\n{}", style("Mirrorsync Simulation").bold().cyan());
    println!("{}", "=".repeat(60));
    println!(
        "{} client(s), {} op(s) each, latency up to {:?}, failure rate {}, seed {}",
        options.clients, options.ops, options.max_latency, options.failure_rate, options.seed
    );

    let summary = simulate(&config.sync, options).await?;

    println!("\nServer records:     {}", summary.server_records);
    println!("Injected failures:  {}", summary.injected_failures);
    println!("Resolved conflicts: {}", summary.resolved_conflicts);
    println!("Drain rounds:       {}", summary.drain_rounds);

    if summary.converged() {
        println!("\n{} All clients match the server", style("✓").green().bold());
        Ok(())
    } else {
        println!(
            "\n{} Clients {:?} diverged from the server",
            style("✗").red().bold(),
            summary.diverged
        );
        bail!("Simulation did not converge (seed {})", options.seed)
    }
}

/// Drives the clients to completion and compares every view with the server
pub async fn simulate(config: &SyncConfig, options: &SimulationOptions) -> Result<SimulationSummary> {
    let key = CollectionKey::from(COLLECTION);
    let backend = Arc::new(MemoryBackend::new());
    backend.set_faults(FaultConfig::new(
        Duration::ZERO,
        options.max_latency,
        options.failure_rate,
    ))?;

    let mut clients = Vec::with_capacity(options.clients);
    for _ in 0..options.clients {
        let engine = SyncEngine::new(config.clone(), Arc::new(Store::hydrated()));
        engine.register(key.clone(), Arc::new(backend.collection(key.clone())))?;
        clients.push(engine);
    }

    let done = Arc::new(AtomicBool::new(false));
    let mut syncers = Vec::new();
    let mut editors = Vec::new();
    for (index, engine) in clients.iter().enumerate() {
        syncers.push(tokio::spawn(sync_until(engine.clone(), Arc::clone(&done))));
        editors.push(tokio::spawn(edit(
            engine.clone(),
            key.clone(),
            options.ops,
            options.seed.wrapping_add(index as u64),
        )));
    }
    for editor in editors {
        editor.await.context("Editor task panicked")?;
    }
    done.store(true, Ordering::SeqCst);
    for syncer in syncers {
        syncer.await.context("Sync task panicked")?;
    }

    let injected_failures = backend.calls()?.failures;
    backend.set_faults(FaultConfig::none())?;

    let mut summary = SimulationSummary {
        injected_failures,
        ..Default::default()
    };
    while summary.drain_rounds < MAX_DRAIN_ROUNDS {
        summary.drain_rounds += 1;
        let mut settled = true;
        for engine in &clients {
            summary.resolved_conflicts += settle_conflicts(engine)?;
            engine.sync_now().await?;
            let state = engine.state()?;
            settled &= state.pending_count == 0 && !state.has_conflicts();
        }
        if settled {
            break;
        }
    }
    // every queue is empty; one more pull brings each client up to date
    for engine in &clients {
        engine.sync_now().await?;
    }

    let server = server_view(&backend, &key)?;
    summary.server_records = server.len();
    for (index, engine) in clients.iter().enumerate() {
        match client_view(engine, &key)? {
            Some(view) if view == server => {}
            _ => summary.diverged.push(index),
        }
    }
    log::info!(
        "Simulation finished after {} drain round(s), {} diverged client(s)",
        summary.drain_rounds,
        summary.diverged.len()
    );
    Ok(summary)
}

async fn sync_until(engine: SyncEngine, done: Arc<AtomicBool>) {
    while !done.load(Ordering::SeqCst) {
        if let Err(e) = engine.sync_now().await {
            log::warn!("Cycle failed: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn edit(engine: SyncEngine, key: CollectionKey, ops: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for step in 0..ops {
        if let Err(e) = random_operation(&engine, &key, &mut rng, step) {
            // the record may have been removed by a pull in the meantime
            log::debug!("Skipped operation {}: {}", step, e);
        }
        if step % 20 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

fn random_operation(
    engine: &SyncEngine,
    key: &CollectionKey,
    rng: &mut StdRng,
    step: usize,
) -> SyncResult<()> {
    let store = engine.store();
    let records = store.records(key)?;
    if records.is_empty() || rng.gen_bool(0.4) {
        let record = Record::from_value(json!({ "name": format!("item-{}", step) }))?;
        store.insert(key, record)?;
        return Ok(());
    }

    let target = &records[rng.gen_range(0..records.len())];
    if rng.gen_bool(0.7) {
        let name = format!("edit-{}", step);
        store.modify(key, &target.local_id, |fields| {
            fields.insert("name".into(), json!(name));
        })
    } else {
        store.remove(key, &target.local_id).map(|_| ())
    }
}

/// Settles every open conflict with the server's values
fn settle_conflicts(engine: &SyncEngine) -> SyncResult<usize> {
    let conflicts: Vec<_> = engine.state()?.conflicts.into_keys().collect();
    for local_id in &conflicts {
        engine.resolve_conflict(*local_id, false)?;
    }
    Ok(conflicts.len())
}

type View = BTreeSet<(ServerId, String)>;

fn server_view(backend: &MemoryBackend, key: &CollectionKey) -> SyncResult<View> {
    Ok(backend
        .live_rows(key)?
        .into_iter()
        .map(|row| (row.id, serde_json::Value::Object(row.fields).to_string()))
        .collect())
}

/// A client's records by server id; `None` if any record is still unacknowledged
fn client_view(engine: &SyncEngine, key: &CollectionKey) -> SyncResult<Option<View>> {
    let mut view = View::new();
    for record in engine.store().records(key)? {
        let Some(server_id) = record.server_id else {
            return Ok(None);
        };
        view.insert((server_id, serde_json::Value::Object(record.fields).to_string()));
    }
    Ok(Some(view))
}
