//! `agentry soak`: Drive many agents from many producer threads and check
//! that every counter ends at exactly the number of increments sent to it.

use std::thread;
use std::time::{Duration, Instant};

use agentry_core::{AgentEvent, Error, Result};
use agentry_runtime::{Agent, AgentManager, DispatcherStats, PoolStats, RuntimeConfig};
use serde::Serialize;
use tokio::sync::{broadcast::error::RecvError, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, clap::Args)]
pub struct SoakArgs {
    /// Number of counter agents
    #[arg(long, default_value_t = 1_000)]
    pub agents: usize,

    /// Increments sent to each agent
    #[arg(long, default_value_t = 100)]
    pub sends: u64,

    /// Producer threads; each owns a disjoint slice of the agents
    #[arg(long, default_value_t = 4)]
    pub producers: usize,

    /// Route every Nth increment through a solo lane (0 = never)
    #[arg(long, default_value_t = 0)]
    pub solo_every: u64,

    /// Override the configured number of pool lanes
    #[arg(long)]
    pub lanes: Option<usize>,

    /// Give up waiting for agents to settle after this many seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Lifecycle events seen on the bus during a run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EventTally {
    pub registered: u64,
    pub destroyed: u64,
    pub unregistered: u64,
    pub rejected: u64,
    pub schedule_failed: u64,
    /// Events the subscriber missed because the bus overflowed
    pub lagged: u64,
}

impl EventTally {
    fn record(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Registered { .. } => self.registered += 1,
            AgentEvent::Destroyed { .. } => self.destroyed += 1,
            AgentEvent::Unregistered { .. } => self.unregistered += 1,
            AgentEvent::ActionRejected { .. } => self.rejected += 1,
            AgentEvent::ScheduleFailed { .. } => self.schedule_failed += 1,
        }
    }
}

/// What the blocking half of a run observed.
#[derive(Debug, Clone)]
struct SoakOutcome {
    elapsed: Duration,
    mismatched: usize,
    unsettled: usize,
    pool: PoolStats,
    dispatcher: DispatcherStats,
}

#[derive(Debug, Serialize)]
pub struct SoakReport {
    pub agents: usize,
    pub sends_per_agent: u64,
    pub producers: usize,
    pub total_actions: u64,
    pub elapsed_ms: u128,
    pub actions_per_sec: f64,
    pub mismatched: usize,
    pub unsettled: usize,
    pub events: EventTally,
    pub pool: PoolStats,
    pub dispatcher: DispatcherStats,
}

impl SoakReport {
    pub fn passed(&self) -> bool {
        self.mismatched == 0 && self.unsettled == 0
    }
}

pub async fn run(args: SoakArgs) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut config = RuntimeConfig::load()?;
    if let Some(lanes) = args.lanes {
        config.pool.lanes = lanes;
    }
    let manager = AgentManager::new(&config)?;

    info!(
        agents = args.agents,
        sends = args.sends,
        producers = args.producers,
        lanes = config.pool.lanes,
        "Starting soak run"
    );

    // Tally lifecycle events off the hot path
    let mut rx = manager.events().subscribe();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let tally = tokio::spawn(async move {
        let mut tally = EventTally::default();
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Ok(event) => tally.record(&event),
                    Err(RecvError::Lagged(n)) => tally.lagged += n,
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stop_rx => break,
            }
        }
        tally
    });

    let drive_args = args.clone();
    let outcome = tokio::task::spawn_blocking(move || drive(manager, &drive_args)).await??;

    let _ = stop_tx.send(());
    let events = tally.await?;

    let total_actions = args.sends * args.agents as u64;
    let secs = outcome.elapsed.as_secs_f64();
    let report = SoakReport {
        agents: args.agents,
        sends_per_agent: args.sends,
        producers: args.producers.max(1),
        total_actions,
        elapsed_ms: outcome.elapsed.as_millis(),
        actions_per_sec: if secs > 0.0 { total_actions as f64 / secs } else { 0.0 },
        mismatched: outcome.mismatched,
        unsettled: outcome.unsettled,
        events,
        pool: outcome.pool,
        dispatcher: outcome.dispatcher,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.passed() {
        return Err(format!(
            "soak failed: {} agent(s) with a wrong total, {} agent(s) did not settle",
            report.mismatched, report.unsettled
        )
        .into());
    }
    Ok(())
}

/// Build the agents, run the producers and wait for every agent to go idle.
///
/// Takes the manager by value so the runtime shuts down on this thread once
/// the agents are gone.
fn drive(manager: AgentManager, args: &SoakArgs) -> Result<SoakOutcome> {
    let agents: Vec<Agent<i64>> = (0..args.agents)
        .map(|_| manager.agent_with_validator(0_i64, |v| *v >= 0))
        .collect();

    let producers = args.producers.max(1);
    let started = Instant::now();

    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let agents = &agents;
                scope.spawn(move || -> Result<()> {
                    for round in 1..=args.sends {
                        let solo = args.solo_every > 0 && round % args.solo_every == 0;
                        for agent in agents.iter().skip(p).step_by(producers) {
                            if solo {
                                agent.send_off(|v| v + 1)?;
                            } else {
                                agent.send(|v| v + 1)?;
                            }
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle
                .join()
                .map_err(|_| Error::Internal("producer thread panicked".into()))??;
        }
        Ok(())
    })?;

    let deadline = started + Duration::from_secs(args.timeout_secs);
    let expected = args.sends as i64;
    let mut mismatched = 0;
    let mut unsettled = 0;
    for agent in &agents {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !agent.await_for(remaining) {
            warn!(agent_id = %agent.id(), pending = agent.pending(), "Agent did not settle");
            unsettled += 1;
            continue;
        }
        let value = agent.value();
        if value != expected {
            warn!(agent_id = %agent.id(), value, expected, "Counter mismatch");
            mismatched += 1;
        }
    }
    let elapsed = started.elapsed();

    let pool = manager.pool_stats();
    let dispatcher = manager.dispatcher_stats();
    debug!(wakes = dispatcher.wakes, stale = dispatcher.stale_wakes, "Dispatcher settled");

    drop(agents);
    drop(manager);

    Ok(SoakOutcome {
        elapsed,
        mismatched,
        unsettled,
        pool,
        dispatcher,
    })
}

fn print_report(report: &SoakReport) {
    let verdict = if report.passed() { "PASS" } else { "FAIL" };
    println!("🔁 Soak {verdict}");
    println!(
        "   {} agents × {} sends from {} producer(s) = {} actions",
        report.agents, report.sends_per_agent, report.producers, report.total_actions
    );
    println!("   {} ms, {:.0} actions/s", report.elapsed_ms, report.actions_per_sec);
    if report.mismatched > 0 || report.unsettled > 0 {
        println!("   ⚠ {} mismatched, {} unsettled", report.mismatched, report.unsettled);
    }
    println!();
    println!(
        "   Pool: {}/{} lanes alive, {} pooled jobs, {} solo ({} fell back)",
        report.pool.live_lanes(),
        report.pool.lanes.len(),
        report.pool.pooled_executed(),
        report.pool.solo_spawned,
        report.pool.solo_fallbacks
    );
    for lane in &report.pool.lanes {
        println!("     {:<20} {:>10}", lane.name, lane.executed);
    }
    println!(
        "   Dispatcher: {} wakes ({} stale)",
        report.dispatcher.wakes, report.dispatcher.stale_wakes
    );
    let e = &report.events;
    println!(
        "   Events: {} registered, {} destroyed, {} unregistered, {} rejected, {} lagged",
        e.registered, e.destroyed, e.unregistered, e.rejected, e.lagged
    );
}
