//! Worker pool: fixed serial lanes plus single-use solo lanes.
//!
//! Every lane is a named OS thread draining its own unbounded FIFO, so jobs
//! on one lane run strictly in submission order while lanes run concurrently
//! with each other. Pooled work is spread round-robin; solo work gets a brand
//! new lane that exits as soon as its one job has run.
//!
//! A job that panics takes its lane down with it. Jobs still queued behind it
//! are not run there; each one is handed back through [`Job::orphaned`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use agentry_config::PoolConfig;
use agentry_core::{Error, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A unit of work accepted by a lane.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);

    /// Called instead of [`Job::run`] when the lane holding the job died
    /// first. Runs on the dying lane thread and must not panic.
    fn orphaned(self: Box<Self>) {}
}

/// Plain closure job; dropped if orphaned.
struct Task<F>(F);

impl<F> Job for Task<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        let Task(f) = *self;
        f()
    }
}

/// Receiving end of a lane. Dropping it, normally or while the lane unwinds,
/// closes the queue and hands back whatever is still in it.
struct LaneQueue {
    receiver: mpsc::UnboundedReceiver<Box<dyn Job>>,
}

impl Drop for LaneQueue {
    fn drop(&mut self) {
        self.receiver.close();
        let mut orphaned = 0_usize;
        while let Ok(job) = self.receiver.try_recv() {
            orphaned += 1;
            job.orphaned();
        }
        if orphaned > 0 {
            warn!(orphaned, "Lane stopped with queued jobs, handed them back");
        }
    }
}

struct Lane {
    name: String,
    sender: mpsc::UnboundedSender<Box<dyn Job>>,
    executed: Arc<AtomicU64>,
    reported_dead: AtomicBool,
}

impl Lane {
    fn spawn(name: String) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel::<Box<dyn Job>>();
        let executed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&executed);

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut queue = LaneQueue { receiver };
                // Plain OS thread: blocking_recv is fine outside a runtime.
                while let Some(job) = queue.receiver.blocking_recv() {
                    job.run();
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                trace!("Lane queue closed, exiting");
            })
            .map_err(|e| Error::ThreadSpawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            sender,
            executed,
            reported_dead: AtomicBool::new(false),
        })
    }

    /// Hand the job back if the lane's thread is gone.
    fn submit(&self, job: Box<dyn Job>) -> std::result::Result<(), Box<dyn Job>> {
        self.sender.send(job).map_err(|e| e.0)
    }

    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Per-lane counters.
#[derive(Debug, Clone, Serialize)]
pub struct LaneStats {
    pub index: usize,
    pub name: String,
    pub executed: u64,
    pub alive: bool,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub lanes: Vec<LaneStats>,
    /// Solo lanes requested, including ones that fell back to the pool
    pub solo_spawned: u64,
    /// Solo requests that ran on a pool lane because no thread could be spawned
    pub solo_fallbacks: u64,
}

impl PoolStats {
    pub fn pooled_executed(&self) -> u64 {
        self.lanes.iter().map(|l| l.executed).sum()
    }

    pub fn live_lanes(&self) -> usize {
        self.lanes.iter().filter(|l| l.alive).count()
    }
}

/// `P` shared serial lanes and on-demand solo lanes.
pub struct WorkerPool {
    lanes: Vec<Lane>,
    cursor: AtomicUsize,
    solo_prefix: String,
    solo_spawned: AtomicU64,
    solo_fallbacks: AtomicU64,
}

impl WorkerPool {
    /// Spawn every pool lane up front.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let lanes = (0..config.lanes.max(1))
            .map(|index| Lane::spawn(format!("{}-{index}", config.thread_name_prefix)))
            .collect::<Result<Vec<_>>>()?;

        debug!(lanes = lanes.len(), "Worker pool started");

        Ok(Self {
            lanes,
            cursor: AtomicUsize::new(0),
            solo_prefix: config.solo_thread_prefix.clone(),
            solo_spawned: AtomicU64::new(0),
            solo_fallbacks: AtomicU64::new(0),
        })
    }

    /// Number of shared lanes.
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Queue `job` on the least-recently-assigned lane, skipping lanes whose
    /// thread has died. Returns the index of the lane that accepted it.
    pub fn submit_pooled(&self, job: impl FnOnce() + Send + 'static) -> Result<usize> {
        self.submit_job(Box::new(Task(job)))
    }

    /// Like [`WorkerPool::submit_pooled`] for a job that wants to be told
    /// when its lane dies before running it. On `Err` the job is dropped.
    pub fn submit_job(&self, mut job: Box<dyn Job>) -> Result<usize> {
        let count = self.lanes.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;

        for offset in 0..count {
            let index = (start + offset) % count;
            let lane = &self.lanes[index];
            match lane.submit(job) {
                Ok(()) => {
                    trace!(lane = index, "Job queued on pool lane");
                    return Ok(index);
                }
                Err(returned) => {
                    if !lane.reported_dead.swap(true, Ordering::Relaxed) {
                        warn!(
                            lane = index,
                            name = %lane.name,
                            "Pool lane is dead, routing around it"
                        );
                    }
                    job = returned;
                }
            }
        }

        Err(Error::PoolExhausted)
    }

    /// Run `job` on a fresh lane that is torn down once the job completes.
    ///
    /// Falls back to a pool lane if the OS refuses another thread.
    pub fn submit_solo(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.submit_solo_job(Box::new(Task(job)))
    }

    /// Solo counterpart of [`WorkerPool::submit_job`].
    pub fn submit_solo_job(&self, job: Box<dyn Job>) -> Result<()> {
        let seq = self.solo_spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{seq}", self.solo_prefix);

        match Lane::spawn(name) {
            Ok(lane) => {
                debug!(name = %lane.name, "Solo lane spawned");
                // The lane is dropped right after this, closing its queue:
                // the thread runs this one job and exits.
                match lane.submit(job) {
                    Ok(()) => Ok(()),
                    Err(job) => self.submit_job(job).map(|_| ()),
                }
            }
            Err(err) => {
                self.solo_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Solo lane unavailable, running on the pool instead");
                self.submit_job(job).map(|_| ())
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            lanes: self
                .lanes
                .iter()
                .enumerate()
                .map(|(index, lane)| LaneStats {
                    index,
                    name: lane.name.clone(),
                    executed: lane.executed.load(Ordering::Relaxed),
                    alive: lane.is_alive(),
                })
                .collect(),
            solo_spawned: self.solo_spawned.load(Ordering::Relaxed),
            solo_fallbacks: self.solo_fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("lanes", &self.lanes.len())
            .field("solo_prefix", &self.solo_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    fn pool(lanes: usize) -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            lanes,
            thread_name_prefix: "test-pool".into(),
            solo_thread_prefix: "test-solo".into(),
        })
        .unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn pooled_jobs_round_robin() {
        let pool = pool(3);
        let lanes: Vec<usize> = (0..6).map(|_| pool.submit_pooled(|| {}).unwrap()).collect();
        assert_eq!(lanes, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn lane_runs_jobs_in_submission_order() {
        let pool = pool(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let log = Arc::clone(&log);
            pool.submit_pooled(move || log.lock().push(i)).unwrap();
        }
        assert!(wait_until(|| log.lock().len() == 50));
        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn lane_runs_on_named_thread() {
        let pool = pool(2);
        let (tx, rx) = std_mpsc::channel();
        pool.submit_pooled(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-pool-0"));
    }

    #[test]
    fn solo_job_runs_on_its_own_thread() {
        let pool = pool(1);
        let (tx, rx) = std_mpsc::channel();
        pool.submit_solo(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-solo-0"));
        assert_eq!(pool.stats().solo_spawned, 1);
        assert_eq!(pool.stats().solo_fallbacks, 0);
    }

    #[test]
    fn blocked_solo_job_does_not_hold_up_pool() {
        let pool = pool(1);
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        pool.submit_solo(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();

        let (tx, rx) = std_mpsc::channel();
        pool.submit_pooled(move || {
            let _ = tx.send(());
        })
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        let _ = release_tx.send(());
    }

    #[test]
    fn dead_lane_is_skipped() {
        let pool = pool(2);
        assert_eq!(pool.submit_pooled(|| panic!("lane fault")).unwrap(), 0);
        assert!(wait_until(|| !pool.stats().lanes[0].alive));

        for _ in 0..4 {
            assert_eq!(pool.submit_pooled(|| {}).unwrap(), 1);
        }
        assert_eq!(pool.stats().live_lanes(), 1);
    }

    struct Flagged {
        ran: std_mpsc::Sender<&'static str>,
    }

    impl Job for Flagged {
        fn run(self: Box<Self>) {
            let _ = self.ran.send("run");
        }

        fn orphaned(self: Box<Self>) {
            let _ = self.ran.send("orphaned");
        }
    }

    #[test]
    fn jobs_behind_a_panic_are_handed_back() {
        let pool = pool(1);
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        pool.submit_pooled(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            panic!("lane fault");
        })
        .unwrap();

        let (tx, rx) = std_mpsc::channel();
        pool.submit_job(Box::new(Flagged { ran: tx })).unwrap();
        release_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "orphaned");
        assert!(wait_until(|| pool.stats().live_lanes() == 0));
        assert!(matches!(pool.submit_pooled(|| {}), Err(Error::PoolExhausted)));
    }

    #[test]
    fn queued_jobs_run_when_pool_is_dropped() {
        let pool = pool(1);
        let (tx, rx) = std_mpsc::channel();
        pool.submit_pooled(|| thread::sleep(Duration::from_millis(20))).unwrap();
        pool.submit_job(Box::new(Flagged { ran: tx })).unwrap();
        drop(pool);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "run");
    }

    #[test]
    fn stats_count_executed_jobs() {
        let pool = pool(2);
        for _ in 0..10 {
            pool.submit_pooled(|| {}).unwrap();
        }
        assert!(wait_until(|| pool.stats().pooled_executed() == 10));
        let stats = pool.stats();
        assert_eq!(stats.lanes[0].executed, 5);
        assert_eq!(stats.lanes[1].executed, 5);
    }
}
