use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{FixedOffset, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::{JobKind, SweepReport, Timestamp};

/// Cron schedule for one sweep, evaluated in a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    kind: JobKind,
    expression: String,
    schedule: cron::Schedule,
    timezone: FixedOffset,
}

impl JobSchedule {
    /// `expression` is seconds-first: `sec min hour day-of-month month day-of-week`.
    pub fn parse(
        kind: JobKind,
        expression: &str,
        timezone: FixedOffset,
    ) -> Result<Self, cron::error::Error> {
        let schedule = cron::Schedule::from_str(expression.trim())?;
        Ok(Self {
            kind,
            expression: expression.trim().to_string(),
            schedule,
            timezone,
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: Timestamp) -> Option<Timestamp> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRun {
    pub finished_at: Timestamp,
    /// Bookings moved, or the error that ended the run.
    pub result: Result<usize, String>,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub kind: JobKind,
    pub running: bool,
    pub expression: String,
    pub timezone: FixedOffset,
    /// Only known while the timer is running.
    pub next_run: Option<Timestamp>,
    pub last_run: Option<LastRun>,
}

#[derive(Debug)]
pub enum SchedulerError {
    UnknownJob(JobKind),
    Sweep(EngineError),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::UnknownJob(kind) => write!(f, "no schedule configured for {kind}"),
            SchedulerError::Sweep(e) => write!(f, "sweep failed: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// One job's handler. Timer ticks and manual runs both go through `run`,
/// which holds the run lock so two runs of the same job never overlap.
struct JobRunner {
    schedule: JobSchedule,
    engine: Arc<Engine>,
    run_lock: Mutex<()>,
    last_run: Mutex<Option<LastRun>>,
}

impl JobRunner {
    async fn run(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        let kind = self.schedule.kind;
        let _running = self.run_lock.lock().await;
        let start = Instant::now();
        let result = self.engine.run_sweep(kind, now).await;
        metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS, "job" => kind.as_str())
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            crate::observability::SWEEP_RUNS_TOTAL,
            "job" => kind.as_str(),
            "status" => status
        )
        .increment(1);
        *self.last_run.lock().await = Some(LastRun {
            finished_at: Utc::now(),
            result: result
                .as_ref()
                .map(|r| r.count)
                .map_err(|e| e.to_string()),
        });
        result
    }

    async fn tick_loop(self: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        let kind = self.schedule.kind;
        loop {
            let now = Utc::now();
            let Some(next) = self.schedule.next_after(now) else {
                warn!("{kind} schedule has no future fire time, stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = &mut stop => {
                    debug!("{kind} timer stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            match self.run(Utc::now()).await {
                Ok(report) => debug!("{kind} tick moved {} bookings", report.count),
                // Next tick retries.
                Err(e) => error!("{kind} tick failed: {e}"),
            }
        }
    }
}

struct RunningJob {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

/// Owns the sweep timers. Jobs are independent; each can be started,
/// stopped, inspected and run by hand.
pub struct Scheduler {
    runners: HashMap<JobKind, Arc<JobRunner>>,
    running: DashMap<JobKind, RunningJob>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, jobs: Vec<JobSchedule>) -> Self {
        let runners = jobs
            .into_iter()
            .map(|schedule| {
                let runner = JobRunner {
                    schedule,
                    engine: engine.clone(),
                    run_lock: Mutex::new(()),
                    last_run: Mutex::new(None),
                };
                (runner.schedule.kind, Arc::new(runner))
            })
            .collect();
        Self {
            runners,
            running: DashMap::new(),
        }
    }

    fn runner(&self, kind: JobKind) -> Result<&Arc<JobRunner>, SchedulerError> {
        self.runners.get(&kind).ok_or(SchedulerError::UnknownJob(kind))
    }

    /// Configured jobs in a stable order.
    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.runners.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Start the job's timer. Returns false if it was already running.
    pub fn start(&self, kind: JobKind) -> Result<bool, SchedulerError> {
        let runner = self.runner(kind)?.clone();
        let entry = self.running.entry(kind);
        if let Entry::Occupied(ref job) = entry
            && !job.get().handle.is_finished()
        {
            return Ok(false);
        }
        let (stop, stop_rx) = oneshot::channel();
        let expression = runner.schedule.expression.clone();
        let handle = tokio::spawn(runner.tick_loop(stop_rx));
        entry.insert(RunningJob { handle, stop });
        info!("{kind} job started ({expression})");
        Ok(true)
    }

    /// Stop the job's timer, waiting for an in-flight tick to finish.
    /// Returns false if it was not running.
    pub async fn stop(&self, kind: JobKind) -> Result<bool, SchedulerError> {
        self.runner(kind)?;
        let Some((_, job)) = self.running.remove(&kind) else {
            return Ok(false);
        };
        let was_running = !job.handle.is_finished();
        let _ = job.stop.send(());
        if let Err(e) = job.handle.await {
            warn!("{kind} job task ended abnormally: {e}");
        }
        if was_running {
            info!("{kind} job stopped");
        }
        Ok(was_running)
    }

    pub async fn status(&self, kind: JobKind) -> Result<JobStatus, SchedulerError> {
        let runner = self.runner(kind)?;
        let running = self
            .running
            .get(&kind)
            .is_some_and(|job| !job.handle.is_finished());
        let next_run = if running {
            runner.schedule.next_after(Utc::now())
        } else {
            None
        };
        let last_run = runner.last_run.lock().await.clone();
        Ok(JobStatus {
            kind,
            running,
            expression: runner.schedule.expression.clone(),
            timezone: runner.schedule.timezone,
            next_run,
            last_run,
        })
    }

    /// Run the job once, now, outside its timer.
    pub async fn run_now(&self, kind: JobKind) -> Result<SweepReport, SchedulerError> {
        self.run_at(kind, Utc::now()).await
    }

    /// Run the job once as if the clock read `now`.
    pub async fn run_at(
        &self,
        kind: JobKind,
        now: Timestamp,
    ) -> Result<SweepReport, SchedulerError> {
        let runner = self.runner(kind)?;
        info!("{kind} run requested");
        runner.run(now).await.map_err(SchedulerError::Sweep)
    }

    pub fn start_all(&self) {
        for kind in self.kinds() {
            // Every kind comes from `runners`, so start cannot fail here.
            let _ = self.start(kind);
        }
    }

    pub async fn shutdown(&self) {
        for kind in self.kinds() {
            let _ = self.stop(kind).await;
        }
        info!("scheduler stopped");
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                info!("compacted WAL after {appends} appends");
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => "ok")
                    .increment(1);
            }
            Err(e) => {
                error!("WAL compaction failed: {e}");
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => "error")
                    .increment(1);
            }
        }
    }
}
