//! Background sweep worker.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::info;

use clinic_core::Clock;

use crate::lot_store::LotStore;

use super::expiration::ExpirationSweeper;
use super::schedule::Schedule;
use super::types::{SweepError, SweepReport, SweepStats};

/// Sweep worker configuration.
#[derive(Debug, Clone)]
pub struct SweepWorkerConfig {
    /// Thread name, also used as the `worker` log field
    pub name: String,
    /// Sweep once immediately after spawn (catches up a missed schedule)
    pub run_on_start: bool,
    /// Longest uninterrupted wait before the clock is consulted again
    pub max_nap: Duration,
}

impl Default for SweepWorkerConfig {
    fn default() -> Self {
        Self {
            name: "inventory-expiration-sweeper".to_string(),
            run_on_start: true,
            max_nap: Duration::from_secs(30),
        }
    }
}

impl SweepWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn with_max_nap(mut self, max_nap: Duration) -> Self {
        self.max_nap = max_nap;
        self
    }
}

#[derive(Debug)]
enum WorkerCommand {
    SweepNow,
    Shutdown,
}

/// Handle to control a running sweep worker.
#[derive(Debug)]
pub struct SweepWorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweepStats>>,
}

impl SweepWorkerHandle {
    /// Ask for an out-of-band sweep. The scheduled firing is unaffected.
    ///
    /// Returns `false` if the worker has already stopped.
    pub fn trigger_now(&self) -> bool {
        self.commands.send(WorkerCommand::SweepNow).is_ok()
    }

    /// Snapshot of the worker counters.
    pub fn stats(&self) -> SweepStats {
        lock_stats(&self.stats).clone()
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A sweep in progress runs to completion first.
    pub fn shutdown(mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn lock_stats(stats: &Mutex<SweepStats>) -> std::sync::MutexGuard<'_, SweepStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives an `ExpirationSweeper` from a `Schedule` on a dedicated thread.
///
/// - Sweeps never overlap within one worker
/// - Failed sweeps are counted (the sweeper logs them), then the worker waits for the
///   next firing
/// - Waiting is re-checked against the clock at least every `max_nap`. A forward jump
///   past the firing sweeps at once; a backward jump re-arms from the corrected time
#[derive(Debug)]
pub struct SweepWorker;

impl SweepWorker {
    pub fn spawn<S, C>(
        sweeper: ExpirationSweeper<S, C>,
        schedule: Schedule,
        config: SweepWorkerConfig,
    ) -> io::Result<SweepWorkerHandle>
    where
        S: LotStore + 'static,
        C: Clock + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel::<WorkerCommand>();
        let stats = Arc::new(Mutex::new(SweepStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker_loop(sweeper, schedule, config, commands_rx, stats_clone))?;

        Ok(SweepWorkerHandle {
            commands: commands_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<S: LotStore, C: Clock>(
    sweeper: ExpirationSweeper<S, C>,
    schedule: Schedule,
    config: SweepWorkerConfig,
    commands: mpsc::Receiver<WorkerCommand>,
    stats: Arc<Mutex<SweepStats>>,
) {
    info!(worker = %config.name, schedule = %schedule, "sweep worker started");

    if config.run_on_start {
        run_once(&sweeper, &stats);
    }

    'schedule: loop {
        let armed_at = sweeper.clock().now();
        let next = schedule.next_fire_after(armed_at);
        lock_stats(&stats).next_fire_at = Some(next);

        loop {
            let now = sweeper.clock().now();
            if now >= next {
                run_once(&sweeper, &stats);
                continue 'schedule;
            }
            if now < armed_at {
                continue 'schedule;
            }

            let nap = (next - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(config.max_nap);

            match commands.recv_timeout(nap) {
                Ok(WorkerCommand::SweepNow) => run_once(&sweeper, &stats),
                Ok(WorkerCommand::Shutdown) => break 'schedule,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break 'schedule,
            }
        }
    }

    info!(worker = %config.name, "sweep worker stopped");
}

fn run_once<S: LotStore, C: Clock>(sweeper: &ExpirationSweeper<S, C>, stats: &Mutex<SweepStats>) {
    let outcome: Result<SweepReport, SweepError> = sweeper.sweep();
    lock_stats(stats).record(&outcome);
}
