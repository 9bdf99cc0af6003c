//! # Telemetry Blackboard
//!
//! Thread-safe progress tracking for a factorization run. Worker threads bump
//! atomic counters as they finish group evaluations; an optional heartbeat
//! thread periodically reads a snapshot and reports it on stderr.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{PhyloFactorError, Result};

/// Processing stage for high-level progress tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Initializing = 0,
    LoadingData = 1,
    Preparing = 2,
    Factoring = 3,
    WritingOutput = 4,
    Complete = 5,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::LoadingData => "Loading Data",
            Stage::Preparing => "Preparing",
            Stage::Factoring => "Factoring",
            Stage::WritingOutput => "Writing Output",
            Stage::Complete => "Complete",
        }
    }

    fn from_u64(val: u64) -> Self {
        match val {
            0 => Stage::Initializing,
            1 => Stage::LoadingData,
            2 => Stage::Preparing,
            3 => Stage::Factoring,
            4 => Stage::WritingOutput,
            _ => Stage::Complete,
        }
    }
}

/// Shared progress counters, updated with relaxed ordering from hot loops.
pub struct TelemetryBlackboard {
    stage: AtomicU64,

    current_iteration: AtomicU64,
    /// 0 when the run has no fixed factor target
    target_factors: AtomicU64,
    factors_committed: AtomicU64,

    groups_evaluated: AtomicU64,
    total_groups: AtomicU64,

    start_time: Instant,
    last_progress_nanos: AtomicU64,

    shutdown: AtomicBool,
}

impl TelemetryBlackboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u64, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u64(self.stage.load(Ordering::Relaxed))
    }

    pub fn set_target_factors(&self, target: Option<usize>) {
        self.target_factors
            .store(target.unwrap_or(0) as u64, Ordering::Relaxed);
    }

    /// Start of an iteration with `n_groups` candidates.
    pub fn begin_iteration(&self, iteration: usize, n_groups: usize) {
        self.current_iteration.store(iteration as u64, Ordering::Relaxed);
        self.total_groups.store(n_groups as u64, Ordering::Relaxed);
        self.groups_evaluated.store(0, Ordering::Relaxed);
        self.touch_progress();
    }

    /// Called from worker threads after each group evaluation.
    #[inline]
    pub fn group_evaluated(&self) {
        self.groups_evaluated.fetch_add(1, Ordering::Relaxed);
        self.touch_progress();
    }

    pub fn factor_committed(&self) {
        self.factors_committed.fetch_add(1, Ordering::Relaxed);
        self.touch_progress();
    }

    pub fn groups_evaluated(&self) -> u64 {
        self.groups_evaluated.load(Ordering::Relaxed)
    }

    pub fn factors_committed(&self) -> u64 {
        self.factors_committed.load(Ordering::Relaxed)
    }

    #[inline]
    fn touch_progress(&self) {
        let elapsed = self.start_time.elapsed().as_nanos() as u64;
        self.last_progress_nanos.store(elapsed, Ordering::Relaxed);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            stage: self.stage(),
            current_iteration: self.current_iteration.load(Ordering::Relaxed),
            target_factors: self.target_factors.load(Ordering::Relaxed),
            factors_committed: self.factors_committed.load(Ordering::Relaxed),
            groups_evaluated: self.groups_evaluated.load(Ordering::Relaxed),
            total_groups: self.total_groups.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
            last_progress_nanos: self.last_progress_nanos.load(Ordering::Relaxed),
            current_nanos: self.start_time.elapsed().as_nanos() as u64,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Default for TelemetryBlackboard {
    fn default() -> Self {
        Self {
            stage: AtomicU64::new(Stage::Initializing as u64),
            current_iteration: AtomicU64::new(0),
            target_factors: AtomicU64::new(0),
            factors_committed: AtomicU64::new(0),
            groups_evaluated: AtomicU64::new(0),
            total_groups: AtomicU64::new(0),
            start_time: Instant::now(),
            last_progress_nanos: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }
}

struct TelemetrySnapshot {
    stage: Stage,
    current_iteration: u64,
    target_factors: u64,
    factors_committed: u64,
    groups_evaluated: u64,
    total_groups: u64,
    elapsed_secs: f64,
    last_progress_nanos: u64,
    current_nanos: u64,
}

/// Heartbeat output configuration
pub struct HeartbeatConfig {
    /// Interval between heartbeats (seconds)
    pub interval_secs: u64,
    /// Stall warning threshold (seconds with no progress)
    pub stall_threshold_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            stall_threshold_secs: 300,
        }
    }
}

/// Handle to the heartbeat thread
pub struct HeartbeatHandle {
    handle: Option<JoinHandle<()>>,
    blackboard: Arc<TelemetryBlackboard>,
}

impl HeartbeatHandle {
    pub fn spawn(blackboard: Arc<TelemetryBlackboard>, config: HeartbeatConfig) -> Result<Self> {
        let bb = blackboard.clone();
        let is_tty = io::stderr().is_terminal();

        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || heartbeat_loop(bb, config, is_tty))
            .map_err(|e| PhyloFactorError::worker_pool(format!("failed to spawn heartbeat thread: {}", e)))?;

        Ok(Self {
            handle: Some(handle),
            blackboard,
        })
    }

    /// Signal shutdown and wait for the thread to finish
    pub fn shutdown(mut self) {
        self.blackboard.signal_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        // Signal only; never block in drop
        self.blackboard.signal_shutdown();
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

fn heartbeat_loop(bb: Arc<TelemetryBlackboard>, config: HeartbeatConfig, is_tty: bool) {
    let tick = Duration::from_millis(100);
    let interval = Duration::from_secs(config.interval_secs.max(1));
    let mut last_report = Instant::now();

    while !bb.is_shutdown() {
        thread::sleep(tick);
        if last_report.elapsed() < interval {
            continue;
        }
        last_report = Instant::now();

        let snap = bb.snapshot();
        let stall_secs =
            (snap.current_nanos.saturating_sub(snap.last_progress_nanos)) / 1_000_000_000;
        let is_stalled = stall_secs > config.stall_threshold_secs;

        if is_tty {
            print_tty_progress(&snap, is_stalled);
        } else {
            print_log_progress(&snap, is_stalled);
        }
    }

    if is_tty {
        eprint!("\r\x1b[K");
        let _ = io::stderr().flush();
    }
}

fn print_tty_progress(snap: &TelemetrySnapshot, is_stalled: bool) {
    let target = if snap.target_factors > 0 {
        format!("/{}", snap.target_factors)
    } else {
        String::new()
    };
    let group_pct = if snap.total_groups > 0 {
        (snap.groups_evaluated as f64 / snap.total_groups as f64 * 100.0).min(100.0)
    } else {
        0.0
    };

    let bar_width = 20;
    let filled = ((group_pct / 100.0) * bar_width as f64) as usize;
    let bar: String = "=".repeat(filled.min(bar_width))
        + &" ".repeat(bar_width.saturating_sub(filled));
    let stall_str = if is_stalled { " [STALLED]" } else { "" };

    eprint!(
        "\r[{}] {:>5.1}% | {} | iter {} | factors {}{} | groups {}/{} | {}{}    \x1b[K",
        bar,
        group_pct,
        snap.stage.as_str(),
        snap.current_iteration,
        snap.factors_committed,
        target,
        snap.groups_evaluated,
        snap.total_groups,
        format_duration(snap.elapsed_secs),
        stall_str
    );
    let _ = io::stderr().flush();
}

fn print_log_progress(snap: &TelemetrySnapshot, is_stalled: bool) {
    eprintln!(
        "[HEARTBEAT] stage=\"{}\" iter={} factors={}/{} groups={}/{} elapsed={:.0}s stalled={}",
        snap.stage.as_str(),
        snap.current_iteration,
        snap.factors_committed,
        snap.target_factors,
        snap.groups_evaluated,
        snap.total_groups,
        snap.elapsed_secs,
        is_stalled
    );
}
