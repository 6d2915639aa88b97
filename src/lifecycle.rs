//! Process lifecycle: termination requests, the uptime budget and exit codes.
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const EXIT_OK: i32 = 0;
pub const EXIT_UPTIME_BUDGET: i32 = 75;
pub const EXIT_LOGGER: i32 = 100;
pub const EXIT_CONFIGURATION: i32 = 101;
pub const EXIT_ARCHIVE_DIRECTORY: i32 = 201;
pub const EXIT_THREAD_SPAWN: i32 = 202;
pub const EXIT_HTTP: i32 = 203;
pub const EXIT_THREAD_JOIN: i32 = 301;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// How the process ends once the uptime budget is used up.
pub enum TerminationPolicy {
    /// Exit at once, without draining requests or stopping the archiver.
    Immediate,
    /// Request a shutdown and exit forcibly only if it takes longer than the grace period.
    Graceful,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        TerminationPolicy::Graceful
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the process lifecycle.
pub struct LifecycleParameters {
    /// Seconds after start at which the process ends. Unset means no limit.
    #[serde(default)]
    pub uptime_budget_secs: Option<u64>,
    #[serde(default)]
    pub termination: TerminationPolicy,
    /// Seconds a graceful termination may take before the process is exited anyway.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_grace_secs() -> u64 {
    10
}

impl Default for LifecycleParameters {
    fn default() -> Self {
        LifecycleParameters {
            uptime_budget_secs: None,
            termination: TerminationPolicy::default(),
            grace_secs: default_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminationReason {
    Running = 0,
    Interrupted = 1,
    UptimeBudget = 2,
    Failed = 3,
}

impl TerminationReason {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TerminationReason::Interrupted,
            2 => TerminationReason::UptimeBudget,
            3 => TerminationReason::Failed,
            _ => TerminationReason::Running,
        }
    }
}

/// Termination flag shared by every thread of the process.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    started: Instant,
    finished: Arc<AtomicBool>,
    reason: Arc<AtomicU8>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            started: Instant::now(),
            finished: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(AtomicU8::new(TerminationReason::Running as u8)),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// The flag handed to worker threads.
    pub fn finish_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    pub fn is_terminating(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Requests termination. Only the first reason is kept.
    pub fn terminate(&self, reason: TerminationReason) {
        let _ = self.reason.compare_exchange(
            TerminationReason::Running as u8,
            reason as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn reason(&self) -> TerminationReason {
        TerminationReason::from_u8(self.reason.load(Ordering::SeqCst))
    }

    pub fn exit_code(&self) -> i32 {
        match self.reason() {
            TerminationReason::Running | TerminationReason::Interrupted => EXIT_OK,
            TerminationReason::UptimeBudget => EXIT_UPTIME_BUDGET,
            TerminationReason::Failed => EXIT_HTTP,
        }
    }

    /// Resolves once termination was requested.
    pub async fn shutdown_signal(self) {
        while !self.is_terminating() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        log::info!(target: "irrigd::lifecycle", "Shutdown requested: {:?}", self.reason());
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::new()
    }
}

/// Sleeps until `deadline` in short slices.
///
/// # Returns
///
/// * `false` if `lifecycle` started terminating first.
///
fn wait_until(deadline: Instant, lifecycle: &Lifecycle) -> bool {
    loop {
        if lifecycle.is_terminating() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleep(std::cmp::min(POLL_INTERVAL, deadline - now));
    }
}

/// Thread function enforcing the uptime budget.
///
/// Returns without side effects when the process starts terminating before the budget is
/// used up.
///
/// # Arguments
///
/// * `budget` - Uptime measured from `lifecycle.started()`.
///
/// * `policy` - How to end the process once the budget is used up.
///
/// * `grace` - Time a graceful termination may take.
///
/// * `lifecycle` - The process lifecycle.
///
/// * `exit` - Ends the process. `std::process::exit` outside of tests.
///
pub fn uptime_thread(
    budget: Duration,
    policy: TerminationPolicy,
    grace: Duration,
    lifecycle: Lifecycle,
    exit: fn(i32),
) {
    log::info!(
        target: "irrigd::lifecycle",
        "Uptime budget of {}s armed ({:?})",
        budget.as_secs(),
        policy
    );

    if !wait_until(lifecycle.started() + budget, &lifecycle) {
        log::debug!(target: "irrigd::lifecycle", "Uptime budget disarmed");
        return;
    }

    match policy {
        TerminationPolicy::Immediate => {
            log::error!(
                target: "irrigd::lifecycle",
                "Uptime budget of {}s used up, exiting immediately",
                budget.as_secs()
            );
            log::logger().flush();
            exit(EXIT_UPTIME_BUDGET);
        }
        TerminationPolicy::Graceful => {
            log::warn!(
                target: "irrigd::lifecycle",
                "Uptime budget of {}s used up, shutting down",
                budget.as_secs()
            );
            lifecycle.terminate(TerminationReason::UptimeBudget);

            sleep(grace);
            log::error!(
                target: "irrigd::lifecycle",
                "Shutdown did not finish within {}s, exiting",
                grace.as_secs()
            );
            log::logger().flush();
            exit(EXIT_UPTIME_BUDGET);
        }
    }
}
