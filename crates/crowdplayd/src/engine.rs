//! Async vote engine.
//!
//! Wraps the synchronous [`VoteWindow`] in a mutex so votes from any
//! task are applied one at a time, and owns the one live deadline timer.
//!
//! Timer rules:
//! - A window's deadline is a spawned task holding a `Weak` to the engine.
//!   Dropping the last engine handle lets it fire into nothing.
//! - Each timer carries the id of the window that armed it. A timer whose
//!   window is gone (stopped, force-advanced, replaced) does nothing.
//! - `stop` aborts the timer and any pending reopen before going Idle.

use crowdplay_common::{
    effective_weight, normalize, Config, ControlConfig, DispatchError, LastMoveResult,
    NormalizedCommand, VoteReceipt, VoteRejected, VoteWindow, WeightResolver, WindowClosed,
    WindowState,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// OUTBOUND CONTRACT
// ============================================================================

/// The single outbound callback of the engine.
///
/// Called once per window that produced a winner, outside the engine
/// lock. Implementations must return quickly; fan-out to several
/// consumers is the host's job (see `dispatch::Dispatcher`).
pub trait WindowListener: Send + Sync {
    fn on_window_closed(&self, closed: &WindowClosed) -> Result<(), DispatchError>;
}

// ============================================================================
// TYPES
// ============================================================================

/// Accepted submission
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Counted toward the current window
    Counted(VoteReceipt),
    /// Not votable; the host executes it immediately (release)
    PassThrough(NormalizedCommand),
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct VoteStatus {
    pub running: bool,
    pub state: WindowState,
    pub window_id: u64,
    pub tally: BTreeMap<String, f64>,
    pub total_ballots: u32,
    /// Milliseconds until close; None while the deadline is unarmed
    pub remaining_ms: Option<u64>,
    pub last_result: Option<LastMoveResult>,
}

struct DeadlineTimer {
    window_id: u64,
    handle: JoinHandle<()>,
}

impl DeadlineTimer {
    /// Stop the timer task
    fn cancel(self) {
        self.handle.abort();
    }

    /// Forget the handle without aborting; used by the timer task itself
    fn disarm(self) {
        drop(self.handle);
    }
}

struct EngineState {
    window: VoteWindow,
    timer: Option<DeadlineTimer>,
    reopen: Option<JoinHandle<()>>,
    running: bool,
    rng: StdRng,
}

struct EngineCore {
    controls: ControlConfig,
    cooldown: Duration,
    resolver: Arc<dyn WeightResolver>,
    listener: Arc<dyn WindowListener>,
    state: Mutex<EngineState>,
}

/// Cloneable handle to the vote engine
#[derive(Clone)]
pub struct VoteEngine {
    core: Arc<EngineCore>,
}

// ============================================================================
// ENGINE
// ============================================================================

impl VoteEngine {
    pub fn new(
        config: &Config,
        resolver: Arc<dyn WeightResolver>,
        listener: Arc<dyn WindowListener>,
    ) -> Self {
        Self::with_rng(config, resolver, listener, StdRng::from_entropy())
    }

    /// Engine with a caller-supplied tie-break RNG
    pub fn with_rng(
        config: &Config,
        resolver: Arc<dyn WeightResolver>,
        listener: Arc<dyn WindowListener>,
        rng: StdRng,
    ) -> Self {
        info!(
            "Vote engine initialized - {}s vote periods, {:?} arming",
            config.voting.duration().as_secs_f64(),
            config.voting.arming
        );
        Self {
            core: Arc::new(EngineCore {
                controls: config.controls.clone(),
                cooldown: config.voting.cooldown(),
                resolver,
                listener,
                state: Mutex::new(EngineState {
                    window: VoteWindow::new(&config.voting, &config.controls),
                    timer: None,
                    reopen: None,
                    running: false,
                    rng,
                }),
            }),
        }
    }

    pub fn controls(&self) -> &ControlConfig {
        &self.core.controls
    }

    /// Open the first window. No-op when already running.
    pub async fn start(&self) {
        let mut st = self.core.state.lock().await;
        if st.running {
            return;
        }
        st.running = true;
        open_window(&self.core, &mut st);
        info!("Voting system started");
    }

    /// Cancel the timer, discard the in-flight tally, go Idle
    pub async fn stop(&self) {
        let mut st = self.core.state.lock().await;
        st.running = false;
        if let Some(timer) = st.timer.take() {
            timer.cancel();
        }
        if let Some(reopen) = st.reopen.take() {
            reopen.abort();
        }
        st.window.stop();
        info!("Voting system stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.core.state.lock().await.running
    }

    /// Normalize raw chat text and vote with it
    pub async fn submit_vote(
        &self,
        raw_text: &str,
        user: &str,
        base_weight: f64,
    ) -> Result<Submission, VoteRejected> {
        let command = normalize(raw_text, &self.core.controls);
        self.add_vote(command, user, base_weight).await
    }

    /// Vote with an already-normalized command
    pub async fn add_vote(
        &self,
        command: NormalizedCommand,
        user: &str,
        base_weight: f64,
    ) -> Result<Submission, VoteRejected> {
        match command {
            NormalizedCommand::Invalid => return Err(VoteRejected::InvalidCommand),
            NormalizedCommand::ReleaseAll => {
                return if self.is_running().await {
                    debug!("Release from {} passed through", user);
                    Ok(Submission::PassThrough(command))
                } else {
                    Err(VoteRejected::NotCollecting)
                };
            }
            _ => {}
        }

        // Resolved outside the lock so a slow source cannot stall other voters
        let weight = effective_weight(base_weight, self.core.resolver.as_ref(), user);

        let mut st = self.core.state.lock().await;
        let receipt = st.window.add_vote(&command, user, weight, Instant::now())?;
        if let Some(deadline) = receipt.armed {
            arm_timer(&self.core, &mut st, receipt.window_id, deadline);
        }
        Ok(Submission::Counted(receipt))
    }

    /// Close the current window now, with or without votes.
    ///
    /// Returns what was closed, or None when nothing was collecting.
    pub async fn force_advance(&self) -> Option<WindowClosed> {
        info!("Force advance requested");
        close_window(&self.core, None).await
    }

    pub async fn status(&self) -> VoteStatus {
        let st = self.core.state.lock().await;
        let tally = st.window.tally();
        VoteStatus {
            running: st.running,
            state: st.window.state(),
            window_id: st.window.window_id(),
            tally: tally.snapshot(),
            total_ballots: tally.total_ballots(),
            remaining_ms: st
                .window
                .remaining(Instant::now())
                .map(|d| d.as_millis() as u64),
            last_result: st.window.last_result().cloned(),
        }
    }

    pub async fn last_result(&self) -> Option<LastMoveResult> {
        self.core.state.lock().await.window.last_result().cloned()
    }
}

// ============================================================================
// LIFECYCLE HELPERS (called with the state lock held, except close_window)
// ============================================================================

fn open_window(core: &Arc<EngineCore>, st: &mut EngineState) {
    if let Some(timer) = st.timer.take() {
        timer.cancel();
    }
    if let Some(deadline) = st.window.open(Instant::now()) {
        let window_id = st.window.window_id();
        arm_timer(core, st, window_id, deadline);
    }
}

fn arm_timer(core: &Arc<EngineCore>, st: &mut EngineState, window_id: u64, deadline: Instant) {
    if let Some(old) = st.timer.take() {
        old.cancel();
    }

    let weak: Weak<EngineCore> = Arc::downgrade(core);
    let handle = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if let Some(core) = weak.upgrade() {
            close_window(&core, Some(window_id)).await;
        }
    });

    debug!("Deadline armed for window {}", window_id);
    st.timer = Some(DeadlineTimer { window_id, handle });
}

/// Close the Collecting window and schedule the next one.
///
/// `expected` is the window id of a firing deadline timer; None means an
/// operator-triggered close.
async fn close_window(core: &Arc<EngineCore>, expected: Option<u64>) -> Option<WindowClosed> {
    let closed = {
        let mut st = core.state.lock().await;
        if !st.running || st.window.state() != WindowState::Collecting {
            return None;
        }

        match expected {
            Some(id) => {
                if st.window.window_id() != id {
                    debug!("Stale deadline for window {} ignored", id);
                    return None;
                }
                if let Some(timer) = st.timer.take() {
                    if timer.window_id == id {
                        timer.disarm();
                    } else {
                        timer.cancel();
                    }
                }
            }
            None => {
                if let Some(timer) = st.timer.take() {
                    timer.cancel();
                }
            }
        }

        let EngineState { window, rng, .. } = &mut *st;
        let closed = window.close(rng)?;
        schedule_reopen(core, &mut st, closed.window_id);
        closed
    };

    if closed.result.is_some() {
        if let Err(e) = core.listener.on_window_closed(&closed) {
            error!("Dispatch failed for window {}: {}", closed.window_id, e);
        }
    }

    Some(closed)
}

fn schedule_reopen(core: &Arc<EngineCore>, st: &mut EngineState, closed_id: u64) {
    let weak: Weak<EngineCore> = Arc::downgrade(core);
    let cooldown = core.cooldown;

    let handle = tokio::spawn(async move {
        tokio::time::sleep(cooldown).await;
        let Some(core) = weak.upgrade() else {
            return;
        };
        let mut st = core.state.lock().await;
        if !st.running
            || st.window.state() != WindowState::Closing
            || st.window.window_id() != closed_id
        {
            warn!("Skipping reopen after window {}: engine moved on", closed_id);
            return;
        }
        st.reopen = None;
        open_window(&core, &mut st);
    });

    if let Some(old) = st.reopen.replace(handle) {
        old.abort();
    }
}
