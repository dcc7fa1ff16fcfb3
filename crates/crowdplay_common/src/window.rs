//! Vote window state machine.
//!
//! ```text
//!   Idle --open--> Collecting --close--> Closing --open--> Collecting ...
//!     ^                |                    |
//!     +------stop------+--------stop--------+
//! ```
//!
//! This type is synchronous and clock-free: callers pass `now` in and
//! own the actual timer. The window only records when its deadline is
//! due, which it sets on the first accepted vote (lazy arming) or on
//! open (immediate arming).

use crate::command::NormalizedCommand;
use crate::config::{Arming, CommandVariant, ControlConfig, VotingConfig};
use crate::error::VoteRejected;
use crate::tally::Tally;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Lifecycle state of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    Idle,
    Collecting,
    Closing,
}

impl WindowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowState::Idle => "idle",
            WindowState::Collecting => "collecting",
            WindowState::Closing => "closing",
        }
    }
}

/// Proof that a vote was counted
#[derive(Debug, Clone, PartialEq)]
pub struct VoteReceipt {
    pub window_id: u64,
    pub vote_key: String,
    pub weight: f64,
    /// This user is now the first voter for `vote_key`
    pub first_for_key: bool,
    /// Deadline armed by this vote, if it was the window's first
    pub armed: Option<Instant>,
}

/// Outcome of one closed window that had a winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMoveResult {
    pub window_id: u64,
    pub vote_key: String,
    /// Command to execute; keeps hold duration / momentum intensity
    pub command: NormalizedCommand,
    /// Weighted votes for the winner
    pub votes_for_winner: f64,
    /// Weighted votes across every key in the window
    pub total_votes: f64,
    pub ballots_for_winner: u32,
    pub total_ballots: u32,
    pub first_voter: String,
    /// Keys sharing the top weight; >1 means a random tie-break happened
    pub tied: usize,
    pub timestamp: DateTime<Utc>,
}

/// Everything emitted when a window closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowClosed {
    pub window_id: u64,
    /// None when the window closed without votes
    pub result: Option<LastMoveResult>,
    /// vote-key -> weight at close
    pub tally: BTreeMap<String, f64>,
}

impl WindowClosed {
    pub fn winning_command(&self) -> Option<&NormalizedCommand> {
        self.result.as_ref().map(|r| &r.command)
    }

    pub fn first_voter(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.first_voter.as_str())
    }
}

pub struct VoteWindow {
    duration: Duration,
    arming: Arming,
    variant: CommandVariant,
    votable: BTreeSet<String>,
    state: WindowState,
    window_id: u64,
    tally: Tally,
    deadline: Option<Instant>,
    opened_at: Option<DateTime<Utc>>,
    last_result: Option<LastMoveResult>,
}

impl VoteWindow {
    pub fn new(voting: &VotingConfig, controls: &ControlConfig) -> Self {
        Self {
            duration: voting.duration(),
            arming: voting.arming,
            variant: voting.command_variant,
            votable: voting.votable_keys(controls),
            state: WindowState::Idle,
            window_id: 0,
            tally: Tally::new(),
            deadline: None,
            opened_at: None,
            last_result: None,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn last_result(&self) -> Option<&LastMoveResult> {
        self.last_result.as_ref()
    }

    pub fn is_votable(&self, vote_key: &str) -> bool {
        self.votable.contains(vote_key)
    }

    /// Time until the deadline, zero once it is due, None when unarmed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Start a fresh Collecting phase. Returns the deadline when arming
    /// is immediate.
    pub fn open(&mut self, now: Instant) -> Option<Instant> {
        self.window_id += 1;
        self.state = WindowState::Collecting;
        self.tally.clear();
        self.opened_at = Some(Utc::now());
        self.deadline = match self.arming {
            Arming::Immediate => Some(now + self.duration),
            Arming::Lazy => None,
        };
        info!("New voting period started (window {})", self.window_id);
        self.deadline
    }

    /// Count a vote with an already-resolved weight.
    ///
    /// Rejections leave the window untouched.
    pub fn add_vote(
        &mut self,
        command: &NormalizedCommand,
        user: &str,
        weight: f64,
        now: Instant,
    ) -> Result<VoteReceipt, VoteRejected> {
        if self.state != WindowState::Collecting {
            return Err(VoteRejected::NotCollecting);
        }
        let vote_key = match command {
            NormalizedCommand::Invalid => return Err(VoteRejected::InvalidCommand),
            NormalizedCommand::ReleaseAll => return Err(VoteRejected::ReleaseNotVotable),
            other => other.vote_key().ok_or(VoteRejected::InvalidCommand)?,
        };
        if !self.votable.contains(vote_key) {
            return Err(VoteRejected::NotVotable(vote_key.to_string()));
        }

        let armed = if self.deadline.is_none() && self.tally.is_empty() {
            let deadline = now + self.duration;
            self.deadline = Some(deadline);
            info!(
                "First vote received, starting {}s countdown",
                self.duration.as_secs_f64()
            );
            Some(deadline)
        } else {
            None
        };

        let first_for_key = self
            .tally
            .record(vote_key, command, user, weight, self.variant);

        debug!("Vote: {} (+{}) from {}", command, weight, user);

        Ok(VoteReceipt {
            window_id: self.window_id,
            vote_key: vote_key.to_string(),
            weight,
            first_for_key,
            armed,
        })
    }

    /// Close the Collecting phase and pick a winner.
    ///
    /// Returns None unless the window is Collecting. The window stays in
    /// Closing until the next `open` or `stop`.
    pub fn close<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<WindowClosed> {
        if self.state != WindowState::Collecting {
            return None;
        }
        self.state = WindowState::Closing;
        self.deadline = None;

        let tally = self.tally.snapshot();
        let total_votes = self.tally.total_weight();
        let total_ballots = self.tally.total_ballots();

        let result = self.tally.winner(rng).map(|winner| LastMoveResult {
            window_id: self.window_id,
            vote_key: winner.key.to_string(),
            command: winner.entry.command.clone(),
            votes_for_winner: winner.entry.weight,
            total_votes,
            ballots_for_winner: winner.entry.ballots,
            total_ballots,
            first_voter: winner.entry.first_voter.clone(),
            tied: winner.tied,
            timestamp: Utc::now(),
        });

        match &result {
            Some(r) => {
                info!(
                    "Vote complete: {} wins with {} of {} votes (first voter {})",
                    r.command, r.votes_for_winner, r.total_votes, r.first_voter
                );
                self.last_result = Some(r.clone());
            }
            None => info!("No votes received, skipping move"),
        }

        Some(WindowClosed {
            window_id: self.window_id,
            result,
            tally,
        })
    }

    /// Drop the in-flight tally and go Idle
    pub fn stop(&mut self) {
        if self.state != WindowState::Idle {
            info!(
                "Voting stopped, discarding window {} ({} keys)",
                self.window_id,
                self.tally.len()
            );
        }
        self.state = WindowState::Idle;
        self.deadline = None;
        self.tally.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn window() -> VoteWindow {
        VoteWindow::new(&VotingConfig::default(), &ControlConfig::default())
    }

    #[test]
    fn test_starts_idle_and_rejects_votes() {
        let mut w = window();
        assert_eq!(w.state(), WindowState::Idle);
        let err = w
            .add_vote(&NormalizedCommand::press("a"), "x", 1.0, Instant::now())
            .unwrap_err();
        assert_eq!(err, VoteRejected::NotCollecting);
        assert!(w.deadline().is_none());
    }

    #[test]
    fn test_lazy_arming() {
        let mut w = window();
        let t0 = Instant::now();
        assert_eq!(w.open(t0), None);
        assert!(w.deadline().is_none());

        let t1 = t0 + Duration::from_secs(30);
        let receipt = w.add_vote(&NormalizedCommand::press("a"), "x", 1.0, t1).unwrap();
        assert_eq!(receipt.armed, Some(t1 + Duration::from_secs(8)));
        assert_eq!(w.deadline(), receipt.armed);

        let second = w
            .add_vote(&NormalizedCommand::press("b"), "y", 1.0, t1 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(second.armed, None);
        assert_eq!(w.deadline(), receipt.armed);
    }

    #[test]
    fn test_immediate_arming() {
        let voting = VotingConfig {
            arming: Arming::Immediate,
            ..VotingConfig::default()
        };
        let mut w = VoteWindow::new(&voting, &ControlConfig::default());
        let t0 = Instant::now();
        assert_eq!(w.open(t0), Some(t0 + voting.duration()));
        let receipt = w.add_vote(&NormalizedCommand::press("a"), "x", 1.0, t0).unwrap();
        assert_eq!(receipt.armed, None);
    }

    #[test]
    fn test_rejections_leave_state_untouched() {
        let mut w = window();
        w.open(Instant::now());
        let now = Instant::now();
        assert_eq!(
            w.add_vote(&NormalizedCommand::Invalid, "x", 1.0, now),
            Err(VoteRejected::InvalidCommand)
        );
        assert_eq!(
            w.add_vote(&NormalizedCommand::ReleaseAll, "x", 1.0, now),
            Err(VoteRejected::ReleaseNotVotable)
        );
        assert_eq!(
            w.add_vote(&NormalizedCommand::press("cup"), "x", 1.0, now),
            Err(VoteRejected::NotVotable("cup".to_string()))
        );
        assert!(w.tally().is_empty());
        assert!(w.deadline().is_none());
    }

    #[test]
    fn test_votable_subset() {
        let voting = VotingConfig {
            votable: vec!["a".to_string(), "b".to_string()],
            ..VotingConfig::default()
        };
        let mut w = VoteWindow::new(&voting, &ControlConfig::default());
        w.open(Instant::now());
        assert!(w.add_vote(&NormalizedCommand::press("a"), "x", 1.0, Instant::now()).is_ok());
        assert!(matches!(
            w.add_vote(&NormalizedCommand::press("start"), "x", 1.0, Instant::now()),
            Err(VoteRejected::NotVotable(_))
        ));
    }

    #[test]
    fn test_close_picks_winner_and_keeps_hold() {
        let mut w = window();
        let now = Instant::now();
        w.open(now);
        w.add_vote(&NormalizedCommand::hold("b", 1200), "x", 1.0, now).unwrap();
        w.add_vote(&NormalizedCommand::press("b"), "y", 1.0, now).unwrap();
        w.add_vote(&NormalizedCommand::press("a"), "z", 1.0, now).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let closed = w.close(&mut rng).unwrap();
        let result = closed.result.as_ref().unwrap();
        assert_eq!(result.command, NormalizedCommand::hold("b", 1200));
        assert_eq!(result.votes_for_winner, 2.0);
        assert_eq!(result.total_votes, 3.0);
        assert_eq!(result.first_voter, "x");
        assert_eq!(closed.tally.len(), 2);
        assert_eq!(w.state(), WindowState::Closing);
        assert!(w.deadline().is_none());
        assert_eq!(w.last_result(), Some(result));
    }

    #[test]
    fn test_close_empty_window() {
        let mut w = window();
        w.open(Instant::now());
        let mut rng = StdRng::seed_from_u64(3);
        let closed = w.close(&mut rng).unwrap();
        assert!(closed.result.is_none());
        assert!(w.last_result().is_none());
        // Second close is a no-op
        assert!(w.close(&mut rng).is_none());
    }

    #[test]
    fn test_open_resets_tally() {
        let mut w = window();
        let now = Instant::now();
        w.open(now);
        w.add_vote(&NormalizedCommand::press("a"), "x", 1.0, now).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        w.close(&mut rng);
        w.open(now);
        assert_eq!(w.window_id(), 2);
        assert!(w.tally().is_empty());
        assert!(w.deadline().is_none());
        // Last result survives into the next window
        assert!(w.last_result().is_some());
    }

    #[test]
    fn test_stop_discards_and_goes_idle() {
        let mut w = window();
        let now = Instant::now();
        w.open(now);
        w.add_vote(&NormalizedCommand::press("a"), "x", 1.0, now).unwrap();
        w.stop();
        assert_eq!(w.state(), WindowState::Idle);
        assert!(w.deadline().is_none());
        assert!(w.tally().is_empty());
    }
}
