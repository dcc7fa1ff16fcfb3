//! Rolling history of executed moves and the stats derived from it.

use crate::engine::WindowListener;
use crowdplay_common::{DispatchError, LastMoveResult, WindowClosed};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Summary over the retained history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteStats {
    pub total_moves: usize,
    pub total_votes: f64,
    /// Weighted votes per move, rounded to 2 decimals
    pub average_votes: f64,
    /// vote-key -> times it won
    pub popular_commands: BTreeMap<String, u32>,
}

/// Keeps the last `limit` winning results, oldest first
pub struct HistoryRecorder {
    limit: usize,
    moves: Mutex<VecDeque<LastMoveResult>>,
}

impl HistoryRecorder {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            moves: Mutex::new(VecDeque::with_capacity(limit.max(1))),
        }
    }

    pub fn record(&self, result: LastMoveResult) {
        let mut moves = self.moves.lock().unwrap_or_else(|e| e.into_inner());
        moves.push_back(result);
        while moves.len() > self.limit {
            moves.pop_front();
        }
    }

    pub fn history(&self) -> Vec<LastMoveResult> {
        let moves = self.moves.lock().unwrap_or_else(|e| e.into_inner());
        moves.iter().cloned().collect()
    }

    pub fn stats(&self) -> VoteStats {
        let moves = self.moves.lock().unwrap_or_else(|e| e.into_inner());
        if moves.is_empty() {
            return VoteStats {
                total_moves: 0,
                total_votes: 0.0,
                average_votes: 0.0,
                popular_commands: BTreeMap::new(),
            };
        }

        let total_moves = moves.len();
        let total_votes: f64 = moves.iter().map(|m| m.total_votes).sum();
        let average = total_votes / total_moves as f64;

        let mut popular_commands = BTreeMap::new();
        for m in moves.iter() {
            *popular_commands.entry(m.vote_key.clone()).or_insert(0) += 1;
        }

        VoteStats {
            total_moves,
            total_votes,
            average_votes: (average * 100.0).round() / 100.0,
            popular_commands,
        }
    }
}

impl WindowListener for HistoryRecorder {
    fn on_window_closed(&self, closed: &WindowClosed) -> Result<(), DispatchError> {
        if let Some(result) = &closed.result {
            self.record(result.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crowdplay_common::NormalizedCommand;

    fn result(window_id: u64, key: &str, total_votes: f64) -> LastMoveResult {
        LastMoveResult {
            window_id,
            vote_key: key.to_string(),
            command: NormalizedCommand::press(key),
            votes_for_winner: total_votes,
            total_votes,
            ballots_for_winner: 1,
            total_ballots: 1,
            first_voter: "x".to_string(),
            tied: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_empty_stats() {
        let stats = HistoryRecorder::new(50).stats();
        assert_eq!(stats.total_moves, 0);
        assert_eq!(stats.average_votes, 0.0);
        assert!(stats.popular_commands.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let history = HistoryRecorder::new(3);
        for id in 1..=5 {
            history.record(result(id, "a", 1.0));
        }
        let ids: Vec<u64> = history.history().iter().map(|m| m.window_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_stats() {
        let history = HistoryRecorder::new(50);
        history.record(result(1, "up", 2.0));
        history.record(result(2, "up", 1.0));
        history.record(result(3, "a", 1.0));

        let stats = history.stats();
        assert_eq!(stats.total_moves, 3);
        assert_eq!(stats.total_votes, 4.0);
        assert_eq!(stats.average_votes, 1.33);
        assert_eq!(stats.popular_commands.get("up"), Some(&2));
        assert_eq!(stats.popular_commands.get("a"), Some(&1));
    }

    #[test]
    fn test_empty_windows_are_not_recorded() {
        let history = HistoryRecorder::new(50);
        let closed = WindowClosed {
            window_id: 1,
            result: None,
            tally: BTreeMap::new(),
        };
        history.on_window_closed(&closed).unwrap();
        assert!(history.history().is_empty());
    }
}
