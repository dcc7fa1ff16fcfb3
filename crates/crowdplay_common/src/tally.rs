//! Weighted vote tally for one window.
//!
//! Weight, first voter and dispatch command live in one entry per
//! vote-key, so the three can never disagree about which keys exist.

use crate::command::NormalizedCommand;
use crate::config::CommandVariant;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Accumulated state of one vote-key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyEntry {
    /// Sum of applied weights
    pub weight: f64,
    /// Accepted ballots, regardless of weight
    pub ballots: u32,
    /// User whose vote for this key was accepted first
    pub first_voter: String,
    /// Full command dispatched if this key wins
    pub command: NormalizedCommand,
}

/// Winner of a tally
#[derive(Debug, Clone, PartialEq)]
pub struct TallyWinner<'a> {
    pub key: &'a str,
    pub entry: &'a TallyEntry,
    /// Number of keys that shared the top weight (1 = no tie)
    pub tied: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Tally {
    entries: BTreeMap<String, TallyEntry>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a weighted vote. Returns true when it is the first for `vote_key`.
    pub fn record(
        &mut self,
        vote_key: &str,
        command: &NormalizedCommand,
        user: &str,
        weight: f64,
        variant: CommandVariant,
    ) -> bool {
        match self.entries.get_mut(vote_key) {
            Some(entry) => {
                entry.weight += weight;
                entry.ballots += 1;
                if variant == CommandVariant::Last {
                    entry.command = command.clone();
                }
                false
            }
            None => {
                self.entries.insert(
                    vote_key.to_string(),
                    TallyEntry {
                        weight,
                        ballots: 1,
                        first_voter: user.to_string(),
                        command: command.clone(),
                    },
                );
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, vote_key: &str) -> Option<&TallyEntry> {
        self.entries.get(vote_key)
    }

    pub fn weight(&self, vote_key: &str) -> f64 {
        self.entries.get(vote_key).map(|e| e.weight).unwrap_or(0.0)
    }

    pub fn first_voter(&self, vote_key: &str) -> Option<&str> {
        self.entries.get(vote_key).map(|e| e.first_voter.as_str())
    }

    pub fn total_weight(&self) -> f64 {
        self.entries.values().map(|e| e.weight).sum()
    }

    pub fn total_ballots(&self) -> u32 {
        self.entries.values().map(|e| e.ballots).sum()
    }

    /// vote-key -> accumulated weight
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.weight))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &TallyEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Highest-weight key; ties broken uniformly at random with `rng`.
    ///
    /// Weights compare exactly: configured weights are small binary
    /// fractions, so equal vote totals sum to equal floats.
    pub fn winner<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TallyWinner<'_>> {
        let max = self
            .entries
            .values()
            .map(|e| e.weight)
            .fold(f64::NEG_INFINITY, f64::max);

        let leaders: Vec<(&String, &TallyEntry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.weight == max)
            .collect();

        let &(key, entry) = leaders.choose(rng)?;
        if leaders.len() > 1 {
            debug!(
                "Tie between {} commands at weight {}, randomly chose: {}",
                leaders.len(),
                max,
                key
            );
        }

        Some(TallyWinner {
            key: key.as_str(),
            entry,
            tied: leaders.len(),
        })
    }
}
