//! Window-close fan-out and the JSON Lines command sink.
//!
//! The engine calls one [`WindowListener`]. The [`Dispatcher`] is that
//! listener: it forwards each closed window to every registered consumer
//! (input bridge, history, overlays) and isolates their failures.

use crate::engine::WindowListener;
use chrono::{DateTime, Utc};
use crowdplay_common::{ControlConfig, DispatchError, NormalizedCommand, WindowClosed};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// ============================================================================
// FAN-OUT
// ============================================================================

/// Named listeners called in registration order
#[derive(Default)]
pub struct Dispatcher {
    listeners: Vec<(String, Arc<dyn WindowListener>)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, listener: Arc<dyn WindowListener>) {
        let name = name.into();
        debug!("Registered window listener: {}", name);
        self.listeners.push((name, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl WindowListener for Dispatcher {
    /// Every listener is called even when an earlier one fails.
    /// Errors only when all of them failed.
    fn on_window_closed(&self, closed: &WindowClosed) -> Result<(), DispatchError> {
        let mut failures = Vec::new();

        for (name, listener) in &self.listeners {
            if let Err(e) = listener.on_window_closed(closed) {
                warn!("Listener {} failed on window {}: {}", name, closed.window_id, e);
                failures.push(name.as_str());
            }
        }

        if !self.listeners.is_empty() && failures.len() == self.listeners.len() {
            return Err(DispatchError::Rejected(format!(
                "all listeners failed: {}",
                failures.join(", ")
            )));
        }
        Ok(())
    }
}

// ============================================================================
// JSON LINES SINK
// ============================================================================

/// One line written by [`JsonLinesSink`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent<'a> {
    WindowClosed {
        window_id: u64,
        command: &'a NormalizedCommand,
        /// Device input bound to the winning key
        input: Option<&'a str>,
        first_voter: &'a str,
        votes: f64,
        total_votes: f64,
        tied: usize,
        timestamp: DateTime<Utc>,
    },
    PassThrough {
        command: &'a NormalizedCommand,
        user: &'a str,
        timestamp: DateTime<Utc>,
    },
}

/// Writes winning commands as JSON Lines for an external input bridge
pub struct JsonLinesSink<W: Write + Send> {
    controls: ControlConfig,
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(controls: ControlConfig, out: W) -> Self {
        Self {
            controls,
            out: Mutex::new(out),
        }
    }

    /// Forward a non-votable command (release) straight to the bridge
    pub fn pass_through(&self, command: &NormalizedCommand, user: &str) -> Result<(), DispatchError> {
        self.write_event(&SinkEvent::PassThrough {
            command,
            user,
            timestamp: Utc::now(),
        })
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_event(&self, event: &SinkEvent<'_>) -> Result<(), DispatchError> {
        let line = serde_json::to_string(event)?;
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> WindowListener for JsonLinesSink<W> {
    fn on_window_closed(&self, closed: &WindowClosed) -> Result<(), DispatchError> {
        let Some(result) = &closed.result else {
            return Ok(());
        };

        let input = result
            .command
            .key()
            .and_then(|key| self.controls.input_for(key));
        if input.is_none() {
            warn!("No device input bound for {}", result.command);
        }

        self.write_event(&SinkEvent::WindowClosed {
            window_id: closed.window_id,
            command: &result.command,
            input,
            first_voter: &result.first_voter,
            votes: result.votes_for_winner,
            total_votes: result.total_votes,
            tied: result.tied,
            timestamp: result.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdplay_common::LastMoveResult;
    use std::collections::BTreeMap;

    struct Failing;

    impl WindowListener for Failing {
        fn on_window_closed(&self, _closed: &WindowClosed) -> Result<(), DispatchError> {
            Err(DispatchError::Rejected("bridge offline".to_string()))
        }
    }

    #[derive(Default)]
    struct Counting {
        calls: Mutex<u32>,
    }

    impl WindowListener for Counting {
        fn on_window_closed(&self, _closed: &WindowClosed) -> Result<(), DispatchError> {
            *self.calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn closed(command: NormalizedCommand) -> WindowClosed {
        let key = command.key().unwrap().to_string();
        WindowClosed {
            window_id: 4,
            tally: BTreeMap::from([(key.clone(), 2.0)]),
            result: Some(LastMoveResult {
                window_id: 4,
                vote_key: key,
                command,
                votes_for_winner: 2.0,
                total_votes: 2.0,
                ballots_for_winner: 2,
                total_ballots: 2,
                first_voter: "alice".to_string(),
                tied: 1,
                timestamp: Utc::now(),
            }),
        }
    }

    #[test]
    fn test_failure_does_not_block_others() {
        let counting = Arc::new(Counting::default());
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("bridge", Arc::new(Failing));
        dispatcher.register("history", counting.clone());

        assert!(dispatcher.on_window_closed(&closed(NormalizedCommand::press("a"))).is_ok());
        assert_eq!(*counting.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_all_failing_is_an_error() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("bridge", Arc::new(Failing));
        assert!(dispatcher.on_window_closed(&closed(NormalizedCommand::press("a"))).is_err());
        assert!(Dispatcher::new().on_window_closed(&closed(NormalizedCommand::press("a"))).is_ok());
    }

    #[test]
    fn test_sink_writes_json_line() {
        let sink = JsonLinesSink::new(ControlConfig::default(), Vec::new());
        sink.on_window_closed(&closed(NormalizedCommand::hold("b", 1200)))
            .unwrap();
        sink.pass_through(&NormalizedCommand::ReleaseAll, "bob").unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["event"], "window_closed");
        assert_eq!(lines[0]["input"], "Z");
        assert_eq!(lines[0]["command"]["kind"], "hold");
        assert_eq!(lines[0]["command"]["duration_ms"], 1200);
        assert_eq!(lines[0]["first_voter"], "alice");

        assert_eq!(lines[1]["event"], "pass_through");
        assert_eq!(lines[1]["command"]["kind"], "release_all");
    }
}
