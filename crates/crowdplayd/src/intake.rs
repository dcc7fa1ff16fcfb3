//! Chat intake.
//!
//! Reads one message per line, `user: message`, from any async reader
//! (stdin in the binary). Lines starting with `#` are operator commands:
//!
//! ```text
//! #advance                        close the current window now
//! #status                         print engine status as JSON
//! #stats                          print history stats as JSON
//! #help                           print the command catalog as JSON
//! #boost <user> [<weight> <secs>] temporary weight boost
//! #purchase <user> <amount>       record a purchase for tiered weight
//! ```
//!
//! Lines are handled strictly in arrival order: each submission is
//! awaited before the next line is read.

use crate::dispatch::{Dispatcher, JsonLinesSink};
use crate::engine::{Submission, VoteEngine, VoteStatus};
use crate::history::{HistoryRecorder, VoteStats};
use anyhow::Result;
use crowdplay_common::{
    catalog, BoostTable, CommandCatalog, Config, MaxOf, PurchaseTiers, VoteRejected,
    WeightConfig, WeightResolver, WindowClosed,
};
use rand::rngs::StdRng;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Base weight of a plain chat vote
const CHAT_BASE_WEIGHT: f64 = 1.0;

/// Longest boost an operator can grant
const MAX_BOOST_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// LINE PARSING
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeLine {
    Chat { user: String, message: String },
    Advance,
    Status,
    Stats,
    Help,
    /// None fields take the configured boost defaults
    Boost {
        user: String,
        weight: Option<f64>,
        secs: Option<u64>,
    },
    Purchase { user: String, amount: f64 },
    Blank,
    Malformed(String),
}

pub fn parse_line(line: &str) -> IntakeLine {
    let line = line.trim();
    if line.is_empty() {
        return IntakeLine::Blank;
    }

    if let Some(op) = line.strip_prefix('#') {
        return parse_operator(op);
    }

    match line.split_once(':') {
        Some((user, message)) if !user.trim().is_empty() => IntakeLine::Chat {
            user: user.trim().to_string(),
            message: message.trim().to_string(),
        },
        _ => IntakeLine::Malformed(format!("expected 'user: message', got '{}'", line)),
    }
}

fn parse_operator(op: &str) -> IntakeLine {
    let parts: Vec<&str> = op.split_whitespace().collect();

    match parts.as_slice() {
        ["advance"] => IntakeLine::Advance,
        ["status"] => IntakeLine::Status,
        ["stats"] => IntakeLine::Stats,
        ["help"] => IntakeLine::Help,
        ["boost", user] => IntakeLine::Boost {
            user: user.to_string(),
            weight: None,
            secs: None,
        },
        ["boost", user, weight, secs] => match (weight.parse::<f64>(), secs.parse::<u64>()) {
            (Ok(_), Ok(s)) if s > MAX_BOOST_SECS => IntakeLine::Malformed(format!(
                "boost of {}s exceeds the {}s limit",
                s, MAX_BOOST_SECS
            )),
            (Ok(w), Ok(s)) if w.is_finite() => IntakeLine::Boost {
                user: user.to_string(),
                weight: Some(w),
                secs: Some(s),
            },
            _ => IntakeLine::Malformed(format!("bad boost arguments: {} {}", weight, secs)),
        },
        ["purchase", user, amount] => match amount.parse::<f64>() {
            Ok(a) if a.is_finite() => IntakeLine::Purchase {
                user: user.to_string(),
                amount: a,
            },
            _ => IntakeLine::Malformed(format!("bad purchase amount: {}", amount)),
        },
        _ => IntakeLine::Malformed(format!("unknown operator command: #{}", op.trim())),
    }
}

// ============================================================================
// HOST
// ============================================================================

/// What handling one line produced
#[derive(Debug, Clone)]
pub enum Reply {
    Counted { user: String, vote_key: String, weight: f64 },
    PassedThrough { user: String },
    Rejected { user: String, reason: VoteRejected },
    Advanced(Option<WindowClosed>),
    Status(VoteStatus),
    Stats(VoteStats),
    Help(CommandCatalog),
    Boosted { user: String, weight: f64, secs: u64 },
    Purchased { user: String, amount: f64 },
    Ignored,
    Malformed(String),
}

/// Engine plus everything wired around it
pub struct Host<W: Write + Send + 'static> {
    engine: VoteEngine,
    sink: Arc<JsonLinesSink<W>>,
    history: Arc<HistoryRecorder>,
    boosts: Arc<BoostTable>,
    purchases: Arc<PurchaseTiers>,
    weights: WeightConfig,
}

impl<W: Write + Send + 'static> Host<W> {
    /// Build the engine with boost and purchase weights and a dispatcher
    /// feeding `out` and the history recorder.
    pub fn new(config: &Config, out: W, rng: Option<StdRng>) -> Self {
        let sink = Arc::new(JsonLinesSink::new(config.controls.clone(), out));
        let history = Arc::new(HistoryRecorder::new(config.voting.history_limit));
        let boosts = Arc::new(BoostTable::new());
        let purchases = Arc::new(PurchaseTiers::from_config(&config.weights));

        let resolver = MaxOf::new(vec![
            boosts.clone() as Arc<dyn WeightResolver>,
            purchases.clone() as Arc<dyn WeightResolver>,
        ]);

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("bridge", sink.clone());
        dispatcher.register("history", history.clone());

        let engine = match rng {
            Some(rng) => {
                VoteEngine::with_rng(config, Arc::new(resolver), Arc::new(dispatcher), rng)
            }
            None => VoteEngine::new(config, Arc::new(resolver), Arc::new(dispatcher)),
        };

        Self {
            engine,
            sink,
            history,
            boosts,
            purchases,
            weights: config.weights.clone(),
        }
    }

    pub fn engine(&self) -> &VoteEngine {
        &self.engine
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        match parse_line(line) {
            IntakeLine::Blank => Reply::Ignored,
            IntakeLine::Malformed(reason) => Reply::Malformed(reason),
            IntakeLine::Chat { user, message } => self.handle_chat(user, &message).await,
            IntakeLine::Advance => Reply::Advanced(self.engine.force_advance().await),
            IntakeLine::Status => Reply::Status(self.engine.status().await),
            IntakeLine::Stats => Reply::Stats(self.history.stats()),
            IntakeLine::Help => Reply::Help(catalog(self.engine.controls())),
            IntakeLine::Boost { user, weight, secs } => {
                let weight = weight.unwrap_or(self.weights.boost_weight);
                let secs = secs.unwrap_or(self.weights.boost_secs);
                if !self.boosts.grant(&user, weight, Duration::from_secs(secs)) {
                    return Reply::Malformed(format!("boost of {}s is out of range", secs));
                }
                Reply::Boosted { user, weight, secs }
            }
            IntakeLine::Purchase { user, amount } => {
                self.purchases.record_purchase(&user, amount);
                Reply::Purchased { user, amount }
            }
        }
    }

    /// Stop the engine. With `drain`, the window still collecting is
    /// closed and dispatched first instead of being discarded.
    pub async fn shutdown(&self, drain: bool) -> Option<WindowClosed> {
        let closed = if drain {
            self.engine.force_advance().await
        } else {
            None
        };
        self.engine.stop().await;
        closed
    }

    async fn handle_chat(&self, user: String, message: &str) -> Reply {
        match self.engine.submit_vote(message, &user, CHAT_BASE_WEIGHT).await {
            Ok(Submission::Counted(receipt)) => Reply::Counted {
                user,
                vote_key: receipt.vote_key,
                weight: receipt.weight,
            },
            Ok(Submission::PassThrough(command)) => {
                if let Err(e) = self.sink.pass_through(&command, &user) {
                    warn!("Pass-through of {} failed: {}", command, e);
                }
                Reply::PassedThrough { user }
            }
            // Ordinary chat; not worth a log line
            Err(VoteRejected::InvalidCommand) => Reply::Ignored,
            Err(reason) => Reply::Rejected { user, reason },
        }
    }
}

// ============================================================================
// LOOP
// ============================================================================

/// Feed every line of `reader` to `host` until EOF
pub async fn run_intake<R, W>(host: &Host<W>, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send + 'static,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let reply = host.handle_line(&line).await;
        log_reply(&reply)?;
    }
    info!("Chat input closed");
    Ok(())
}

fn log_reply(reply: &Reply) -> Result<()> {
    match reply {
        Reply::Counted { user, vote_key, weight } => {
            debug!("Counted {} for {} (weight {})", vote_key, user, weight)
        }
        Reply::PassedThrough { user } => info!("Release from {} passed through", user),
        Reply::Rejected { user, reason } => {
            debug!("Vote from {} rejected ({}): {}", user, reason.code(), reason)
        }
        Reply::Advanced(Some(closed)) => match &closed.result {
            Some(r) => info!("Advanced window {}: {} wins", closed.window_id, r.command),
            None => info!("Advanced window {} with no votes", closed.window_id),
        },
        Reply::Advanced(None) => info!("Nothing to advance"),
        Reply::Status(status) => info!("Status: {}", serde_json::to_string(status)?),
        Reply::Stats(stats) => info!("Stats: {}", serde_json::to_string(stats)?),
        Reply::Help(help) => info!("Commands: {}", serde_json::to_string(help)?),
        Reply::Boosted { .. } | Reply::Purchased { .. } | Reply::Ignored => {}
        Reply::Malformed(reason) => warn!("Ignoring input line: {}", reason),
    }
    Ok(())
}
