//! crowdplay common - command normalization and vote tallying.
//!
//! Turns chat text into typed control commands and runs the weighted
//! vote window that picks one command per round. Everything here is
//! synchronous; the async engine and host glue live in `crowdplayd`.

pub mod command;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod tally;
pub mod weight;
pub mod window;

pub use command::{CommandKind, NormalizedCommand};
pub use config::{Arming, CommandVariant, Config, ControlConfig, VotingConfig, WeightConfig};
pub use error::{ConfigError, DispatchError, VoteRejected, WeightError};
pub use normalizer::{catalog, normalize, CommandCatalog};
pub use tally::{Tally, TallyEntry};
pub use weight::{effective_weight, BoostTable, FixedWeight, MaxOf, PurchaseTiers, WeightResolver};
pub use window::{LastMoveResult, VoteReceipt, VoteWindow, WindowClosed, WindowState};

/// Version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
