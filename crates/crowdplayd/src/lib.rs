//! crowdplayd - async vote engine and chat host.
//!
//! [`engine::VoteEngine`] runs the vote windows on a tokio runtime. The
//! host modules wire it to chat input, a JSON Lines command sink for the
//! emulator bridge, and move history.

pub mod dispatch;
pub mod engine;
pub mod history;
pub mod intake;

pub use dispatch::{Dispatcher, JsonLinesSink, SinkEvent};
pub use engine::{Submission, VoteEngine, VoteStatus, WindowListener};
pub use history::{HistoryRecorder, VoteStats};
pub use intake::{parse_line, run_intake, Host, IntakeLine, Reply};
