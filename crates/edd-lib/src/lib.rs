//! EDD Core Library - log-driven agent evaluation
//!
//! This library evaluates a conversational agent from its append-only event
//! log:
//! - Event reading and per-session trace reconstruction
//! - Declarative case evaluation with per-check breakdowns
//! - Report building with threshold verdicts, report diffing, case mining
//! - Live log tailing for the runner's watch loop

pub mod case;
pub mod diff;
pub mod engine;
pub mod error;
pub mod event;
pub mod loader;
pub mod mine;
pub mod report;
pub mod session;
pub mod trace;
pub mod watcher;

// Re-export main types for convenience
pub use case::{ArgValue, Assertion, Case, CaseSpec, EvalType};
pub use diff::{diff, Diff};
pub use engine::{evaluate, CaseResult, Check};
pub use error::{EddError, EddResult};
pub use event::{day_log_path, read_log_dir, read_log_file, Event, EventType, LineParser};
pub use loader::load_cases;
pub use mine::{mine_sessions, mine_trace, MinedCase, MinerConfig};
pub use report::{Report, RunVerdict, Thresholds};
pub use session::SessionStore;
pub use trace::{Trace, ToolInvocation};
pub use watcher::{LogTailer, LogWatcher, WatcherHandle};
