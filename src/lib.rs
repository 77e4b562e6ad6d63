//! Review gate: lets a coding agent stop and ask a human, over plain files.
//!
//! The agent drops a trigger file into a shared directory. Every open window
//! polls for it; exactly one claims it, shows it in a panel, and writes the
//! human's reply back where the agent is waiting.

pub mod arbitration;
pub mod config;
pub mod dispatch;
pub mod exchange;
pub mod heartbeat;
pub mod log;
pub mod panel;
pub mod paths;
pub mod response;
pub mod session;
pub mod timers;
pub mod trigger;
pub mod voice;
pub mod workspace;
