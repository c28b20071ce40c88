//! Race Coordinator (C3): issues two competing LLM calls and commits to
//! the first that yields a validated response.

pub mod decorator;
pub mod race;

pub use decorator::MetricsDecoratedArm;
pub use race::{race, LlmArm, LlmRequest, RaceDeadlines, RaceWinner};
