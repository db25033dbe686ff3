//! Session orchestrator: conversation state plus the per-turn flow.
//!
//! A [`ChatSession`] owns the history, the current traced run and the
//! loaded document. The [`Orchestrator`] turns one user message into a
//! streamed reply, updates the session and reports the run.

pub mod orchestrator;
pub mod session;
pub mod types;

pub use orchestrator::{HttpModelFactory, ModelFactory, Orchestrator};
pub use session::{ChatSession, SessionSnapshot};
pub use types::*;
