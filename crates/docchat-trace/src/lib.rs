//! Run tracing (LangSmith-compatible REST API) and feedback recording.

pub mod client;
pub mod feedback;
pub mod types;

pub use client::{LangSmithClient, TraceBackend, Tracer};
pub use feedback::{score_for, FeedbackMode, FeedbackRecorder};
pub use types::{FeedbackEntry, RunRecord, TracedRun};
