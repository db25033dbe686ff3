//! User ratings mapped to scores and attached to traced runs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::TraceBackend;
use crate::types::{FeedbackEntry, RunRecord};
use docchat_core::{Error, Result};

const THUMBS_SCORES: &[(&str, f64)] = &[("👍", 1.0), ("👎", 0.0)];

const FACES_SCORES: &[(&str, f64)] = &[
    ("😀", 1.0),
    ("🙂", 0.75),
    ("😐", 0.5),
    ("🙁", 0.25),
    ("😞", 0.0),
];

/// Rating vocabulary shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackMode {
    #[default]
    Thumbs,
    Faces,
}

impl FeedbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackMode::Thumbs => "thumbs",
            FeedbackMode::Faces => "faces",
        }
    }

    /// Tokens accepted in this mode with their scores.
    pub fn scores(&self) -> &'static [(&'static str, f64)] {
        match self {
            FeedbackMode::Thumbs => THUMBS_SCORES,
            FeedbackMode::Faces => FACES_SCORES,
        }
    }

    pub fn score(&self, token: &str) -> Option<f64> {
        let token = token.trim();
        self.scores()
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, s)| *s)
    }
}

impl fmt::Display for FeedbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thumbs" => Ok(FeedbackMode::Thumbs),
            "faces" => Ok(FeedbackMode::Faces),
            other => Err(Error::Config(format!("Unknown feedback mode: {}", other))),
        }
    }
}

/// Forwards validated ratings to the tracing backend.
#[derive(Clone)]
pub struct FeedbackRecorder {
    backend: Arc<dyn TraceBackend>,
}

impl FeedbackRecorder {
    pub fn new(backend: Arc<dyn TraceBackend>) -> Self {
        Self { backend }
    }

    /// Record `token` against `run`.
    ///
    /// An unknown token fails with `FeedbackValidation` before anything is
    /// sent; a missing run fails with `NoActiveRun`.
    pub async fn record(
        &self,
        run: Option<&RunRecord>,
        mode: FeedbackMode,
        token: &str,
        comment: Option<&str>,
    ) -> Result<FeedbackEntry> {
        let entry = build_entry(run, mode, token, comment)?;
        self.backend.create_feedback(&entry).await?;
        info!("Recorded feedback {} ({}) for run {}", entry.key, entry.score, entry.run_id);
        Ok(entry)
    }
}

/// Score for `token`, or `FeedbackValidation` when the mode has no such rating.
pub fn score_for(mode: FeedbackMode, token: &str) -> Result<f64> {
    mode.score(token).ok_or_else(|| {
        warn!("Rejected {} feedback token {:?}", mode, token.trim());
        Error::FeedbackValidation(format!("{:?} is not a {} rating", token.trim(), mode))
    })
}

fn build_entry(
    run: Option<&RunRecord>,
    mode: FeedbackMode,
    token: &str,
    comment: Option<&str>,
) -> Result<FeedbackEntry> {
    let token = token.trim();
    let score = score_for(mode, token)?;
    let run = run.ok_or(Error::NoActiveRun)?;

    Ok(FeedbackEntry {
        id: Uuid::new_v4(),
        run_id: run.run_id,
        key: format!("{} {}", mode, token),
        score,
        comment: comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    })
}
